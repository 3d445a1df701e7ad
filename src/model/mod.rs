//! Persisted record types.
//!
//! - `network`: Vlan, IP and DHCP binding records owned by the allocation engine
//! - `device`: Servo descriptors and the DUT/Labstation host records owned by
//!   the topology manager

pub mod device;
pub mod network;

pub use device::{Dut, Labstation, Servo, ServoPlacement, ServoSetupType};
pub use network::{DhcpConfig, IpRecord, Vlan};

/// Indexed property names used with `Transaction::query`
pub mod index {
    pub const VLAN: &str = "vlan";
    pub const ZONE: &str = "zone";
    pub const IPV4: &str = "ipv4_str";
    pub const IP: &str = "ip";
    pub const MAC: &str = "mac";
    pub const SERVO_HOSTNAME: &str = "servo_hostname";
    pub const SERVO_ID: &str = "servo_id";
    pub const SERVO_SERIAL: &str = "servo_serial";
}
