//! Network-address allocation engine.
//!
//! This module parses vlan address blocks, tracks which addresses are free and
//! binds addresses to hosts through DHCP configs.

pub mod allocator;
pub mod cidr;
pub mod dhcp;
pub mod pool;

// Re-export commonly used types
pub use allocator::{allocate, release};
pub use cidr::{parse_vlan, FreeRange, VlanLayout};
pub use pool::{list_ips, scan_free_ips, FreeIpScan};
