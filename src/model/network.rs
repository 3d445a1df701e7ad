use super::index;
use crate::store::Entity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// A named IPv4 address block with its free/reserved policy
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Vlan {
    pub name: String,
    /// `a.b.c.d/n`, immutable once the vlan exists
    pub cidr_block: String,
    /// Usable host addresses in the block
    pub capacity: u32,
    pub free_start_ip: String,
    pub free_end_ip: String,
    #[serde(default)]
    pub reserved_ips: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realm: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
}

impl Entity for Vlan {
    const KIND: &'static str = "vlan";

    fn key(&self) -> String {
        self.name.clone()
    }

    fn indexes(&self) -> Vec<(&'static str, String)> {
        self.zone
            .iter()
            .map(|zone| (index::ZONE, zone.clone()))
            .collect()
    }
}

/// One address of a vlan's pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpRecord {
    /// `{vlan}/{address}`
    pub id: String,
    pub ipv4: u32,
    pub ipv4_str: String,
    pub vlan: String,
    /// Set iff a DHCP binding holds this address
    pub occupied: bool,
    /// Outside the vlan's free range or explicitly reserved; never handed out automatically
    #[serde(default)]
    pub reserved: bool,
}

impl IpRecord {
    pub fn new(vlan: &str, address: Ipv4Addr, reserved: bool) -> Self {
        Self {
            id: Self::make_id(vlan, address),
            ipv4: u32::from(address),
            ipv4_str: address.to_string(),
            vlan: vlan.to_string(),
            occupied: false,
            reserved,
        }
    }

    pub fn make_id(vlan: &str, address: impl fmt::Display) -> String {
        format!("{}/{}", vlan, address)
    }

    pub fn address(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.ipv4)
    }

    /// Offered by the free-IP scan
    pub fn is_free(&self) -> bool {
        !self.occupied && !self.reserved
    }
}

impl Entity for IpRecord {
    const KIND: &'static str = "ip";

    fn key(&self) -> String {
        self.id.clone()
    }

    fn indexes(&self) -> Vec<(&'static str, String)> {
        vec![
            (index::VLAN, self.vlan.clone()),
            (index::IPV4, self.ipv4_str.clone()),
        ]
    }
}

/// hostname -> (ip, vlan, mac) binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhcpConfig {
    pub hostname: String,
    pub ip: String,
    pub vlan: String,
    #[serde(default)]
    pub mac_address: String,
}

impl Entity for DhcpConfig {
    const KIND: &'static str = "dhcp";

    fn key(&self) -> String {
        self.hostname.clone()
    }

    fn indexes(&self) -> Vec<(&'static str, String)> {
        let mut indexes = vec![
            (index::IP, self.ip.clone()),
            (index::VLAN, self.vlan.clone()),
        ];
        if !self.mac_address.is_empty() {
            indexes.push((index::MAC, self.mac_address.clone()));
        }
        indexes
    }
}
