//! VLAN address-block parsing.
//!
//! Turns a vlan's CIDR string into the full, ordered pool of [`IpRecord`]s and
//! decides which of them are offered as free. The default policy reserves the
//! network address plus the first `reserved_ip_count` addresses after it, and
//! the broadcast address.

use crate::config::NetworkConfig;
use crate::error::{FleetError, Result};
use crate::model::{IpRecord, Vlan};
use crate::utils::{offset_ipv4, parse_ipv4, parse_optional_ipv4, validate_name};
use ipnetwork::Ipv4Network;
use std::collections::BTreeSet;
use std::net::Ipv4Addr;

/// A parsed vlan together with its seeded address pool
#[derive(Debug, Clone)]
pub struct VlanLayout {
    pub vlan: Vlan,
    /// Every address of the block in ascending order
    pub ips: Vec<IpRecord>,
}

/// Addresses the allocator may hand out automatically
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeRange {
    pub start: Ipv4Addr,
    pub end: Ipv4Addr,
    /// Explicitly reserved addresses inside the range
    pub reserved: BTreeSet<Ipv4Addr>,
}

impl FreeRange {
    pub fn is_reserved(&self, address: Ipv4Addr) -> bool {
        address < self.start || address > self.end || self.reserved.contains(&address)
    }
}

/// Parse `a.b.c.d/n` without any size policy.
/// Host bits must be zero: `192.168.40.5/22` is rejected rather than silently widened.
pub fn parse_block(cidr: &str) -> Result<Ipv4Network> {
    let cidr = cidr.trim();
    if !cidr.contains('/') {
        return Err(FleetError::validation(format!(
            "CIDR '{}' is missing a prefix length",
            cidr
        )));
    }
    let network: Ipv4Network = cidr
        .parse()
        .map_err(|e| FleetError::validation(format!("malformed CIDR '{}': {}", cidr, e)))?;
    if network.ip() != network.network() {
        return Err(FleetError::validation(format!(
            "CIDR '{}' has host bits set, expected {}/{}",
            cidr,
            network.network(),
            network.prefix()
        )));
    }
    Ok(network)
}

/// Parse a CIDR for a new vlan, enforcing the configured block size limit
pub fn parse_cidr(cidr: &str, config: &NetworkConfig) -> Result<Ipv4Network> {
    let network = parse_block(cidr)?;
    if network.prefix() < config.min_prefix_len {
        return Err(FleetError::validation(format!(
            "CIDR '{}' is larger than the /{} limit",
            cidr, config.min_prefix_len
        )));
    }
    Ok(network)
}

fn block_size(network: Ipv4Network) -> u64 {
    1u64 << (32 - u32::from(network.prefix()))
}

fn last_address(network: Ipv4Network) -> Ipv4Addr {
    let last = u64::from(u32::from(network.network())) + block_size(network) - 1;
    Ipv4Addr::from(last as u32)
}

/// Usable host addresses: the block minus network and broadcast (/31 and /32 excepted)
pub fn capacity_of(network: Ipv4Network) -> u32 {
    match network.prefix() {
        32 => 1,
        31 => 2,
        _ => (block_size(network) - 2) as u32,
    }
}

/// Default free range; `None` when the block is too small to leave anything free
pub fn default_free_range(network: Ipv4Network, config: &NetworkConfig) -> Option<(Ipv4Addr, Ipv4Addr)> {
    let last = last_address(network);
    let start = offset_ipv4(network.network(), config.reserved_ip_count.checked_add(1)?)?;
    let end = if network.prefix() >= 31 {
        last
    } else {
        Ipv4Addr::from(u32::from(last) - 1)
    };
    (start <= end).then_some((start, end))
}

/// Resolve the free range from optional overrides (empty string = default)
pub fn resolve_free_range(
    network: Ipv4Network,
    free_start_ip: &str,
    free_end_ip: &str,
    reserved_ips: &[String],
    config: &NetworkConfig,
) -> Result<FreeRange> {
    let start_override = parse_optional_ipv4("free_start_ip", free_start_ip)?;
    let end_override = parse_optional_ipv4("free_end_ip", free_end_ip)?;

    for (field, address) in [("free_start_ip", start_override), ("free_end_ip", end_override)] {
        if let Some(address) = address {
            if !network.contains(address) {
                return Err(FleetError::validation(format!(
                    "{} {} is outside {}",
                    field, address, network
                )));
            }
        }
    }

    let default = default_free_range(network, config);
    let (start, end) = match (start_override, end_override, default) {
        (Some(start), Some(end), _) => (start, end),
        (start, end, Some((default_start, default_end))) => {
            (start.unwrap_or(default_start), end.unwrap_or(default_end))
        }
        (_, _, None) => {
            return Err(FleetError::validation(format!(
                "{} is too small to keep {} reserved addresses, set free_start_ip and free_end_ip explicitly",
                network, config.reserved_ip_count
            )))
        }
    };

    if start > end {
        return Err(FleetError::validation(format!(
            "free_start_ip {} is after free_end_ip {}",
            start, end
        )));
    }

    let mut reserved = BTreeSet::new();
    for ip in reserved_ips {
        let address = parse_ipv4("reserved ip", ip)?;
        if !network.contains(address) {
            return Err(FleetError::validation(format!(
                "reserved ip {} is outside {}",
                address, network
            )));
        }
        reserved.insert(address);
    }

    Ok(FreeRange { start, end, reserved })
}

/// Parse a vlan request into its record and full address pool.
///
/// `request.capacity` is ignored and recomputed from the block.
pub fn parse_vlan(request: &Vlan, config: &NetworkConfig) -> Result<VlanLayout> {
    validate_name("vlan name", &request.name)?;
    let network = parse_cidr(&request.cidr_block, config)?;
    let range = resolve_free_range(
        network,
        &request.free_start_ip,
        &request.free_end_ip,
        &request.reserved_ips,
        config,
    )?;

    let ips: Vec<IpRecord> = network
        .iter()
        .map(|address| IpRecord::new(&request.name, address, range.is_reserved(address)))
        .collect();

    let vlan = Vlan {
        name: request.name.clone(),
        cidr_block: network.to_string(),
        capacity: capacity_of(network),
        free_start_ip: range.start.to_string(),
        free_end_ip: range.end.to_string(),
        reserved_ips: range.reserved.iter().map(Ipv4Addr::to_string).collect(),
        zone: request.zone.clone(),
        realm: request.realm.clone(),
        description: request.description.clone(),
        update_time: None,
    };

    Ok(VlanLayout { vlan, ips })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str, cidr: &str) -> Vlan {
        Vlan {
            name: name.to_string(),
            cidr_block: cidr.to_string(),
            capacity: 0,
            free_start_ip: String::new(),
            free_end_ip: String::new(),
            reserved_ips: Vec::new(),
            zone: None,
            realm: None,
            description: String::new(),
            update_time: None,
        }
    }

    #[test]
    fn test_default_layout() {
        let layout = parse_vlan(&request("v1", "192.168.40.0/22"), &NetworkConfig::default()).unwrap();
        assert_eq!(layout.vlan.capacity, 1022);
        assert_eq!(layout.vlan.free_start_ip, "192.168.40.11");
        assert_eq!(layout.vlan.free_end_ip, "192.168.43.254");
        assert_eq!(layout.ips.len(), 1024);

        // network address and the next 10 are reserved
        assert!(layout.ips[..11].iter().all(|ip| ip.reserved));
        assert!(!layout.ips[11].reserved);
        assert_eq!(layout.ips[11].ipv4_str, "192.168.40.11");
        // broadcast
        assert!(layout.ips[1023].reserved);
        assert!(layout.ips.windows(2).all(|pair| pair[0].ipv4 < pair[1].ipv4));
    }

    #[test]
    fn test_malformed_cidr() {
        let config = NetworkConfig::default();
        for cidr in ["192.168.40.0", "192.168.40.0/33", "abc/22", "192.168.40.5/22", "2001:db8::/64"] {
            let err = parse_vlan(&request("v1", cidr), &config).unwrap_err();
            assert!(matches!(err, FleetError::Validation(_)), "{} should be rejected", cidr);
        }
    }

    #[test]
    fn test_block_size_limit() {
        let err = parse_vlan(&request("v1", "10.0.0.0/8"), &NetworkConfig::default()).unwrap_err();
        assert!(err.to_string().contains("/16 limit"));
    }

    #[test]
    fn test_free_range_overrides() {
        let config = NetworkConfig::default();
        let mut req = request("v1", "10.1.0.0/24");
        req.free_start_ip = "10.1.0.100".to_string();
        let layout = parse_vlan(&req, &config).unwrap();
        assert_eq!(layout.vlan.free_start_ip, "10.1.0.100");
        assert_eq!(layout.vlan.free_end_ip, "10.1.0.254");
        assert_eq!(layout.ips.iter().filter(|ip| !ip.reserved).count(), 155);

        req.free_end_ip = "10.1.0.50".to_string();
        assert!(matches!(parse_vlan(&req, &config), Err(FleetError::Validation(_))));

        let mut req = request("v1", "10.1.0.0/24");
        req.free_end_ip = "10.1.1.10".to_string();
        let err = parse_vlan(&req, &config).unwrap_err();
        assert!(err.to_string().contains("outside"));
    }

    #[test]
    fn test_small_blocks() {
        let config = NetworkConfig::default();
        let layout = parse_vlan(&request("v1", "10.2.0.0/28"), &config).unwrap();
        assert_eq!(layout.vlan.free_start_ip, "10.2.0.11");
        assert_eq!(layout.vlan.free_end_ip, "10.2.0.14");
        assert_eq!(layout.vlan.capacity, 14);

        assert!(parse_vlan(&request("v1", "10.2.0.0/29"), &config).is_err());

        let mut req = request("v1", "10.2.0.0/29");
        req.free_start_ip = "10.2.0.2".to_string();
        req.free_end_ip = "10.2.0.6".to_string();
        assert!(parse_vlan(&req, &config).is_ok());
    }

    #[test]
    fn test_reserved_ips() {
        let config = NetworkConfig::default();
        let mut req = request("v1", "10.3.0.0/24");
        req.reserved_ips = vec!["10.3.0.11".to_string(), "10.3.0.20".to_string()];
        let layout = parse_vlan(&req, &config).unwrap();
        let first_free = layout.ips.iter().find(|ip| ip.is_free()).unwrap();
        assert_eq!(first_free.ipv4_str, "10.3.0.12");
        assert!(layout.ips[20].reserved);

        req.reserved_ips = vec!["10.4.0.1".to_string()];
        assert!(parse_vlan(&req, &config).is_err());
    }
}
