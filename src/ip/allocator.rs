//! IP address allocation logic.
//!
//! Grants and releases addresses by keeping the IP pool and the DHCP binding
//! table in step: an address is `occupied` exactly while one binding holds it.
//! Everything here runs inside the caller's transaction; conflicts are reported
//! with the current owner and never resolved by picking another address for a
//! caller who asked for a specific one.

use super::dhcp;
use super::pool::{find_ip, scan_free_ips, set_occupied};
use crate::error::{FleetError, Result};
use crate::model::{DhcpConfig, IpRecord, Vlan};
use crate::store::Transaction;
use crate::utils::{normalize_mac, parse_ipv4, validate_name};
use log::{debug, info, warn};

/// Bind an address to `hostname`.
///
/// Priority order:
/// 1) `explicit_ip`, if given: must exist in some vlan's pool and be free (or
///    already held by `hostname`)
/// 2) the lowest free address of `vlan`
///
/// Any previous binding of `hostname` is replaced and its address freed.
pub fn allocate(
    txn: &mut Transaction<'_>,
    vlan: &str,
    explicit_ip: &str,
    mac: &str,
    hostname: &str,
) -> Result<DhcpConfig> {
    validate_name("hostname", hostname)?;
    let mac = normalize_mac(mac)?;
    let previous = dhcp::get(txn, hostname)?;

    let ip = if explicit_ip.trim().is_empty() {
        next_free_ip(txn, vlan)?
    } else {
        let ip = requested_ip(txn, vlan, explicit_ip, hostname)?;
        if let Some(binding) = previous.as_ref() {
            if binding.vlan == ip.vlan && binding.ip == ip.ipv4_str && binding.mac_address == mac {
                debug!("{} already holds {} in {}", hostname, ip.ipv4_str, ip.vlan);
                return Ok(binding.clone());
            }
        }
        ip
    };

    if let Some(owner) = dhcp::find_by_mac(txn, &mac)? {
        if owner.hostname != hostname {
            return Err(FleetError::conflict(format!(
                "MAC {} is already in use by {}",
                mac, owner.hostname
            )));
        }
    }

    if let Some(binding) = previous {
        if binding.vlan != ip.vlan || binding.ip != ip.ipv4_str {
            info!(
                "Moving {} from {} ({}) to {} ({})",
                hostname, binding.ip, binding.vlan, ip.ipv4_str, ip.vlan
            );
            free_address(txn, &binding)?;
        }
    }

    set_occupied(txn, &ip.id, true)?;
    let binding = DhcpConfig {
        hostname: hostname.to_string(),
        ip: ip.ipv4_str.clone(),
        vlan: ip.vlan.clone(),
        mac_address: mac,
    };
    dhcp::put(txn, &binding)?;

    info!("Assigned IP {} in vlan {} to {}", binding.ip, binding.vlan, hostname);
    Ok(binding)
}

/// Lowest free address of `vlan`
fn next_free_ip(txn: &mut Transaction<'_>, vlan: &str) -> Result<IpRecord> {
    if vlan.is_empty() {
        return Err(FleetError::validation("vlan is required when no IP is given"));
    }
    if txn.get::<Vlan>(vlan)?.is_none() {
        return Err(FleetError::not_found(format!("Vlan {}", vlan)));
    }
    scan_free_ips(txn, vlan, 1)?
        .next()
        .ok_or_else(|| FleetError::ResourceExhausted(format!("no free IP left in vlan {}", vlan)))
}

/// Resolve a caller-chosen address and make sure nobody else holds it
fn requested_ip(
    txn: &mut Transaction<'_>,
    vlan: &str,
    explicit_ip: &str,
    hostname: &str,
) -> Result<IpRecord> {
    let address = parse_ipv4("ip", explicit_ip)?.to_string();
    // Vlans may overlap: a named vlan is looked up directly, never through the address index.
    let ip = if vlan.is_empty() {
        find_ip(txn, &address)?
            .ok_or_else(|| FleetError::not_found(format!("IP {} is not in any vlan", address)))?
    } else {
        txn.get::<IpRecord>(&IpRecord::make_id(vlan, &address))?
            .ok_or_else(|| FleetError::not_found(format!("IP {} is not in vlan {}", address, vlan)))?
    };

    if ip.occupied {
        match dhcp::find_by_ip(txn, &ip.vlan, &ip.ipv4_str)? {
            Some(owner) if owner.hostname == hostname => {}
            Some(owner) => {
                return Err(FleetError::conflict(format!(
                    "IP {} is already in use by {}",
                    address, owner.hostname
                )))
            }
            None => {
                return Err(FleetError::conflict(format!(
                    "IP {} is marked occupied but has no DHCP binding",
                    address
                )))
            }
        }
    }

    Ok(ip)
}

/// Drop `hostname`'s binding and free its address.
/// Releasing a host without a binding succeeds and changes nothing.
pub fn release(txn: &mut Transaction<'_>, hostname: &str) -> Result<Option<DhcpConfig>> {
    let Some(binding) = dhcp::get(txn, hostname)? else {
        debug!("{} has no DHCP binding, nothing to release", hostname);
        return Ok(None);
    };

    dhcp::delete(txn, hostname)?;
    free_address(txn, &binding)?;

    info!("Released IP {} in vlan {} from {}", binding.ip, binding.vlan, hostname);
    Ok(Some(binding))
}

fn free_address(txn: &mut Transaction<'_>, binding: &DhcpConfig) -> Result<()> {
    let id = IpRecord::make_id(&binding.vlan, &binding.ip);
    match txn.get::<IpRecord>(&id)? {
        Some(mut ip) => {
            ip.occupied = false;
            txn.put(&ip)
        }
        None => {
            warn!("Binding of {} points at missing IP {}", binding.hostname, id);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use crate::ip::cidr::parse_vlan;
    use crate::store::{run_in_transaction, MemoryStore};

    fn create_vlan(store: &MemoryStore, name: &str, cidr: &str) {
        let request = Vlan {
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
        };
        let layout = parse_vlan(&request, &NetworkConfig::default()).unwrap();
        run_in_transaction(store, |txn| {
            txn.put(&layout.vlan)?;
            for ip in &layout.ips {
                txn.put(ip)?;
            }
            Ok(())
        })
        .unwrap();
    }

    fn ip_record(store: &MemoryStore, id: &str) -> IpRecord {
        let mut txn = Transaction::new(store);
        txn.get(id).unwrap().unwrap()
    }

    #[test]
    fn test_lowest_free_first() {
        let store = MemoryStore::new();
        create_vlan(&store, "v1", "192.168.40.0/22");

        let (first, _) = run_in_transaction(&store, |txn| allocate(txn, "v1", "", "", "vm-1")).unwrap();
        let (second, _) = run_in_transaction(&store, |txn| allocate(txn, "v1", "", "", "vm-2")).unwrap();
        assert_eq!(first.ip, "192.168.40.11");
        assert_eq!(second.ip, "192.168.40.12");

        run_in_transaction(&store, |txn| release(txn, "vm-1")).unwrap();
        let (third, _) = run_in_transaction(&store, |txn| allocate(txn, "v1", "", "", "vm-3")).unwrap();
        assert_eq!(third.ip, "192.168.40.11");
    }

    #[test]
    fn test_explicit_ip() {
        let store = MemoryStore::new();
        create_vlan(&store, "v1", "10.0.0.0/24");

        let (binding, _) =
            run_in_transaction(&store, |txn| allocate(txn, "", "10.0.0.5", "AA:BB:CC:DD:EE:FF", "vm-1"))
                .unwrap();
        assert_eq!(binding.vlan, "v1");
        assert_eq!(binding.mac_address, "aa:bb:cc:dd:ee:ff");
        assert!(ip_record(&store, "v1/10.0.0.5").occupied);

        let err = run_in_transaction(&store, |txn| allocate(txn, "v1", "10.0.0.5", "", "vm-2")).unwrap_err();
        assert!(matches!(err, FleetError::Conflict(_)));
        assert!(err.to_string().contains("already in use by vm-1"));

        let err = run_in_transaction(&store, |txn| allocate(txn, "v1", "10.9.0.5", "", "vm-2")).unwrap_err();
        assert!(matches!(err, FleetError::NotFound(_)));

        let err = run_in_transaction(&store, |txn| allocate(txn, "v2", "10.0.0.6", "", "vm-2")).unwrap_err();
        assert!(matches!(err, FleetError::NotFound(_)));

        // Asking again for the same address is a no-op
        let (again, events) =
            run_in_transaction(&store, |txn| allocate(txn, "v1", "10.0.0.5", "aa:bb:cc:dd:ee:ff", "vm-1"))
                .unwrap();
        assert_eq!(again, binding);
        assert!(events.is_empty());
    }

    #[test]
    fn test_explicit_ip_in_overlapping_vlans() {
        let store = MemoryStore::new();
        create_vlan(&store, "a-vlan", "10.0.0.0/24");
        create_vlan(&store, "b-vlan", "10.0.0.0/24");

        let (binding, _) =
            run_in_transaction(&store, |txn| allocate(txn, "b-vlan", "10.0.0.50", "", "vm-1")).unwrap();
        assert_eq!(binding.vlan, "b-vlan");
        assert!(ip_record(&store, "b-vlan/10.0.0.50").occupied);
        assert!(!ip_record(&store, "a-vlan/10.0.0.50").occupied);

        // The same address is still free in the other vlan
        let (binding, _) =
            run_in_transaction(&store, |txn| allocate(txn, "a-vlan", "10.0.0.50", "", "vm-2")).unwrap();
        assert_eq!(binding.vlan, "a-vlan");

        let err = run_in_transaction(&store, |txn| allocate(txn, "b-vlan", "10.0.0.50", "", "vm-3")).unwrap_err();
        assert!(err.to_string().contains("already in use by vm-1"));
    }

    #[test]
    fn test_interleaved_allocations_with_one_mac() {
        let store = MemoryStore::new();
        create_vlan(&store, "v1", "10.0.0.0/24");
        let mac = "aa:bb:cc:dd:ee:ff";

        let mut first = Transaction::new(&store);
        let mut second = Transaction::new(&store);
        allocate(&mut first, "v1", "10.0.0.20", mac, "vm-1").unwrap();
        allocate(&mut second, "v1", "10.0.0.21", mac, "vm-2").unwrap();

        first.commit().unwrap();
        let err = second.commit().unwrap_err();
        assert!(err.is_transient());
        assert!(!ip_record(&store, "v1/10.0.0.21").occupied);

        // Retrying sees the committed binding
        let err = run_in_transaction(&store, |txn| allocate(txn, "v1", "10.0.0.21", mac, "vm-2")).unwrap_err();
        assert!(matches!(&err, FleetError::Conflict(msg) if msg.contains("in use by vm-1")));
    }

    #[test]
    fn test_rebind_frees_previous_address() {
        let store = MemoryStore::new();
        create_vlan(&store, "v1", "10.0.0.0/24");

        run_in_transaction(&store, |txn| allocate(txn, "v1", "", "", "vm-1")).unwrap();
        let (moved, _) = run_in_transaction(&store, |txn| allocate(txn, "v1", "10.0.0.50", "", "vm-1")).unwrap();
        assert_eq!(moved.ip, "10.0.0.50");
        assert!(!ip_record(&store, "v1/10.0.0.11").occupied);
        assert!(ip_record(&store, "v1/10.0.0.50").occupied);
    }

    #[test]
    fn test_mac_conflict() {
        let store = MemoryStore::new();
        create_vlan(&store, "v1", "10.0.0.0/24");

        run_in_transaction(&store, |txn| allocate(txn, "v1", "", "aa:bb:cc:dd:ee:ff", "vm-1")).unwrap();
        let err = run_in_transaction(&store, |txn| allocate(txn, "v1", "", "aabbccddeeff", "vm-2")).unwrap_err();
        assert!(err.to_string().contains("MAC aa:bb:cc:dd:ee:ff is already in use by vm-1"));
        assert!(!ip_record(&store, "v1/10.0.0.12").occupied);
    }

    #[test]
    fn test_exhaustion() {
        let store = MemoryStore::new();
        create_vlan(&store, "v1", "10.0.0.0/28");

        for host in 0..4 {
            run_in_transaction(&store, |txn| allocate(txn, "v1", "", "", &format!("vm-{}", host))).unwrap();
        }
        let err = run_in_transaction(&store, |txn| allocate(txn, "v1", "", "", "vm-9")).unwrap_err();
        assert!(matches!(err, FleetError::ResourceExhausted(_)));

        let err = run_in_transaction(&store, |txn| allocate(txn, "nope", "", "", "vm-9")).unwrap_err();
        assert!(matches!(err, FleetError::NotFound(_)));
    }

    #[test]
    fn test_release_is_idempotent() {
        let store = MemoryStore::new();
        create_vlan(&store, "v1", "10.0.0.0/24");
        run_in_transaction(&store, |txn| allocate(txn, "v1", "", "", "vm-1")).unwrap();

        let (released, events) = run_in_transaction(&store, |txn| release(txn, "vm-1")).unwrap();
        assert_eq!(released.unwrap().ip, "10.0.0.11");
        assert_eq!(events.len(), 2);
        assert!(!ip_record(&store, "v1/10.0.0.11").occupied);

        let (released, events) = run_in_transaction(&store, |txn| release(txn, "vm-1")).unwrap();
        assert!(released.is_none());
        assert!(events.is_empty());
    }
}
