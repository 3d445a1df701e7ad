//! DHCP binding table: hostname -> (ip, vlan, mac).
//!
//! At most one binding exists per hostname (it is the record key). Reverse
//! lookups by address or MAC go through the store's indexes.

use crate::error::Result;
use crate::model::{index, DhcpConfig};
use crate::store::Transaction;
use log::warn;

/// Binding held by `hostname`
pub fn get(txn: &mut Transaction<'_>, hostname: &str) -> Result<Option<DhcpConfig>> {
    txn.get(hostname)
}

fn single(mut bindings: Vec<DhcpConfig>, what: &str) -> Option<DhcpConfig> {
    if bindings.len() > 1 {
        let hosts: Vec<&str> = bindings.iter().map(|b| b.hostname.as_str()).collect();
        warn!("{} is bound to several hosts: {:?}", what, hosts);
    }
    if bindings.is_empty() {
        None
    } else {
        Some(bindings.remove(0))
    }
}

/// Binding holding address `ip` in `vlan`
pub fn find_by_ip(txn: &mut Transaction<'_>, vlan: &str, ip: &str) -> Result<Option<DhcpConfig>> {
    let bindings: Vec<DhcpConfig> = txn
        .query::<DhcpConfig>(index::IP, ip)?
        .into_iter()
        .filter(|binding| binding.vlan == vlan)
        .collect();
    Ok(single(bindings, &format!("IP {} in {}", ip, vlan)))
}

/// Binding using a normalized MAC address
pub fn find_by_mac(txn: &mut Transaction<'_>, mac: &str) -> Result<Option<DhcpConfig>> {
    if mac.is_empty() {
        return Ok(None);
    }
    let bindings = txn.query(index::MAC, mac)?;
    Ok(single(bindings, &format!("MAC {}", mac)))
}

/// All bindings in `vlan`
pub fn list_by_vlan(txn: &mut Transaction<'_>, vlan: &str) -> Result<Vec<DhcpConfig>> {
    txn.query(index::VLAN, vlan)
}

/// Create or replace the binding for `binding.hostname`
pub fn put(txn: &mut Transaction<'_>, binding: &DhcpConfig) -> Result<()> {
    txn.put(binding)
}

pub fn delete(txn: &mut Transaction<'_>, hostname: &str) -> Result<()> {
    txn.delete::<DhcpConfig>(hostname)
}
