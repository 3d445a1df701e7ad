//! Per-vlan IP pool queries.

use crate::error::{FleetError, Result};
use crate::model::{index, IpRecord};
use crate::store::Transaction;
use log::warn;

/// Unoccupied, unreserved addresses of one vlan in ascending order.
///
/// Produced by [`scan_free_ips`]; yields at most `limit` records and cannot be
/// rewound. Callers wanting fresher data scan again.
#[derive(Debug)]
pub struct FreeIpScan {
    candidates: std::vec::IntoIter<IpRecord>,
    remaining: usize,
}

impl Iterator for FreeIpScan {
    type Item = IpRecord;

    fn next(&mut self) -> Option<IpRecord> {
        if self.remaining == 0 {
            return None;
        }
        let ip = self.candidates.find(IpRecord::is_free)?;
        self.remaining -= 1;
        Some(ip)
    }
}

/// Start a fresh scan of `vlan`'s free addresses, lowest address first
pub fn scan_free_ips(txn: &mut Transaction<'_>, vlan: &str, limit: usize) -> Result<FreeIpScan> {
    let candidates = list_ips(txn, vlan)?;
    Ok(FreeIpScan {
        candidates: candidates.into_iter(),
        remaining: limit,
    })
}

/// Every address of `vlan`, ordered by integer value
pub fn list_ips(txn: &mut Transaction<'_>, vlan: &str) -> Result<Vec<IpRecord>> {
    let mut ips: Vec<IpRecord> = txn.query(index::VLAN, vlan)?;
    ips.sort_by_key(|ip| ip.ipv4);
    Ok(ips)
}

/// Look an address up across all vlans
pub fn find_ip(txn: &mut Transaction<'_>, address: &str) -> Result<Option<IpRecord>> {
    let mut matches: Vec<IpRecord> = txn.query(index::IPV4, address)?;
    if matches.len() > 1 {
        let vlans: Vec<&str> = matches.iter().map(|ip| ip.vlan.as_str()).collect();
        warn!("Address {} is present in several vlans: {:?}", address, vlans);
    }
    matches.sort_by(|a, b| a.vlan.cmp(&b.vlan));
    Ok(matches.into_iter().next())
}

/// Re-read an address record and flip its occupied flag
pub fn set_occupied(txn: &mut Transaction<'_>, id: &str, occupied: bool) -> Result<IpRecord> {
    let mut ip: IpRecord = txn
        .get(id)?
        .ok_or_else(|| FleetError::not_found(format!("IP {}", id)))?;
    ip.occupied = occupied;
    txn.put(&ip)?;
    Ok(ip)
}
