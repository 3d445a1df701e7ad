//! Inventory service: the entry point for every lab-fleet operation.
//!
//! Each public method runs as one transaction against the configured store.
//! Changes reach the audit sink only after a successful commit; a failed
//! operation writes nothing and reports nothing.

use crate::audit::AuditSink;
use crate::config::FleetConfig;
use crate::error::{FleetError, Result};
use crate::field_mask::{merge_vlan, parse_mask, DutField, VlanField};
use crate::ip::{self, cidr, dhcp, pool};
use crate::model::{DhcpConfig, Dut, IpRecord, Labstation, Vlan};
use crate::store::{run_in_transaction, Store, Transaction};
use crate::topology;
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;

pub struct Inventory {
    store: Arc<dyn Store>,
    config: FleetConfig,
    audit: Arc<dyn AuditSink>,
}

impl Inventory {
    pub fn new(store: Arc<dyn Store>, config: FleetConfig, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, config, audit }
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    fn run<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let (value, events) = run_in_transaction(self.store.as_ref(), op)?;
        if !events.is_empty() {
            debug!("Committed {} change(s)", events.len());
        }
        for event in &events {
            self.audit.record(event);
        }
        Ok(value)
    }

    // ----- vlans -----

    /// Create a vlan and seed its whole address pool
    pub fn create_vlan(&self, request: &Vlan) -> Result<Vlan> {
        let layout = cidr::parse_vlan(request, &self.config.network)?;
        let vlan = self.run(|txn| {
            if txn.get::<Vlan>(&layout.vlan.name)?.is_some() {
                return Err(FleetError::conflict(format!(
                    "Vlan {} already exists",
                    layout.vlan.name
                )));
            }
            let mut vlan = layout.vlan.clone();
            vlan.update_time = Some(Utc::now());
            txn.put(&vlan)?;
            for ip in &layout.ips {
                txn.put(ip)?;
            }
            Ok(vlan)
        })?;

        info!(
            "Created vlan {} ({}), free range {} - {}",
            vlan.name, vlan.cidr_block, vlan.free_start_ip, vlan.free_end_ip
        );
        Ok(vlan)
    }

    pub fn get_vlan(&self, name: &str) -> Result<Vlan> {
        self.run(|txn| existing_vlan(txn, name))
    }

    pub fn list_vlans(&self) -> Result<Vec<Vlan>> {
        self.run(|txn| txn.scan::<Vlan>())
    }

    /// Change a vlan's free range. The CIDR and capacity stay as they are; the
    /// `reserved` flag of every address is recomputed.
    pub fn update_vlan(&self, name: &str, request: &Vlan, mask: &[String]) -> Result<Vlan> {
        let mask: Vec<VlanField> = parse_mask(mask)?;
        let network_config = &self.config.network;

        self.run(|txn| {
            let current = existing_vlan(txn, name)?;
            let mut vlan = merge_vlan(&current, request, &mask)?;

            let network = cidr::parse_block(&current.cidr_block)?;
            let range = cidr::resolve_free_range(
                network,
                &vlan.free_start_ip,
                &vlan.free_end_ip,
                &vlan.reserved_ips,
                network_config,
            )?;
            vlan.free_start_ip = range.start.to_string();
            vlan.free_end_ip = range.end.to_string();

            let mut flipped = 0;
            for mut ip in pool::list_ips(txn, name)? {
                let reserved = range.is_reserved(ip.address());
                if ip.reserved == reserved {
                    continue;
                }
                if reserved && ip.occupied {
                    warn!("{} is now outside the free range of {} but stays bound", ip.ipv4_str, name);
                }
                ip.reserved = reserved;
                txn.put(&ip)?;
                flipped += 1;
            }

            vlan.update_time = Some(Utc::now());
            txn.put(&vlan)?;
            info!(
                "Updated vlan {}: free range {} - {}, {} address(es) changed",
                name, vlan.free_start_ip, vlan.free_end_ip, flipped
            );
            Ok(vlan)
        })
    }

    /// Delete a vlan and its pool; refused while any address is bound
    pub fn delete_vlan(&self, name: &str) -> Result<Vlan> {
        self.run(|txn| {
            let vlan = existing_vlan(txn, name)?;
            let ips = pool::list_ips(txn, name)?;

            let occupied: Vec<&str> = ips
                .iter()
                .filter(|ip| ip.occupied)
                .map(|ip| ip.ipv4_str.as_str())
                .collect();
            if !occupied.is_empty() {
                return Err(FleetError::FailedPrecondition(format!(
                    "vlan {} still has {} bound address(es), first {}",
                    name,
                    occupied.len(),
                    occupied[0]
                )));
            }

            for ip in &ips {
                txn.delete::<IpRecord>(&ip.id)?;
            }
            txn.delete::<Vlan>(name)?;
            info!("Deleted vlan {} and {} address(es)", name, ips.len());
            Ok(vlan)
        })
    }

    // ----- addresses -----

    pub fn list_ips(&self, vlan: &str) -> Result<Vec<IpRecord>> {
        self.run(|txn| {
            existing_vlan(txn, vlan)?;
            pool::list_ips(txn, vlan)
        })
    }

    /// Up to `limit` free addresses of `vlan`, lowest first
    pub fn free_ips(&self, vlan: &str, limit: usize) -> Result<Vec<IpRecord>> {
        self.run(|txn| {
            existing_vlan(txn, vlan)?;
            Ok(pool::scan_free_ips(txn, vlan, limit)?.collect())
        })
    }

    pub fn allocate(&self, vlan: &str, explicit_ip: &str, mac: &str, hostname: &str) -> Result<DhcpConfig> {
        self.run(|txn| ip::allocate(txn, vlan, explicit_ip, mac, hostname))
    }

    pub fn release(&self, hostname: &str) -> Result<Option<DhcpConfig>> {
        self.run(|txn| ip::release(txn, hostname))
    }

    pub fn dhcp_config(&self, hostname: &str) -> Result<DhcpConfig> {
        self.run(|txn| {
            dhcp::get(txn, hostname)?
                .ok_or_else(|| FleetError::not_found(format!("DHCP binding for {}", hostname)))
        })
    }

    // ----- devices -----

    pub fn create_labstation(&self, request: &Labstation) -> Result<Labstation> {
        self.run(|txn| topology::create_labstation(txn, request))
    }

    pub fn get_labstation(&self, hostname: &str) -> Result<Labstation> {
        self.run(|txn| topology::get_labstation(txn, hostname))
    }

    pub fn delete_labstation(&self, hostname: &str) -> Result<Labstation> {
        self.run(|txn| topology::delete_labstation(txn, hostname))
    }

    pub fn create_dut(&self, request: &Dut) -> Result<Dut> {
        self.run(|txn| topology::create_dut(txn, request, &self.config.servo))
    }

    pub fn get_dut(&self, hostname: &str) -> Result<Dut> {
        self.run(|txn| topology::get_dut(txn, hostname))
    }

    pub fn update_dut(&self, hostname: &str, request: &Dut, mask: &[String]) -> Result<Dut> {
        let mask: Vec<DutField> = parse_mask(mask)?;
        self.run(|txn| topology::update_dut(txn, hostname, request, &mask, &self.config.servo))
    }

    pub fn delete_dut(&self, hostname: &str) -> Result<Dut> {
        self.run(|txn| topology::delete_dut(txn, hostname))
    }
}

fn existing_vlan(txn: &mut Transaction<'_>, name: &str) -> Result<Vlan> {
    txn.get(name)?
        .ok_or_else(|| FleetError::not_found(format!("Vlan {}", name)))
}
