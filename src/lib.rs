//! # labfleet - Lab fleet inventory core
//!
//! This library keeps the book of a hardware test lab: which IPv4 addresses
//! each vlan owns, which host holds which address, and which labstation port
//! every DUT's servo is plugged into.
//!
//! ## Overview
//!
//! - **Vlans**: a CIDR block expands into a pool of address records with a
//!   configurable reserved prefix and free range
//! - **Allocation**: lowest-free or caller-chosen addresses, bound to a host
//!   through a DHCP record, released idempotently
//! - **Peripheral topology**: DUT servos move between labstations, containers
//!   and "no servo" while port and serial stay unique per labstation
//! - **Transactions**: every operation commits atomically or not at all;
//!   concurrent writers lose with a retryable conflict
//!
//! ## Architecture
//!
//! - `config` / `config_loader`: YAML configuration and its validation
//! - `error`: the [`error::FleetError`] taxonomy
//! - `store`: record storage, optimistic transactions, JSON snapshots
//! - `audit`: change events emitted after each commit
//! - `model`: vlan, address, DHCP, DUT and labstation records
//! - `ip`: CIDR parsing, address pools, allocation, DHCP bindings
//! - `topology`: servo validation and labstation bookkeeping
//! - `field_mask`: typed partial-update paths
//! - `inventory`: the service tying all of the above together
//! - `utils`: IPv4 and name/MAC helpers
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use labfleet::audit::LogAuditSink;
//! use labfleet::config::FleetConfig;
//! use labfleet::inventory::Inventory;
//! use labfleet::model::Vlan;
//! use labfleet::store::MemoryStore;
//! use std::sync::Arc;
//!
//! let inventory = Inventory::new(
//!     Arc::new(MemoryStore::new()),
//!     FleetConfig::default(),
//!     Arc::new(LogAuditSink),
//! );
//!
//! inventory.create_vlan(&Vlan {
//!     name: "lab-40".to_string(),
//!     cidr_block: "192.168.40.0/22".to_string(),
//!     ..Default::default()
//! })?;
//!
//! // Lowest free address after the reserved prefix: 192.168.40.11
//! let binding = inventory.allocate("lab-40", "", "", "chromeos1-row1-rack1-host1")?;
//! println!("{} -> {}", binding.hostname, binding.ip);
//! # Ok::<(), labfleet::error::FleetError>(())
//! ```
//!
//! ## Error Handling
//!
//! Library functions return [`error::Result`]. Conflict errors name the current
//! owner of the contested resource; `TransientConflict` means the whole
//! operation may be retried.

pub mod audit;
pub mod config;
pub mod config_loader;
pub mod error;
pub mod field_mask;
pub mod inventory;
pub mod ip;
pub mod model;
pub mod store;
pub mod topology;
pub mod utils;
