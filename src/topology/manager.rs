//! DUT and labstation lifecycle with servo bookkeeping.
//!
//! A labstation's `servos` list mirrors the servos of the DUTs pointing at it.
//! Every DUT mutation moves the DUT's servo between placements inside the
//! caller's transaction, so both records change together or not at all.

use super::servo::{check_conflicts, prepare_servo};
use crate::config::ServoConfig;
use crate::error::{FleetError, Result};
use crate::field_mask::{merge_dut, DutField};
use crate::ip;
use crate::model::device::placement_of;
use crate::model::{index, Dut, Labstation, Servo, ServoPlacement};
use crate::store::Transaction;
use crate::utils::validate_name;
use chrono::Utc;
use log::{debug, info, warn};

pub fn get_labstation(txn: &mut Transaction<'_>, hostname: &str) -> Result<Labstation> {
    txn.get(hostname)?
        .ok_or_else(|| FleetError::not_found(format!("Labstation {}", hostname)))
}

pub fn get_dut(txn: &mut Transaction<'_>, hostname: &str) -> Result<Dut> {
    txn.get(hostname)?
        .ok_or_else(|| FleetError::not_found(format!("DUT {}", hostname)))
}

/// Register a labstation. Its servo list starts empty and is filled by DUTs.
pub fn create_labstation(txn: &mut Transaction<'_>, request: &Labstation) -> Result<Labstation> {
    validate_name("hostname", &request.hostname)?;
    if !request.servos.is_empty() {
        return Err(FleetError::validation(format!(
            "servos of {} are attached through their DUTs, not on the labstation",
            request.hostname
        )));
    }
    if txn.get::<Labstation>(&request.hostname)?.is_some() {
        return Err(FleetError::conflict(format!(
            "Labstation {} already exists",
            request.hostname
        )));
    }

    let mut labstation = request.clone();
    labstation.update_time = Some(Utc::now());
    txn.put(&labstation)?;
    info!("Created labstation {}", labstation.hostname);
    Ok(labstation)
}

/// Remove a labstation no live DUT points at, together with its DHCP binding
pub fn delete_labstation(txn: &mut Transaction<'_>, hostname: &str) -> Result<Labstation> {
    let labstation = get_labstation(txn, hostname)?;

    let hosted: Vec<Dut> = txn.query(index::SERVO_HOSTNAME, hostname)?;
    if !hosted.is_empty() {
        let duts: Vec<&str> = hosted.iter().map(|dut| dut.hostname.as_str()).collect();
        return Err(FleetError::FailedPrecondition(format!(
            "labstation {} still hosts servos of: {}",
            hostname,
            duts.join(", ")
        )));
    }
    if !labstation.servos.is_empty() {
        warn!(
            "Deleting {} with {} stale servo entries",
            hostname,
            labstation.servos.len()
        );
    }

    txn.delete::<Labstation>(hostname)?;
    ip::release(txn, hostname)?;
    info!("Deleted labstation {}", hostname);
    Ok(labstation)
}

pub fn create_dut(txn: &mut Transaction<'_>, request: &Dut, config: &ServoConfig) -> Result<Dut> {
    validate_name("hostname", &request.hostname)?;
    if txn.get::<Dut>(&request.hostname)?.is_some() {
        return Err(FleetError::conflict(format!(
            "DUT {} already exists",
            request.hostname
        )));
    }

    let mut dut = request.clone();
    dut.servo = prepare_servo(dut.servo.take(), config)?;
    move_servo(txn, &dut.hostname, None, dut.servo.as_ref())?;

    dut.update_time = Some(Utc::now());
    txn.put(&dut)?;
    info!("Created DUT {} ({})", dut.hostname, placement_of(dut.servo.as_ref()));
    Ok(dut)
}

/// Apply `request` to the stored DUT through `mask` (empty mask replaces all
/// mutable fields) and move its servo if the placement changed.
pub fn update_dut(
    txn: &mut Transaction<'_>,
    hostname: &str,
    request: &Dut,
    mask: &[DutField],
    config: &ServoConfig,
) -> Result<Dut> {
    let current = get_dut(txn, hostname)?;

    let mut dut = merge_dut(&current, request, mask);
    dut.servo = prepare_servo(dut.servo.take(), config)?;
    move_servo(txn, hostname, current.servo.as_ref(), dut.servo.as_ref())?;

    dut.update_time = Some(Utc::now());
    txn.put(&dut)?;
    info!("Updated DUT {} ({})", hostname, placement_of(dut.servo.as_ref()));
    Ok(dut)
}

/// Remove a DUT, detach its servo and release its DHCP binding
pub fn delete_dut(txn: &mut Transaction<'_>, hostname: &str) -> Result<Dut> {
    let dut = get_dut(txn, hostname)?;
    move_servo(txn, hostname, dut.servo.as_ref(), None)?;
    txn.delete::<Dut>(hostname)?;
    ip::release(txn, hostname)?;
    info!("Deleted DUT {}", hostname);
    Ok(dut)
}

/// Bring labstation lists in line with a DUT's servo going from `old` to `new`.
///
/// Must run before the DUT itself is written: ownership checks read the
/// stored DUT indexes and skip `dut`.
fn move_servo(
    txn: &mut Transaction<'_>,
    dut: &str,
    old: Option<&Servo>,
    new: Option<&Servo>,
) -> Result<()> {
    let from = placement_of(old);
    let to = placement_of(new);

    match (from, new) {
        (_, Some(servo)) if servo.labstation().is_some() => {
            let target = servo.hostname.as_str();
            let mut labstation = get_labstation(txn, target)?;
            check_conflicts(txn, dut, servo)?;

            let previous_port = match (from, old) {
                (ServoPlacement::Labstation(host), Some(old)) if host == target => Some(old.port),
                (ServoPlacement::Labstation(host), Some(old)) => {
                    detach(txn, host, old.port)?;
                    None
                }
                _ => None,
            };

            let replaced = attach(&mut labstation, previous_port, servo);
            if previous_port.is_some() && !replaced {
                warn!("Servo of {} was missing from {}, re-adding it", dut, target);
            }
            labstation.update_time = Some(Utc::now());
            txn.put(&labstation)?;
            debug!("Servo of {}: {} -> {}", dut, from, to);
        }
        _ => match (from, old) {
            (ServoPlacement::Labstation(host), Some(old)) => {
                detach(txn, host, old.port)?;
                debug!("Servo of {}: {} -> {}", dut, from, to);
            }
            _ => debug!("Servo of {} needs no labstation bookkeeping ({} -> {})", dut, from, to),
        },
    }

    Ok(())
}

/// Put `servo` into the list, replacing the entry on `previous_port` in place.
/// Other entries clashing on port or tracked serial are stale and dropped.
/// Returns whether an entry was replaced.
fn attach(labstation: &mut Labstation, previous_port: Option<i32>, servo: &Servo) -> bool {
    let mut servos = Vec::with_capacity(labstation.servos.len() + 1);
    let mut replaced = false;

    for entry in labstation.servos.drain(..) {
        if !replaced && Some(entry.port) == previous_port {
            servos.push(servo.clone());
            replaced = true;
        } else if entry.port == servo.port
            || (servo.tracks_serial() && entry.tracks_serial() && entry.serial == servo.serial)
        {
            // Ownership was checked against live DUTs, so this entry has none.
            warn!(
                "Dropping stale servo entry (port {}, serial '{}') of {}",
                entry.port, entry.serial, labstation.hostname
            );
        } else {
            servos.push(entry);
        }
    }

    if !replaced {
        servos.push(servo.clone());
    }
    labstation.servos = servos;
    replaced
}

/// Drop the entry on `port` from `hostname`'s list
fn detach(txn: &mut Transaction<'_>, hostname: &str, port: i32) -> Result<()> {
    let Some(mut labstation) = txn.get::<Labstation>(hostname)? else {
        warn!("Labstation {} is gone, nothing to detach from port {}", hostname, port);
        return Ok(());
    };

    let before = labstation.servos.len();
    labstation.servos.retain(|servo| servo.port != port);
    if labstation.servos.len() == before {
        warn!("No servo entry on port {} of {}", port, hostname);
        return Ok(());
    }

    labstation.update_time = Some(Utc::now());
    txn.put(&labstation)
}
