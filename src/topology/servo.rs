//! Servo descriptor normalization and uniqueness checks.
//!
//! Ownership of a `(labstation, port)` or `(labstation, serial)` pair is looked
//! up through the DUT indexes, never through the labstation's own list, so a
//! stale list entry cannot block a new servo.

use crate::config::ServoConfig;
use crate::error::{FleetError, Result};
use crate::model::{index, Dut, Servo};
use crate::store::Transaction;
use crate::utils::validate_name;
use log::debug;

/// Clean up a requested servo before any labstation is touched.
///
/// An unset servo becomes `None`; a labstation-hosted servo without a port gets
/// the default port. The result is validated.
pub fn prepare_servo(servo: Option<Servo>, config: &ServoConfig) -> Result<Option<Servo>> {
    let Some(mut servo) = servo.filter(|servo| !servo.is_unset()) else {
        return Ok(None);
    };

    if servo.labstation().is_some() && servo.port == 0 {
        debug!(
            "Servo on {} has no port, using default {}",
            servo.hostname, config.default_port
        );
        servo.port = config.default_port;
    }

    validate_servo(&servo, config)?;
    Ok(Some(servo))
}

/// Port and hostname rules for a single servo
pub fn validate_servo(servo: &Servo, config: &ServoConfig) -> Result<()> {
    if servo.port < 0 {
        return Err(FleetError::validation(format!(
            "servo port {} is negative",
            servo.port
        )));
    }

    if let Some(labstation) = servo.labstation() {
        validate_name("servo hostname", labstation)?;
        if !config.port_in_range(servo.port) {
            return Err(FleetError::validation(format!(
                "servo port {} on {} is outside [{}, {}]",
                servo.port, labstation, config.port_min, config.port_max
            )));
        }
    }

    Ok(())
}

fn other_owner(
    txn: &mut Transaction<'_>,
    property: &str,
    value: &str,
    dut: &str,
) -> Result<Option<String>> {
    let owners: Vec<Dut> = txn.query(property, value)?;
    Ok(owners
        .into_iter()
        .map(|owner| owner.hostname)
        .find(|owner| owner != dut))
}

/// DUT other than `dut` whose servo sits on `port` of `labstation`
pub fn port_owner(
    txn: &mut Transaction<'_>,
    labstation: &str,
    port: i32,
    dut: &str,
) -> Result<Option<String>> {
    other_owner(txn, index::SERVO_ID, &Servo::servo_id(labstation, port), dut)
}

/// DUT other than `dut` whose servo uses `serial` on `labstation`
pub fn serial_owner(
    txn: &mut Transaction<'_>,
    labstation: &str,
    serial: &str,
    dut: &str,
) -> Result<Option<String>> {
    other_owner(txn, index::SERVO_SERIAL, &Servo::serial_key(labstation, serial), dut)
}

/// Reject `servo` if another DUT already holds its port or tracked serial.
/// Port clashes are reported first.
pub fn check_conflicts(txn: &mut Transaction<'_>, dut: &str, servo: &Servo) -> Result<()> {
    let Some(labstation) = servo.labstation() else {
        return Ok(());
    };

    if let Some(owner) = port_owner(txn, labstation, servo.port, dut)? {
        return Err(FleetError::conflict(format!(
            "Port: {} in {} is already in use by {}",
            servo.port, labstation, owner
        )));
    }

    if servo.tracks_serial() {
        if let Some(owner) = serial_owner(txn, labstation, &servo.serial, dut)? {
            return Err(FleetError::conflict(format!(
                "Serial: {} in {} is already in use by {}",
                servo.serial, labstation, owner
            )));
        }
    }

    Ok(())
}
