//! Field-mask driven partial updates.
//!
//! Each updatable record has an enum of the paths a caller may name. Parsing a
//! mask maps every path string onto that enum up front, so unsupported paths
//! fail before any record is read, and merges are exhaustive matches that build
//! a new value from the stored record and the request.

use crate::error::{FleetError, Result};
use crate::model::{Dut, Servo, Vlan};
use std::str::FromStr;

/// Parse mask paths; blank entries are ignored and duplicates collapsed
pub fn parse_mask<P>(paths: &[String]) -> Result<Vec<P>>
where
    P: FromStr<Err = FleetError> + PartialEq,
{
    let mut fields = Vec::new();
    for path in paths.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
        let field: P = path.parse()?;
        if !fields.contains(&field) {
            fields.push(field);
        }
    }
    Ok(fields)
}

fn unsupported(kind: &str, path: &str) -> FleetError {
    FleetError::validation(format!("unsupported update mask path '{}' for {}", path, kind))
}

/// Updatable vlan paths. Only the free range may change after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VlanField {
    FreeStartIp,
    FreeEndIp,
}

impl FromStr for VlanField {
    type Err = FleetError;

    fn from_str(path: &str) -> Result<Self> {
        match path {
            "free_start_ip" => Ok(VlanField::FreeStartIp),
            "free_end_ip" => Ok(VlanField::FreeEndIp),
            "cidr_block" => Err(FleetError::validation(
                "cidr_block cannot be changed once the vlan exists",
            )),
            other => Err(unsupported("vlan", other)),
        }
    }
}

/// Build the updated vlan. An empty mask takes both free-range bounds from
/// `request` and rejects any attempt to change the CIDR.
pub fn merge_vlan(current: &Vlan, request: &Vlan, mask: &[VlanField]) -> Result<Vlan> {
    let mut next = current.clone();
    if mask.is_empty() {
        let requested_cidr = request.cidr_block.trim();
        if !requested_cidr.is_empty() && requested_cidr != current.cidr_block {
            return Err(FleetError::validation(format!(
                "cidr_block of vlan {} is {} and cannot be changed to {}",
                current.name, current.cidr_block, requested_cidr
            )));
        }
        next.free_start_ip = request.free_start_ip.clone();
        next.free_end_ip = request.free_end_ip.clone();
        return Ok(next);
    }

    for field in mask {
        match field {
            VlanField::FreeStartIp => next.free_start_ip = request.free_start_ip.clone(),
            VlanField::FreeEndIp => next.free_end_ip = request.free_end_ip.clone(),
        }
    }
    Ok(next)
}

/// Updatable DUT paths
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DutField {
    Machine,
    Pools,
    /// The whole servo value
    Servo,
    ServoHostname,
    ServoPort,
    ServoSerial,
    ServoDockerContainer,
    ServoSetupType,
}

impl FromStr for DutField {
    type Err = FleetError;

    fn from_str(path: &str) -> Result<Self> {
        match path {
            "machine" => Ok(DutField::Machine),
            "pools" => Ok(DutField::Pools),
            "servo" => Ok(DutField::Servo),
            "servo.hostname" => Ok(DutField::ServoHostname),
            "servo.port" => Ok(DutField::ServoPort),
            "servo.serial" => Ok(DutField::ServoSerial),
            "servo.docker_container_name" => Ok(DutField::ServoDockerContainer),
            "servo.setup_type" => Ok(DutField::ServoSetupType),
            other => Err(unsupported("dut", other)),
        }
    }
}

/// Build the updated DUT. The hostname never changes.
///
/// A merged servo with neither a hostname nor a container means "no servo".
pub fn merge_dut(current: &Dut, request: &Dut, mask: &[DutField]) -> Dut {
    let mut next = current.clone();
    if mask.is_empty() {
        next.machine = request.machine.clone();
        next.pools = request.pools.clone();
        next.servo = request.servo.clone();
    } else {
        let requested = request.servo.clone().unwrap_or_default();
        for field in mask {
            match field {
                DutField::Machine => next.machine = request.machine.clone(),
                DutField::Pools => next.pools = request.pools.clone(),
                DutField::Servo => next.servo = request.servo.clone(),
                DutField::ServoHostname => {
                    servo_of(&mut next).hostname = requested.hostname.clone()
                }
                DutField::ServoPort => servo_of(&mut next).port = requested.port,
                DutField::ServoSerial => servo_of(&mut next).serial = requested.serial.clone(),
                DutField::ServoDockerContainer => {
                    servo_of(&mut next).docker_container_name =
                        requested.docker_container_name.clone()
                }
                DutField::ServoSetupType => servo_of(&mut next).setup_type = requested.setup_type,
            }
        }
    }

    if next.servo.as_ref().is_some_and(Servo::is_unset) {
        next.servo = None;
    }
    next
}

fn servo_of(dut: &mut Dut) -> &mut Servo {
    dut.servo.get_or_insert_with(Servo::default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ServoSetupType;

    fn mask<P: FromStr<Err = FleetError> + PartialEq>(paths: &[&str]) -> Result<Vec<P>> {
        let paths: Vec<String> = paths.iter().map(|p| p.to_string()).collect();
        parse_mask(&paths)
    }

    fn vlan() -> Vlan {
        Vlan {
            name: "v1".to_string(),
            cidr_block: "10.0.0.0/24".to_string(),
            capacity: 254,
            free_start_ip: "10.0.0.11".to_string(),
            free_end_ip: "10.0.0.254".to_string(),
            reserved_ips: Vec::new(),
            zone: None,
            realm: None,
            description: String::new(),
            update_time: None,
        }
    }

    #[test]
    fn test_parse_mask() {
        let fields: Vec<DutField> = mask(&["servo.port", " servo.port ", "", "pools"]).unwrap();
        assert_eq!(fields, vec![DutField::ServoPort, DutField::Pools]);

        assert!(mask::<DutField>(&["servo.voltage"]).is_err());
        let err = mask::<VlanField>(&["cidr_block"]).unwrap_err();
        assert!(err.to_string().contains("cannot be changed"));
    }

    #[test]
    fn test_merge_vlan_free_range() {
        let mut request = vlan();
        request.free_start_ip = "10.0.0.20".to_string();
        request.free_end_ip = "10.0.0.30".to_string();

        let merged = merge_vlan(&vlan(), &request, &[VlanField::FreeStartIp]).unwrap();
        assert_eq!(merged.free_start_ip, "10.0.0.20");
        assert_eq!(merged.free_end_ip, "10.0.0.254");

        request.cidr_block = "10.0.0.0/23".to_string();
        assert!(merge_vlan(&vlan(), &request, &[]).is_err());
    }

    #[test]
    fn test_merge_dut_servo_paths() {
        let current = Dut::new("D1").with_servo(Servo::on_labstation("L1", 9999, "s1"));
        let request = Dut::new("D1").with_servo(Servo::on_labstation("L2", 9988, "ignored"));

        let merged = merge_dut(&current, &request, &[DutField::ServoHostname, DutField::ServoPort]);
        let servo = merged.servo.unwrap();
        assert_eq!(servo.hostname, "L2");
        assert_eq!(servo.port, 9988);
        assert_eq!(servo.serial, "s1");
        // stored record is untouched
        assert_eq!(current.servo.as_ref().unwrap().hostname, "L1");
    }

    #[test]
    fn test_merge_dut_clears_servo() {
        let current = Dut::new("D1").with_servo(Servo::on_labstation("L1", 9999, "s1"));
        let merged = merge_dut(&current, &Dut::new("D1"), &[DutField::ServoHostname]);
        assert_eq!(merged.servo, None);

        let merged = merge_dut(&current, &Dut::new("D1"), &[DutField::Servo]);
        assert_eq!(merged.servo, None);
    }

    #[test]
    fn test_merge_dut_full_replace() {
        let current = Dut::new("D1");
        let mut request = Dut::new("other-name");
        request.pools = vec!["DUT_POOL_QUOTA".to_string()];
        let mut servo = Servo::in_container("servod-d1");
        servo.setup_type = ServoSetupType::DualV4;
        request.servo = Some(servo.clone());

        let merged = merge_dut(&current, &request, &[]);
        assert_eq!(merged.hostname, "D1");
        assert_eq!(merged.pools, vec!["DUT_POOL_QUOTA".to_string()]);
        assert_eq!(merged.servo, Some(servo));
    }
}
