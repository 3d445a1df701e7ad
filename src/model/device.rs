use super::index;
use crate::error::FleetError;
use crate::store::Entity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Physical servo arrangement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServoSetupType {
    #[default]
    Regular,
    DualV4,
    /// Servo v3 boards identify themselves by host; serials are not tracked
    V3,
}

impl FromStr for ServoSetupType {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "regular" | "" => Ok(ServoSetupType::Regular),
            "dual_v4" | "dualv4" => Ok(ServoSetupType::DualV4),
            "v3" => Ok(ServoSetupType::V3),
            other => Err(FleetError::validation(format!(
                "unknown servo setup type '{}'",
                other
            ))),
        }
    }
}

/// Peripheral-control descriptor linking a DUT to its Labstation or container
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Servo {
    /// Hosting Labstation, or the docker host when containerized
    #[serde(default)]
    pub hostname: String,
    /// 0 means unset
    #[serde(default)]
    pub port: i32,
    #[serde(default)]
    pub serial: String,
    #[serde(default)]
    pub docker_container_name: String,
    #[serde(default)]
    pub setup_type: ServoSetupType,
}

/// Where a servo lives, as far as labstation bookkeeping is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServoPlacement<'a> {
    Unassigned,
    Container,
    Labstation(&'a str),
}

impl fmt::Display for ServoPlacement<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServoPlacement::Unassigned => write!(f, "unassigned"),
            ServoPlacement::Container => write!(f, "containerized"),
            ServoPlacement::Labstation(host) => write!(f, "labstation {}", host),
        }
    }
}

impl Servo {
    pub fn on_labstation(hostname: &str, port: i32, serial: &str) -> Self {
        Self {
            hostname: hostname.to_string(),
            port,
            serial: serial.to_string(),
            ..Default::default()
        }
    }

    pub fn in_container(container: &str) -> Self {
        Self {
            docker_container_name: container.to_string(),
            ..Default::default()
        }
    }

    pub fn is_containerized(&self) -> bool {
        !self.docker_container_name.is_empty()
    }

    /// Neither hosted nor containerized
    pub fn is_unset(&self) -> bool {
        self.hostname.is_empty() && self.docker_container_name.is_empty()
    }

    pub fn placement(&self) -> ServoPlacement<'_> {
        if self.is_containerized() {
            ServoPlacement::Container
        } else if self.hostname.is_empty() {
            ServoPlacement::Unassigned
        } else {
            ServoPlacement::Labstation(&self.hostname)
        }
    }

    /// Labstation hosting this servo, if any
    pub fn labstation(&self) -> Option<&str> {
        match self.placement() {
            ServoPlacement::Labstation(host) => Some(host),
            _ => None,
        }
    }

    /// Serial uniqueness only applies to legacy, labstation-hosted, non-v3 servos
    pub fn tracks_serial(&self) -> bool {
        self.labstation().is_some()
            && !self.serial.is_empty()
            && self.setup_type != ServoSetupType::V3
    }

    pub fn servo_id(labstation: &str, port: i32) -> String {
        format!("{}:{}", labstation, port)
    }

    pub fn serial_key(labstation: &str, serial: &str) -> String {
        format!("{}:{}", labstation, serial)
    }
}

/// Placement of an optional servo field
pub fn placement_of(servo: Option<&Servo>) -> ServoPlacement<'_> {
    servo.map_or(ServoPlacement::Unassigned, Servo::placement)
}

/// Device under test
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Dut {
    pub hostname: String,
    /// Asset tag of the backing machine
    #[serde(default)]
    pub machine: String,
    #[serde(default)]
    pub pools: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub servo: Option<Servo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
}

impl Dut {
    pub fn new(hostname: &str) -> Self {
        Self {
            hostname: hostname.to_string(),
            ..Default::default()
        }
    }

    pub fn with_servo(mut self, servo: Servo) -> Self {
        self.servo = Some(servo);
        self
    }
}

impl Entity for Dut {
    const KIND: &'static str = "dut";

    fn key(&self) -> String {
        self.hostname.clone()
    }

    // Secondary index backing the labstation servo lists: owner lookups go through these.
    fn indexes(&self) -> Vec<(&'static str, String)> {
        let Some(servo) = &self.servo else {
            return Vec::new();
        };
        let Some(labstation) = servo.labstation() else {
            return Vec::new();
        };
        let mut indexes = vec![
            (index::SERVO_HOSTNAME, labstation.to_string()),
            (index::SERVO_ID, Servo::servo_id(labstation, servo.port)),
        ];
        if servo.tracks_serial() {
            indexes.push((index::SERVO_SERIAL, Servo::serial_key(labstation, &servo.serial)));
        }
        indexes
    }
}

/// Host that physically serves servo connections for one or more DUTs
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Labstation {
    pub hostname: String,
    #[serde(default)]
    pub machine: String,
    #[serde(default)]
    pub pools: Vec<String>,
    /// One entry per hosted DUT, in attach order
    #[serde(default)]
    pub servos: Vec<Servo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
}

impl Labstation {
    pub fn new(hostname: &str) -> Self {
        Self {
            hostname: hostname.to_string(),
            ..Default::default()
        }
    }

    pub fn servo_on_port(&self, port: i32) -> Option<&Servo> {
        self.servos.iter().find(|servo| servo.port == port)
    }
}

impl Entity for Labstation {
    const KIND: &'static str = "labstation";

    fn key(&self) -> String {
        self.hostname.clone()
    }
}
