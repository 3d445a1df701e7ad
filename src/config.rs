use serde::{Deserialize, Serialize};

/// Top-level configuration structure that mirrors the YAML configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// General settings
    pub general: GeneralConfig,
    /// Address allocation policy
    pub network: NetworkConfig,
    /// Servo port policy
    pub servo: ServoConfig,
    /// Snapshot location for the bundled store
    pub store: StoreConfig,
}

/// General settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Default log filter when RUST_LOG is not set (e.g., "info", "debug")
    pub log_level: String,
}

/// Address allocation policy for newly created vlans
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Addresses after the network address that are never offered as free
    pub reserved_ip_count: u32,
    /// Smallest accepted prefix length; larger blocks are rejected
    pub min_prefix_len: u8,
}

/// Servo port policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServoConfig {
    pub port_min: i32,
    pub port_max: i32,
    /// Port assigned when a labstation-hosted servo has no port
    pub default_port: i32,
}

/// Store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON snapshot read before and written after each CLI command
    pub snapshot: String,
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid general configuration: {0}")]
    InvalidGeneral(String),
    #[error("Invalid network configuration: {0}")]
    InvalidNetwork(String),
    #[error("Invalid servo configuration: {0}")]
    InvalidServo(String),
}

impl FleetConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.general.log_level.trim().is_empty() {
            return Err(ConfigError::InvalidGeneral(
                "log_level cannot be empty".to_string(),
            ));
        }

        if self.network.min_prefix_len > 32 {
            return Err(ConfigError::InvalidNetwork(format!(
                "min_prefix_len {} is not a valid IPv4 prefix length",
                self.network.min_prefix_len
            )));
        }

        let servo = &self.servo;
        if servo.port_min <= 0 || servo.port_min > servo.port_max {
            return Err(ConfigError::InvalidServo(format!(
                "port range [{}, {}] is empty or negative",
                servo.port_min, servo.port_max
            )));
        }
        if !servo.port_in_range(servo.default_port) {
            return Err(ConfigError::InvalidServo(format!(
                "default_port {} is outside [{}, {}]",
                servo.default_port, servo.port_min, servo.port_max
            )));
        }

        Ok(())
    }
}

impl ServoConfig {
    pub fn port_in_range(&self, port: i32) -> bool {
        (self.port_min..=self.port_max).contains(&port)
    }
}

/// Default implementations
impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            reserved_ip_count: 10,
            min_prefix_len: 16,
        }
    }
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            port_min: 9900,
            port_max: 9999,
            default_port: 9999,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            snapshot: "labfleet.json".to_string(),
        }
    }
}
