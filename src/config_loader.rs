use crate::config::FleetConfig;
use color_eyre::Result;
use log::{info, warn};
use std::fs::File;
use std::path::Path;

/// Load and parse configuration from a YAML file
pub fn load_config(config_path: &Path) -> Result<FleetConfig> {
    info!("Loading configuration from: {:?}", config_path);

    let file = File::open(config_path)?;
    let config: FleetConfig = serde_yaml::from_reader(file)?;

    config.validate()?;

    Ok(config)
}

/// Load the configuration if a path was given, otherwise fall back to defaults
pub fn load_or_default(config_path: Option<&Path>) -> Result<FleetConfig> {
    match config_path {
        Some(path) => load_config(path),
        None => {
            warn!("No configuration file given, using built-in defaults");
            Ok(FleetConfig::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config() {
        let yaml = r#"
general:
  log_level: debug
network:
  reserved_ip_count: 10
servo:
  port_min: 9900
  port_max: 9999
  default_port: 9999
store:
  snapshot: "/tmp/fleet.json"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", yaml).unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.store.snapshot, "/tmp/fleet.json");
    }

    #[test]
    fn test_load_invalid_config() {
        let yaml = r#"
servo:
  port_min: 9999
  port_max: 9900
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", yaml).unwrap();

        assert!(load_config(temp_file.path()).is_err());
    }

    #[test]
    fn test_load_or_default() {
        let config = load_or_default(None).unwrap();
        assert_eq!(config.network.reserved_ip_count, 10);
    }
}
