//! Input validation for host names and MAC addresses.

use crate::error::{FleetError, Result};
use regex::Regex;
use std::sync::LazyLock;

static HOSTNAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9](?:[A-Za-z0-9._-]{0,251}[A-Za-z0-9])?$").expect("Invalid hostname regex")
});

static MAC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[0-9A-Fa-f]{2}[:-]){5}[0-9A-Fa-f]{2}$|^[0-9A-Fa-f]{12}$").expect("Invalid MAC regex")
});

/// Check that a host or vlan name is usable as a record key
///
/// # Examples
/// ```
/// use labfleet::utils::validation::validate_name;
///
/// assert!(validate_name("hostname", "chromeos6-row2-rack3-host4").is_ok());
/// assert!(validate_name("hostname", "").is_err());
/// assert!(validate_name("hostname", "bad host").is_err());
/// ```
pub fn validate_name(field: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(FleetError::validation(format!("{} cannot be empty", field)));
    }
    if !HOSTNAME_PATTERN.is_match(name) {
        return Err(FleetError::validation(format!(
            "{} '{}' contains invalid characters",
            field, name
        )));
    }
    Ok(())
}

/// Normalize a MAC address to lower-case, colon-separated form.
/// The empty string is passed through: not every host has a known MAC.
///
/// # Examples
/// ```
/// use labfleet::utils::validation::normalize_mac;
///
/// assert_eq!(normalize_mac("AA-BB-CC-00-11-22").unwrap(), "aa:bb:cc:00:11:22");
/// assert_eq!(normalize_mac("aabbcc001122").unwrap(), "aa:bb:cc:00:11:22");
/// assert_eq!(normalize_mac("").unwrap(), "");
/// assert!(normalize_mac("aa:bb:cc").is_err());
/// ```
pub fn normalize_mac(mac: &str) -> Result<String> {
    let mac = mac.trim();
    if mac.is_empty() {
        return Ok(String::new());
    }
    if !MAC_PATTERN.is_match(mac) {
        return Err(FleetError::validation(format!("invalid MAC address '{}'", mac)));
    }

    let hex: String = mac
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .map(|c| c.to_ascii_lowercase())
        .collect();
    let octets: Vec<&str> = (0..6).map(|i| &hex[i * 2..i * 2 + 2]).collect();
    Ok(octets.join(":"))
}
