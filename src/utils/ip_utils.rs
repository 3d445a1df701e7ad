//! IPv4 helpers shared by the parser and the allocator.

use crate::error::{FleetError, Result};
use std::net::Ipv4Addr;

/// Check if a string is a valid IPv4 address
pub fn is_valid_ipv4(ip: &str) -> bool {
    ip.parse::<Ipv4Addr>().is_ok()
}

/// Parse a dotted-quad address, naming `field` in the error
pub fn parse_ipv4(field: &str, ip: &str) -> Result<Ipv4Addr> {
    ip.trim()
        .parse::<Ipv4Addr>()
        .map_err(|_| FleetError::validation(format!("{} '{}' is not a valid IPv4 address", field, ip)))
}

/// Parse an optional override; the empty string means "not set"
pub fn parse_optional_ipv4(field: &str, ip: &str) -> Result<Option<Ipv4Addr>> {
    if ip.trim().is_empty() {
        Ok(None)
    } else {
        parse_ipv4(field, ip).map(Some)
    }
}

/// Address `offset` positions after `base`, if it does not overflow
pub fn offset_ipv4(base: Ipv4Addr, offset: u32) -> Option<Ipv4Addr> {
    u32::from(base).checked_add(offset).map(Ipv4Addr::from)
}
