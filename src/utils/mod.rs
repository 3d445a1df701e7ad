//! Shared utilities: IPv4 helpers and input validation.

pub mod ip_utils;
pub mod validation;

pub use ip_utils::{is_valid_ipv4, offset_ipv4, parse_ipv4, parse_optional_ipv4};
pub use validation::{normalize_mac, validate_name};
