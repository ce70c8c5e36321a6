//! Value types shared by the dnsroute daemon components.
//!
//! - [`IpAddress`]: IPv4 / IPv6 address with an explicit invalid state
//! - [`IpFamily`]: address family discriminant
//! - [`InterfaceConfig`]: immutable point-in-time snapshot of a network interface

mod interface;
mod ip;

pub use interface::InterfaceConfig;
pub use ip::{IpAddress, IpFamily};

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid IP address format: {0}")]
    InvalidIpAddress(String),
}
