//! IP address type with an explicit invalid state.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Length of an IPv4 address payload in bytes.
pub const IPV4_ADDR_LEN: usize = 4;
/// Length of an IPv6 address payload in bytes.
pub const IPV6_ADDR_LEN: usize = 16;

/// Address family of a valid [`IpAddress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    /// Host-route prefix length for this family (/32 or /128).
    pub const fn host_prefix_len(&self) -> u8 {
        match self {
            IpFamily::V4 => 32,
            IpFamily::V6 => 128,
        }
    }
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpFamily::V4 => f.write_str("IPv4"),
            IpFamily::V6 => f.write_str("IPv6"),
        }
    }
}

/// An IPv4 or IPv6 address, or an invalid placeholder.
///
/// The derived ordering is the one the route tables rely on: every invalid
/// address sorts before every IPv4 address, every IPv4 address before every
/// IPv6 address, and addresses of one family compare byte by byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum IpAddress {
    #[default]
    Invalid,
    V4(Ipv4Addr),
    V6(Ipv6Addr),
}

impl IpAddress {
    /// Builds an address from a raw payload (netlink attribute, protobuf rdata).
    ///
    /// A 4 byte payload is IPv4, a 16 byte payload is IPv6; anything else
    /// yields [`IpAddress::Invalid`].
    pub fn from_octets(bytes: &[u8]) -> Self {
        if let Ok(v4) = <[u8; IPV4_ADDR_LEN]>::try_from(bytes) {
            IpAddress::V4(Ipv4Addr::from(v4))
        } else if let Ok(v6) = <[u8; IPV6_ADDR_LEN]>::try_from(bytes) {
            IpAddress::V6(Ipv6Addr::from(v6))
        } else {
            IpAddress::Invalid
        }
    }

    pub const fn is_valid(&self) -> bool {
        !matches!(self, IpAddress::Invalid)
    }

    /// Returns the family, or `None` for an invalid address.
    pub const fn family(&self) -> Option<IpFamily> {
        match self {
            IpAddress::Invalid => None,
            IpAddress::V4(_) => Some(IpFamily::V4),
            IpAddress::V6(_) => Some(IpFamily::V6),
        }
    }

    /// Returns true for 169.254.0.0/16 and fe80::/10.
    pub fn is_link_local(&self) -> bool {
        match self {
            IpAddress::Invalid => false,
            IpAddress::V4(addr) => addr.is_link_local(),
            IpAddress::V6(addr) => (addr.segments()[0] & 0xffc0) == 0xfe80,
        }
    }
}

impl fmt::Display for IpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpAddress::Invalid => f.write_str("invalid"),
            IpAddress::V4(addr) => addr.fmt(f),
            IpAddress::V6(addr) => addr.fmt(f),
        }
    }
}

impl FromStr for IpAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<IpAddr>()
            .map(IpAddress::from)
            .map_err(|_| ParseError::InvalidIpAddress(s.to_string()))
    }
}

impl TryFrom<String> for IpAddress {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<IpAddress> for String {
    fn from(ip: IpAddress) -> Self {
        ip.to_string()
    }
}

impl From<IpAddr> for IpAddress {
    fn from(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(v4) => IpAddress::V4(v4),
            IpAddr::V6(v6) => IpAddress::V6(v6),
        }
    }
}

impl From<Ipv4Addr> for IpAddress {
    fn from(addr: Ipv4Addr) -> Self {
        IpAddress::V4(addr)
    }
}

impl From<Ipv6Addr> for IpAddress {
    fn from(addr: Ipv6Addr) -> Self {
        IpAddress::V6(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_from_octets() {
        assert_eq!(
            IpAddress::from_octets(&[10, 0, 0, 1]),
            IpAddress::V4(Ipv4Addr::new(10, 0, 0, 1))
        );
        let v6 = IpAddress::from_octets(&Ipv6Addr::LOCALHOST.octets());
        assert_eq!(v6, IpAddress::V6(Ipv6Addr::LOCALHOST));
        assert_eq!(IpAddress::from_octets(&[1, 2, 3]), IpAddress::Invalid);
        assert_eq!(IpAddress::from_octets(&[]), IpAddress::Invalid);
    }

    #[test]
    fn test_total_order() {
        let invalid = IpAddress::Invalid;
        let low_v4: IpAddress = "1.2.3.4".parse().unwrap();
        let high_v4: IpAddress = "255.0.0.0".parse().unwrap();
        let low_v6: IpAddress = "::1".parse().unwrap();
        let high_v6: IpAddress = "2001:db8::1".parse().unwrap();

        let mut all = vec![high_v6, low_v4, invalid, low_v6, high_v4];
        all.sort();
        assert_eq!(all, vec![invalid, low_v4, high_v4, low_v6, high_v6]);
    }

    #[test]
    fn test_v4_sorts_before_any_v6() {
        let v4: IpAddress = "255.255.255.255".parse().unwrap();
        let v6: IpAddress = "::".parse().unwrap();
        assert!(v4 < v6);
    }

    #[test]
    fn test_family_and_validity() {
        let v4: IpAddress = "192.168.1.1".parse().unwrap();
        assert!(v4.is_valid());
        assert_eq!(v4.family(), Some(IpFamily::V4));
        assert_eq!(IpAddress::Invalid.family(), None);
        assert!(!IpAddress::default().is_valid());
    }

    #[test]
    fn test_link_local() {
        assert!("169.254.10.1".parse::<IpAddress>().unwrap().is_link_local());
        assert!("fe80::1".parse::<IpAddress>().unwrap().is_link_local());
        assert!(!"10.0.0.1".parse::<IpAddress>().unwrap().is_link_local());
        assert!(!"2001:db8::1".parse::<IpAddress>().unwrap().is_link_local());
        assert!(!IpAddress::Invalid.is_link_local());
    }

    #[test]
    fn test_display() {
        assert_eq!("10.1.2.3".parse::<IpAddress>().unwrap().to_string(), "10.1.2.3");
        assert_eq!(IpAddress::Invalid.to_string(), "invalid");
    }

    #[test]
    fn test_parse_error() {
        assert!("not-an-ip".parse::<IpAddress>().is_err());
    }

    #[test]
    fn test_host_prefix_len() {
        assert_eq!(IpFamily::V4.host_prefix_len(), 32);
        assert_eq!(IpFamily::V6.host_prefix_len(), 128);
    }
}
