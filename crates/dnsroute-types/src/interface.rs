//! Immutable network interface snapshot.

use crate::ip::{IpAddress, IpFamily};
use std::collections::BTreeSet;
use std::fmt;

/// Point-in-time view of one network interface.
///
/// Snapshots are never mutated in place: every transformation returns a new
/// value, so a snapshot handed to another component stays consistent while
/// the tracker moves on to the next one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceConfig {
    is_up: bool,
    is_ptp: bool,
    local_ips: BTreeSet<IpAddress>,
    remote_ips: BTreeSet<IpAddress>,
}

impl InterfaceConfig {
    pub fn is_up(&self) -> bool {
        self.is_up
    }

    /// Returns true for point-to-point links (tunnels, ppp).
    pub fn is_ptp(&self) -> bool {
        self.is_ptp
    }

    pub fn local_ips(&self) -> &BTreeSet<IpAddress> {
        &self.local_ips
    }

    /// Peer addresses for point-to-point links, broadcast addresses otherwise.
    pub fn remote_ips(&self) -> &BTreeSet<IpAddress> {
        &self.remote_ips
    }

    pub fn add_local_ip(&self, ip: IpAddress) -> Self {
        let mut local_ips = self.local_ips.clone();
        local_ips.insert(ip);
        Self {
            local_ips,
            ..self.clone()
        }
    }

    pub fn del_local_ip(&self, ip: &IpAddress) -> Self {
        let mut local_ips = self.local_ips.clone();
        local_ips.remove(ip);
        Self {
            local_ips,
            ..self.clone()
        }
    }

    pub fn add_remote_ip(&self, ip: IpAddress) -> Self {
        let mut remote_ips = self.remote_ips.clone();
        remote_ips.insert(ip);
        Self {
            remote_ips,
            ..self.clone()
        }
    }

    pub fn del_remote_ip(&self, ip: &IpAddress) -> Self {
        let mut remote_ips = self.remote_ips.clone();
        remote_ips.remove(ip);
        Self {
            remote_ips,
            ..self.clone()
        }
    }

    /// Returns a copy with the up/down state replaced.
    pub fn set_state(&self, is_up: bool) -> Self {
        Self {
            is_up,
            ..self.clone()
        }
    }

    /// Returns a copy with the link type replaced.
    pub fn set_type(&self, is_ptp: bool) -> Self {
        Self {
            is_ptp,
            ..self.clone()
        }
    }

    /// At least one non link-local IPv4 address is assigned.
    pub fn is_ipv4_avail(&self) -> bool {
        self.has_global_local(IpFamily::V4)
    }

    /// At least one non link-local IPv6 address is assigned.
    pub fn is_ipv6_avail(&self) -> bool {
        self.has_global_local(IpFamily::V6)
    }

    /// Whether a route of `family` can be pushed through this interface.
    ///
    /// Point-to-point links only need to be up; broadcast links also need a
    /// usable local address of the same family.
    pub fn is_routable(&self, family: IpFamily) -> bool {
        if !self.is_up {
            return false;
        }
        if self.is_ptp {
            return true;
        }
        match family {
            IpFamily::V4 => self.is_ipv4_avail(),
            IpFamily::V6 => self.is_ipv6_avail(),
        }
    }

    fn has_global_local(&self, family: IpFamily) -> bool {
        self.local_ips
            .iter()
            .any(|ip| ip.family() == Some(family) && !ip.is_link_local())
    }
}

impl fmt::Display for InterfaceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}",
            if self.is_up { "up" } else { "down" },
            if self.is_ptp { "ptp" } else { "broadcast" }
        )?;
        for ip in &self.local_ips {
            write!(f, " local={}", ip)?;
        }
        for ip in &self.remote_ips {
            write!(f, " remote={}", ip)?;
        }
        Ok(())
    }
}
