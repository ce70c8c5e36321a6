//! Configuration file support for dnsrouted
//!
//! Loads and validates daemon configuration from TOML files.
//! Default location: /etc/dnsroute/dnsrouted.toml

use crate::error::{Result, RoutedError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/dnsroute/dnsrouted.toml";

/// Linux IFNAMSIZ minus the trailing NUL
const MAX_IFNAME_LEN: usize = 15;

/// Upper bound of the grace period added to DNS TTLs
pub const MAX_EXTRA_TTL_SECS: u64 = 86_400;

/// Managed interface configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceSection {
    /// Name of the interface routes are steered to
    #[serde(default = "default_interface_name")]
    pub name: String,
}

/// Route attributes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingSection {
    /// Priority of the regular unicast routes
    #[serde(default = "default_metric")]
    pub metric: u32,

    /// Priority of the blackhole (killswitch) routes, must exceed `metric`
    #[serde(default = "default_killswitch_metric")]
    pub killswitch_metric: u32,

    /// Gateway for IPv4 routes on broadcast interfaces
    #[serde(default)]
    pub ipv4_gateway: Option<Ipv4Addr>,

    /// Gateway for IPv6 routes on broadcast interfaces
    #[serde(default)]
    pub ipv6_gateway: Option<Ipv6Addr>,

    /// Seconds added to every DNS TTL before a route may expire
    #[serde(default = "default_extra_ttl")]
    pub extra_ttl_secs: u64,
}

/// Periodic management cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagementSection {
    /// Seconds between management ticks
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Upper bound of expired routes removed per tick, in percent of active routes
    #[serde(default = "default_sweep_percent")]
    pub sweep_percent: u32,

    /// Re-pushes before a pending route is considered installed
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Sleep slice of the management thread in milliseconds
    #[serde(default = "default_sleep_step")]
    pub sleep_step_ms: u64,
}

/// Netlink socket tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetlinkSection {
    /// Bounded wait for socket readiness in milliseconds
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_ms: u16,

    /// Receive buffer size of the tracker socket in bytes
    #[serde(default = "default_recv_buffer")]
    pub recv_buffer_size: usize,
}

/// Complete dnsrouted configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DnsRouteConfig {
    #[serde(default)]
    pub interface: InterfaceSection,

    #[serde(default)]
    pub routing: RoutingSection,

    #[serde(default)]
    pub management: ManagementSection,

    #[serde(default)]
    pub netlink: NetlinkSection,
}

// Default functions
fn default_interface_name() -> String {
    "tun0".to_string()
}

fn default_metric() -> u32 {
    100
}

fn default_killswitch_metric() -> u32 {
    101
}

fn default_extra_ttl() -> u64 {
    60
}

fn default_interval() -> u64 {
    5
}

fn default_sweep_percent() -> u32 {
    5
}

fn default_max_retries() -> u32 {
    10
}

fn default_sleep_step() -> u64 {
    500
}

fn default_poll_timeout() -> u16 {
    500
}

fn default_recv_buffer() -> usize {
    1024 * 1024
}

// Default implementations
impl Default for InterfaceSection {
    fn default() -> Self {
        Self {
            name: default_interface_name(),
        }
    }
}

impl Default for RoutingSection {
    fn default() -> Self {
        Self {
            metric: default_metric(),
            killswitch_metric: default_killswitch_metric(),
            ipv4_gateway: None,
            ipv6_gateway: None,
            extra_ttl_secs: default_extra_ttl(),
        }
    }
}

impl Default for ManagementSection {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            sweep_percent: default_sweep_percent(),
            max_retries: default_max_retries(),
            sleep_step_ms: default_sleep_step(),
        }
    }
}

impl Default for NetlinkSection {
    fn default() -> Self {
        Self {
            poll_timeout_ms: default_poll_timeout(),
            recv_buffer_size: default_recv_buffer(),
        }
    }
}

impl DnsRouteConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                RoutedError::Config(format!(
                    "Failed to parse config file {}: {}",
                    path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(RoutedError::Io(e)),
        }
    }

    /// Management tick interval as Duration
    pub fn management_interval(&self) -> Duration {
        Duration::from_secs(self.management.interval_secs)
    }

    /// Management thread sleep slice as Duration
    pub fn sleep_step(&self) -> Duration {
        Duration::from_millis(self.management.sleep_step_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let name = &self.interface.name;
        if name.is_empty() || name.len() > MAX_IFNAME_LEN {
            return Err(RoutedError::Config(format!(
                "interface name must be 1-{} bytes, got {:?}",
                MAX_IFNAME_LEN, name
            )));
        }

        if self.routing.killswitch_metric <= self.routing.metric {
            return Err(RoutedError::Config(format!(
                "killswitch_metric ({}) must exceed metric ({})",
                self.routing.killswitch_metric, self.routing.metric
            )));
        }

        if self.routing.extra_ttl_secs > MAX_EXTRA_TTL_SECS {
            return Err(RoutedError::Config(format!(
                "extra_ttl_secs must be at most {}, got {}",
                MAX_EXTRA_TTL_SECS, self.routing.extra_ttl_secs
            )));
        }

        if self.management.interval_secs == 0 {
            return Err(RoutedError::Config(
                "management interval_secs must be > 0".to_string(),
            ));
        }

        if !(1..=100).contains(&self.management.sweep_percent) {
            return Err(RoutedError::Config(
                "sweep_percent must be 1-100".to_string(),
            ));
        }

        if self.management.sleep_step_ms == 0 || self.netlink.poll_timeout_ms == 0 {
            return Err(RoutedError::Config(
                "sleep_step_ms and poll_timeout_ms must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}
