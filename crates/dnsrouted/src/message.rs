//! Events exchanged over the message broker

use dnsroute_types::{InterfaceConfig, IpAddress};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Discriminant of a [`Message`], used by subscribers to filter deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Shutdown,
    NetDevUpdate,
    RouteRequest,
    RouteAdded,
    RouteRemoved,
}

/// Closed set of events carried by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Unrecoverable failure, the process should stop with `exit_code`
    Shutdown { exit_code: i32 },
    /// New snapshot of the managed interface
    NetDevUpdate { config: InterfaceConfig },
    /// DNS answer: keep a route to `ip` for `ttl` seconds
    RouteRequest { ip: IpAddress, ttl: u32 },
    /// Kernel confirmed installation of one of our routes
    RouteAdded { ip: IpAddress },
    /// Kernel removed one of our routes
    RouteRemoved { ip: IpAddress },
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Shutdown { .. } => MessageKind::Shutdown,
            Message::NetDevUpdate { .. } => MessageKind::NetDevUpdate,
            Message::RouteRequest { .. } => MessageKind::RouteRequest,
            Message::RouteAdded { .. } => MessageKind::RouteAdded,
            Message::RouteRemoved { .. } => MessageKind::RouteRemoved,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Shutdown { exit_code } => write!(f, "shutdown(ec={})", exit_code),
            Message::NetDevUpdate { config } => write!(f, "netdev-update({})", config),
            Message::RouteRequest { ip, ttl } => write!(f, "route-request({}, ttl={})", ip, ttl),
            Message::RouteAdded { ip } => write!(f, "route-added({})", ip),
            Message::RouteRemoved { ip } => write!(f, "route-removed({})", ip),
        }
    }
}

static NEXT_SENDER_ID: AtomicUsize = AtomicUsize::new(1);

/// Opaque identity of a publisher.
///
/// Two ids are equal only if they come from the same `SenderId::new()` call
/// (or a copy of it); the broker uses this to break publish recursion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SenderId(usize);

impl SenderId {
    pub fn new() -> Self {
        SenderId(NEXT_SENDER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SenderId {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_kind() {
        let ip: IpAddress = "1.2.3.4".parse().unwrap();
        assert_eq!(Message::Shutdown { exit_code: 1 }.kind(), MessageKind::Shutdown);
        assert_eq!(
            Message::RouteRequest { ip, ttl: 30 }.kind(),
            MessageKind::RouteRequest
        );
        assert_eq!(Message::RouteAdded { ip }.kind(), MessageKind::RouteAdded);
        assert_eq!(Message::RouteRemoved { ip }.kind(), MessageKind::RouteRemoved);
        assert_eq!(
            Message::NetDevUpdate {
                config: InterfaceConfig::default()
            }
            .kind(),
            MessageKind::NetDevUpdate
        );
    }

    #[test]
    fn test_sender_ids_are_unique() {
        let a = SenderId::new();
        let b = SenderId::new();
        assert_ne!(a, b);
        let copy = a;
        assert_eq!(a, copy);
    }

    #[test]
    fn test_display() {
        let ip: IpAddress = "1.2.3.4".parse().unwrap();
        assert_eq!(
            Message::RouteRequest { ip, ttl: 30 }.to_string(),
            "route-request(1.2.3.4, ttl=30)"
        );
    }
}
