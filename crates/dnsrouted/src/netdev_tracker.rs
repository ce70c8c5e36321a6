//! Interface tracker
//!
//! Mirrors the kernel's view of the managed interface. The initial snapshot
//! comes from getifaddrs(3); afterwards link and address notifications from a
//! NETLINK_ROUTE socket update it, and every change is published as
//! `NetDevUpdate`. Route notifications for routes carrying this daemon's
//! markers (main table, static protocol, unicast, configured metric, managed
//! interface) are published as `RouteAdded` / `RouteRemoved`.

use crate::broker::MessageBroker;
use crate::config::DnsRouteConfig;
use crate::error::{Result, RoutedError};
use crate::message::{Message, SenderId};
use crate::netlink::codec::{
    AF_INET, AF_INET6, AddressEvent, Change, KernelEvent, LinkEvent, RT_SCOPE_UNIVERSE,
    RT_TABLE_MAIN, RTMGRP_IPV4_IFADDR, RTMGRP_IPV4_ROUTE, RTMGRP_IPV6_IFADDR, RTMGRP_IPV6_ROUTE,
    RTMGRP_LINK, RTN_UNICAST, RTPROT_STATIC, RouteEvent, parse_datagram,
};
use crate::netlink::socket::{InterfaceSnapshot, RouteSocket, interface_index, interface_snapshot};
use crate::worker::{ShutdownToken, Worker};
use dnsroute_types::{InterfaceConfig, IpAddress};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{Span, debug, error, info, info_span, trace, warn};

/// Groups the tracker listens to
pub const TRACKER_GROUPS: u32 =
    RTMGRP_LINK | RTMGRP_IPV4_IFADDR | RTMGRP_IPV6_IFADDR | RTMGRP_IPV4_ROUTE | RTMGRP_IPV6_ROUTE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerSettings {
    pub interface: String,
    /// Metric identifying routes pushed by the routing manager
    pub metric: u32,
    pub poll_timeout_ms: u16,
    pub recv_buffer_size: usize,
}

impl TrackerSettings {
    pub fn from_config(config: &DnsRouteConfig) -> Self {
        Self {
            interface: config.interface.name.clone(),
            metric: config.routing.metric,
            poll_timeout_ms: config.netlink.poll_timeout_ms,
            recv_buffer_size: config.netlink.recv_buffer_size,
        }
    }
}

/// Current snapshot plus the index used to match notifications.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackedInterface {
    pub name: String,
    pub ifindex: Option<u32>,
    pub config: InterfaceConfig,
    /// Broadcast or peer address announced with each local address
    pub remotes: BTreeMap<IpAddress, IpAddress>,
}

impl TrackedInterface {
    pub fn new(name: impl Into<String>, ifindex: Option<u32>, config: InterfaceConfig) -> Self {
        Self {
            name: name.into(),
            ifindex,
            config,
            remotes: BTreeMap::new(),
        }
    }

    /// Applies one kernel notification.
    ///
    /// Returns the message to publish, if any. A kernel error notification is
    /// returned as [`RoutedError::Kernel`].
    pub fn apply(&mut self, event: &KernelEvent, metric: u32) -> Result<Option<Message>> {
        match event {
            KernelEvent::Link(link) => Ok(self.apply_link(link)),
            KernelEvent::Address(addr) => Ok(self.apply_address(addr)),
            KernelEvent::Route(route) => Ok(self.apply_route(route, metric)),
            KernelEvent::Error { errno } if *errno != 0 => {
                Err(RoutedError::Kernel { errno: *errno })
            }
            KernelEvent::Error { .. } | KernelEvent::Done => Ok(None),
            KernelEvent::Other { msg_type } => {
                debug!(msg_type, "Ignoring netlink message");
                Ok(None)
            }
        }
    }

    fn apply_link(&mut self, link: &LinkEvent) -> Option<Message> {
        match &link.name {
            Some(name) if *name == self.name => {
                if self.ifindex != Some(link.index) {
                    info!(ifindex = link.index, "Learned interface index");
                    self.ifindex = Some(link.index);
                }
            }
            // renamed away, or another interface
            Some(_) => {
                if self.ifindex == Some(link.index) {
                    info!(ifindex = link.index, "Interface renamed, no longer tracked");
                    self.ifindex = None;
                    return self.update(self.config.set_state(false));
                }
                return None;
            }
            None if self.ifindex == Some(link.index) => {}
            None => return None,
        }

        let next = match link.change {
            Change::New => {
                let next = self.config.set_state(link.is_running()).set_type(link.is_ptp());
                info!(
                    running = link.is_running(),
                    ptp = link.is_ptp(),
                    "Interface link changed"
                );
                next
            }
            Change::Del => {
                info!("Interface removed");
                self.ifindex = None;
                self.config.set_state(false)
            }
        };
        self.update(next)
    }

    fn apply_address(&mut self, addr: &AddressEvent) -> Option<Message> {
        if Some(addr.index) != self.ifindex {
            return None;
        }
        if addr.family != AF_INET && addr.family != AF_INET6 {
            return None;
        }

        // With IFA_LOCAL present IFA_ADDRESS is the peer of a point-to-point link
        let (local, remote) = match (addr.local, addr.address) {
            (Some(local), Some(peer)) if peer != local => (Some(local), Some(peer)),
            (Some(local), _) => (Some(local), addr.broadcast),
            (None, address) => (address, addr.broadcast),
        };

        let mut next = self.config.clone();
        match addr.change {
            Change::New => {
                let local = local.filter(|ip| ip.is_valid());
                if let Some(ip) = local {
                    info!(%ip, "Added local address");
                    next = next.add_local_ip(ip);
                }
                if let Some(ip) = remote.filter(|ip| ip.is_valid()) {
                    info!(%ip, "Added remote address");
                    next = next.add_remote_ip(ip);
                    let replaced = local.and_then(|local| self.remotes.insert(local, ip));
                    if let Some(replaced) = replaced {
                        next = self.release_remote(next, replaced);
                    }
                }
            }
            Change::Del => {
                if let Some(ip) = local {
                    info!(%ip, "Removed local address");
                    next = next.del_local_ip(&ip);
                }
                let remote = local.and_then(|ip| self.remotes.remove(&ip)).or(remote);
                if let Some(ip) = remote {
                    next = self.release_remote(next, ip);
                }
            }
        }
        self.update(next)
    }

    /// Drops `remote` unless another local address still announces it.
    fn release_remote(&self, next: InterfaceConfig, remote: IpAddress) -> InterfaceConfig {
        if self.remotes.values().any(|ip| *ip == remote) {
            debug!(ip = %remote, "Remote address still in use");
            return next;
        }
        info!(ip = %remote, "Removed remote address");
        next.del_remote_ip(&remote)
    }

    fn apply_route(&self, route: &RouteEvent, metric: u32) -> Option<Message> {
        let ours = (route.family == AF_INET || route.family == AF_INET6)
            && route.table == u32::from(RT_TABLE_MAIN)
            && route.scope == RT_SCOPE_UNIVERSE
            && route.route_type == RTN_UNICAST
            && route.protocol == RTPROT_STATIC
            && route.priority == Some(metric)
            && self.ifindex.is_some()
            && route.oif == self.ifindex;
        if !ours {
            trace!(?route, "Ignoring foreign route");
            return None;
        }
        let ip = route.dest.filter(|ip| ip.is_valid())?;
        Some(match route.change {
            Change::New => Message::RouteAdded { ip },
            Change::Del => Message::RouteRemoved { ip },
        })
    }

    /// Replaces the snapshot, returning an update only if it changed.
    fn update(&mut self, next: InterfaceConfig) -> Option<Message> {
        if next == self.config {
            return None;
        }
        self.config = next.clone();
        Some(Message::NetDevUpdate { config: next })
    }
}

/// Netlink-driven interface tracker worker.
pub struct NetDevTracker {
    settings: TrackerSettings,
    state: Mutex<TrackedInterface>,
    socket: Mutex<Option<RouteSocket>>,
    broker: Arc<MessageBroker>,
    sender: SenderId,
    token: ShutdownToken,
    span: Span,
}

impl NetDevTracker {
    pub fn new(
        settings: TrackerSettings,
        broker: Arc<MessageBroker>,
        token: ShutdownToken,
    ) -> Self {
        let span = info_span!("netdev_tracker", interface = %settings.interface);
        let state =
            TrackedInterface::new(settings.interface.clone(), None, InterfaceConfig::default());
        Self {
            settings,
            state: Mutex::new(state),
            socket: Mutex::new(None),
            broker,
            sender: SenderId::new(),
            token,
            span,
        }
    }

    /// Opens the notification socket and publishes the initial snapshot.
    ///
    /// The socket is bound before enumerating addresses so no change between
    /// the two is lost. Errors are published as `Shutdown` and returned.
    pub fn initialize(&self) -> Result<()> {
        let _enter = self.span.enter();
        match self.open_and_snapshot() {
            Ok(config) => {
                info!(%config, "Tracking interface");
                self.publish(Message::NetDevUpdate { config });
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Interface tracker setup failed");
                self.publish(Message::Shutdown {
                    exit_code: e.exit_code(),
                });
                Err(e)
            }
        }
    }

    fn open_and_snapshot(&self) -> Result<InterfaceConfig> {
        let socket = RouteSocket::open(TRACKER_GROUPS, self.settings.recv_buffer_size)?;
        *self.socket.lock() = Some(socket);

        let ifindex = interface_index(&self.settings.interface).ok();
        let snapshot = match interface_snapshot(&self.settings.interface)? {
            Some(snapshot) => snapshot,
            None => {
                warn!("Interface not present yet");
                InterfaceSnapshot::default()
            }
        };
        let mut state = self.state.lock();
        state.ifindex = ifindex;
        state.config = snapshot.config.clone();
        state.remotes = snapshot.remotes;
        Ok(snapshot.config)
    }

    /// Current interface snapshot
    pub fn current(&self) -> InterfaceConfig {
        self.state.lock().config.clone()
    }

    /// Decodes one datagram and publishes the resulting events.
    ///
    /// Processing stops at `NLMSG_DONE` or the first malformed message; a
    /// kernel error notification is returned as an error.
    pub fn handle_datagram(&self, datagram: &[u8]) -> Result<()> {
        for event in parse_datagram(datagram) {
            let event = match event {
                Ok(KernelEvent::Done) => break,
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "Dropping malformed netlink message");
                    break;
                }
            };
            let message = self.state.lock().apply(&event, self.settings.metric)?;
            if let Some(message) = message {
                self.publish(message);
            }
        }
        Ok(())
    }

    fn publish(&self, message: Message) {
        debug!(%message, "Publishing");
        self.broker.publish(self.sender, &message);
    }

    fn poll_loop(&self) -> Result<()> {
        let mut guard = self.socket.lock();
        let socket = guard.as_mut().ok_or_else(|| RoutedError::Worker {
            worker: self.name().to_string(),
            message: "started before initialize".to_string(),
        })?;
        while !self.token.is_cancelled() {
            if !socket.wait_readable(self.settings.poll_timeout_ms)? {
                continue;
            }
            let datagram = socket.recv()?;
            self.handle_datagram(datagram)?;
        }
        Ok(())
    }
}

impl Worker for NetDevTracker {
    fn name(&self) -> &str {
        "netdev-tracker"
    }

    fn shutdown_token(&self) -> &ShutdownToken {
        &self.token
    }

    fn run(&self) -> Result<()> {
        let span = self.span.clone();
        let _enter = span.enter();
        info!("Interface tracker started");
        match self.poll_loop() {
            Ok(()) => {
                info!("Interface tracker stopped");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Interface tracker failed");
                self.publish(Message::Shutdown {
                    exit_code: e.exit_code(),
                });
                Err(e)
            }
        }
    }
}
