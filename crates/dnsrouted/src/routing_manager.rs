//! Route lifecycle manager
//!
//! Turns DNS route requests into kernel routes and retires them once their
//! TTL (plus a grace period) has passed. Every destination gets a blackhole
//! route at the killswitch metric first; the regular route through the
//! managed interface is added only while that interface is routable for the
//! destination's family. Installation is re-driven on every management tick
//! until the kernel confirms it or the retry budget runs out.
//!
//! All route state lives behind one lock which each public operation holds
//! for its whole body. The manager never publishes while holding it.

use crate::broker::{MessageBroker, Subscriber};
use crate::clock::Clock;
use crate::config::DnsRouteConfig;
use crate::error::Result;
use crate::message::{Message, MessageKind, SenderId};
use crate::netlink::codec::{
    KernelEvent, RouteKind, RouteOp, RouteSpec, encode_route, parse_datagram,
};
use crate::netlink::socket::{RouteSocket, interface_index};
use crate::route_table::{
    ConfirmAddOutcome, ConfirmDelOutcome, RequestOutcome, RouteStats, RouteTable,
};
use crate::worker::{ShutdownToken, Worker};
use dnsroute_types::{InterfaceConfig, IpAddress, IpFamily};
use parking_lot::Mutex;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Span, debug, error, info, info_span, warn};

/// Kernel-facing output of the manager.
pub trait RouteSink: Send {
    /// Sends one encoded route message, returning the bytes written.
    fn send_route(&mut self, message: &[u8]) -> io::Result<usize>;

    /// Errnos of rejected requests received since the last call.
    fn take_errors(&mut self) -> Vec<i32> {
        Vec::new()
    }
}

impl RouteSink for RouteSocket {
    fn send_route(&mut self, message: &[u8]) -> io::Result<usize> {
        self.send(message)
    }

    fn take_errors(&mut self) -> Vec<i32> {
        let mut errors = Vec::new();
        loop {
            match self.try_recv() {
                Ok(Some(datagram)) => {
                    errors.extend(parse_datagram(datagram).filter_map(|event| match event {
                        Ok(KernelEvent::Error { errno }) if errno != 0 => Some(errno),
                        _ => None,
                    }));
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Failed to drain route socket");
                    break;
                }
            }
        }
        errors
    }
}

/// Tunables of the manager, taken from the `[interface]`, `[routing]` and
/// `[management]` sections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSettings {
    pub interface: String,
    pub metric: u32,
    pub killswitch_metric: u32,
    pub ipv4_gateway: Option<Ipv4Addr>,
    pub ipv6_gateway: Option<Ipv6Addr>,
    /// Grace seconds added to every TTL
    pub extra_ttl: u64,
    pub interval: Duration,
    pub sweep_percent: u32,
    pub max_retries: u32,
    /// Granularity of the shutdown check between ticks
    pub sleep_step: Duration,
}

impl RouteSettings {
    pub fn from_config(config: &DnsRouteConfig) -> Self {
        Self {
            interface: config.interface.name.clone(),
            metric: config.routing.metric,
            killswitch_metric: config.routing.killswitch_metric,
            ipv4_gateway: config.routing.ipv4_gateway,
            ipv6_gateway: config.routing.ipv6_gateway,
            extra_ttl: config.routing.extra_ttl_secs,
            interval: config.management_interval(),
            sweep_percent: config.management.sweep_percent,
            max_retries: config.management.max_retries,
            sleep_step: config.sleep_step(),
        }
    }

    fn gateway_for(&self, family: IpFamily) -> Option<IpAddress> {
        match family {
            IpFamily::V4 => self.ipv4_gateway.map(IpAddress::from),
            IpFamily::V6 => self.ipv6_gateway.map(IpAddress::from),
        }
    }
}

impl Default for RouteSettings {
    fn default() -> Self {
        Self::from_config(&DnsRouteConfig::default())
    }
}

/// What one management tick did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub retried: usize,
    pub finalized: usize,
    pub removed: usize,
    pub kernel_errors: usize,
}

struct ManagerState {
    table: RouteTable,
    interface: InterfaceConfig,
    ifindex: u32,
    sink: Option<Box<dyn RouteSink>>,
    seq: u32,
}

impl ManagerState {
    /// Installs or withdraws both routes of `dest`.
    ///
    /// Install pushes the blackhole route first and the regular route only
    /// when the interface is routable. Withdraw removes the regular route
    /// first so the destination stays blackholed until the end.
    fn push_route(&mut self, settings: &RouteSettings, dest: IpAddress, op: RouteOp) {
        let Some(family) = dest.family() else {
            return;
        };
        let blackhole = RouteSpec {
            op,
            kind: RouteKind::Blackhole,
            dest,
            oif: 0,
            metric: settings.killswitch_metric,
            gateway: None,
        };
        // Withdraws omit RTA_GATEWAY so a route whose gateway changed still matches
        let gateway = match op {
            RouteOp::Install if !self.interface.is_ptp() => settings.gateway_for(family),
            _ => None,
        };
        let regular = RouteSpec {
            op,
            kind: RouteKind::Unicast,
            dest,
            oif: self.ifindex,
            metric: settings.metric,
            gateway,
        };

        match op {
            RouteOp::Install => {
                self.send(&blackhole);
                if self.interface.is_routable(family) {
                    self.send(&regular);
                } else {
                    debug!(ip = %dest, "Interface not routable, regular route deferred");
                }
            }
            RouteOp::Withdraw => {
                self.send(&regular);
                self.send(&blackhole);
            }
        }
    }

    fn send(&mut self, spec: &RouteSpec) {
        let Some(sink) = self.sink.as_mut() else {
            debug!(ip = %spec.dest, "Route socket not initialized, skipping push");
            return;
        };
        self.seq = self.seq.wrapping_add(1);
        let message = match encode_route(spec, self.seq) {
            Ok(message) => message,
            Err(e) => {
                error!(ip = %spec.dest, error = %e, "Failed to encode route message");
                return;
            }
        };
        match sink.send_route(&message) {
            Ok(written) if written == message.len() => {
                debug!(
                    ip = %spec.dest,
                    op = ?spec.op,
                    kind = ?spec.kind,
                    metric = spec.metric,
                    "Route pushed"
                );
            }
            Ok(written) => {
                error!(
                    ip = %spec.dest,
                    written,
                    expected = message.len(),
                    "Short write on route socket"
                );
            }
            Err(e) => {
                error!(ip = %spec.dest, error = %e, "Failed to send route message");
            }
        }
    }
}

/// Central route state machine, subscribed to the broker.
pub struct RoutingManager {
    settings: RouteSettings,
    state: Mutex<ManagerState>,
    clock: Arc<dyn Clock>,
    broker: Arc<MessageBroker>,
    sender: SenderId,
    token: ShutdownToken,
    span: Span,
}

impl RoutingManager {
    pub fn new(
        settings: RouteSettings,
        clock: Arc<dyn Clock>,
        broker: Arc<MessageBroker>,
        token: ShutdownToken,
    ) -> Self {
        let span = info_span!("routing_manager", interface = %settings.interface);
        Self {
            settings,
            state: Mutex::new(ManagerState {
                table: RouteTable::new(),
                interface: InterfaceConfig::default(),
                ifindex: 0,
                sink: None,
                seq: 0,
            }),
            clock,
            broker,
            sender: SenderId::new(),
            token,
            span,
        }
    }

    /// Opens the route socket and resolves the managed interface index.
    ///
    /// Failure to open the socket is fatal: a `Shutdown` carrying the OS
    /// error is published and the error returned. A missing interface is
    /// not; its index is picked up again on the next interface update.
    pub fn open_kernel_socket(&self, recv_buffer_size: usize) -> Result<()> {
        let _enter = self.span.enter();
        let socket = match RouteSocket::open(0, recv_buffer_size) {
            Ok(socket) => socket,
            Err(e) => {
                error!(error = %e, "Failed to open route socket");
                self.broker.publish(
                    self.sender,
                    &Message::Shutdown {
                        exit_code: e.exit_code(),
                    },
                );
                return Err(e);
            }
        };
        let ifindex = match interface_index(&self.settings.interface) {
            Ok(index) => index,
            Err(e) => {
                warn!(error = %e, "Interface index unknown, unicast routes use oif 0");
                0
            }
        };
        self.attach_sink(Box::new(socket), ifindex);
        info!(ifindex, "Route socket ready");
        Ok(())
    }

    /// Installs the kernel output directly.
    pub fn attach_sink(&self, sink: Box<dyn RouteSink>, ifindex: u32) {
        let mut state = self.state.lock();
        state.sink = Some(sink);
        state.ifindex = ifindex;
    }

    pub fn settings(&self) -> &RouteSettings {
        &self.settings
    }

    /// Handles a DNS answer for `dest` with the given TTL.
    pub fn insert_route(&self, dest: IpAddress, ttl: u32) {
        let _enter = self.span.enter();
        if !dest.is_valid() {
            warn!(ttl, "Ignoring route request for invalid address");
            return;
        }
        let expiration = self
            .clock
            .now_secs()
            .saturating_add(u64::from(ttl))
            .saturating_add(self.settings.extra_ttl);

        let mut state = self.state.lock();
        match state.table.request(dest, expiration) {
            RequestOutcome::Extended { from, to } => {
                debug!(ip = %dest, from, to, "Extended active route");
            }
            RequestOutcome::Duplicate { existing } => {
                warn!(
                    ip = %dest,
                    existing,
                    requested = expiration,
                    "Duplicate route request ignored"
                );
            }
            RequestOutcome::Pending { expiration } => {
                info!(ip = %dest, ttl, expiration, "Route requested");
                state.push_route(&self.settings, dest, RouteOp::Install);
            }
        }
    }

    /// Kernel confirmed one of our routes.
    pub fn confirm_route_add(&self, dest: IpAddress) {
        let _enter = self.span.enter();
        let fallback = self.clock.now_secs().saturating_add(self.settings.extra_ttl);
        let mut state = self.state.lock();
        match state.table.confirm_add(dest, fallback) {
            ConfirmAddOutcome::Activated { expiration } => {
                info!(ip = %dest, expiration, "Route active");
            }
            ConfirmAddOutcome::Unexpected { expiration } => {
                warn!(ip = %dest, expiration, "Confirmation for unknown route, tracking it");
            }
            ConfirmAddOutcome::AlreadyActive => {
                debug!(ip = %dest, "Route already active");
            }
        }
    }

    /// Kernel removed one of our routes.
    pub fn confirm_route_del(&self, dest: IpAddress) {
        let _enter = self.span.enter();
        let mut state = self.state.lock();
        match state.table.confirm_del(dest) {
            ConfirmDelOutcome::Rearmed { expiration } => {
                warn!(ip = %dest, expiration, "Active route removed externally, re-arming");
            }
            ConfirmDelOutcome::NotActive => {
                debug!(ip = %dest, "Removal of inactive route");
            }
        }
    }

    /// Caches a new interface snapshot and re-drives pending routes.
    pub fn process_net_dev_update(&self, config: InterfaceConfig) {
        let _enter = self.span.enter();
        let ifindex = interface_index(&self.settings.interface).ok();

        let mut state = self.state.lock();
        if let Some(index) = ifindex {
            if index != state.ifindex {
                info!(old = state.ifindex, new = index, "Interface index changed");
                state.ifindex = index;
            }
        }
        info!(%config, "Interface updated");
        state.interface = config;

        for dest in state.table.pending_destinations() {
            state.push_route(&self.settings, dest, RouteOp::Install);
        }
    }

    /// One management cycle: retry or finalize pending routes, then sweep
    /// expired active ones.
    pub fn tick(&self) -> TickReport {
        let _enter = self.span.enter();
        let now = self.clock.now_secs();
        let mut report = TickReport::default();

        let mut state = self.state.lock();
        if let Some(sink) = state.sink.as_mut() {
            for errno in sink.take_errors() {
                warn!(
                    errno,
                    error = %io::Error::from_raw_os_error(errno),
                    "Kernel rejected route request"
                );
                report.kernel_errors += 1;
            }
        }

        let pass = state.table.retry_pass(self.settings.max_retries);
        for mark in &pass.finalized {
            warn!(
                ip = %mark.dest,
                retries = self.settings.max_retries,
                "No kernel confirmation, marking route active"
            );
        }
        for dest in &pass.retry {
            state.push_route(&self.settings, *dest, RouteOp::Install);
        }
        report.retried = pass.retry.len();
        report.finalized = pass.finalized.len();

        let removed = state.table.sweep(now, self.settings.sweep_percent);
        for mark in &removed {
            info!(%mark, "Route expired");
            state.push_route(&self.settings, mark.dest, RouteOp::Withdraw);
        }
        report.removed = removed.len();

        if report != TickReport::default() {
            debug!(stats = %state.table.stats(), ?report, "Management tick");
        }
        report
    }

    pub fn stats(&self) -> RouteStats {
        self.state.lock().table.stats()
    }

    /// Expiration of an active route
    pub fn active_expiration(&self, dest: &IpAddress) -> Option<u64> {
        self.state.lock().table.active(dest)
    }

    /// Expiration and retry count of a pending route
    pub fn pending_route(&self, dest: &IpAddress) -> Option<(u64, u32)> {
        self.state
            .lock()
            .table
            .pending(dest)
            .map(|pending| (pending.expiration, pending.retries))
    }
}

impl Subscriber for RoutingManager {
    fn ready_for_message(&self, kind: MessageKind) -> bool {
        !self.token.is_cancelled()
            && matches!(
                kind,
                MessageKind::NetDevUpdate
                    | MessageKind::RouteRequest
                    | MessageKind::RouteAdded
                    | MessageKind::RouteRemoved
            )
    }

    fn on_message(&self, message: &Message) {
        match message {
            Message::NetDevUpdate { config } => self.process_net_dev_update(config.clone()),
            Message::RouteRequest { ip, ttl } => self.insert_route(*ip, *ttl),
            Message::RouteAdded { ip } => self.confirm_route_add(*ip),
            Message::RouteRemoved { ip } => self.confirm_route_del(*ip),
            Message::Shutdown { .. } => {}
        }
    }
}

impl Worker for RoutingManager {
    fn name(&self) -> &str {
        "routing-manager"
    }

    fn shutdown_token(&self) -> &ShutdownToken {
        &self.token
    }

    fn run(&self) -> Result<()> {
        let span = self.span.clone();
        let _enter = span.enter();
        info!(interval = ?self.settings.interval, "Management loop started");

        let mut next_tick = Instant::now() + self.settings.interval;
        loop {
            if self.token.is_cancelled() {
                break;
            }
            let now = Instant::now();
            if now < next_tick {
                std::thread::sleep(self.settings.sleep_step.min(next_tick - now));
                continue;
            }
            self.tick();
            next_tick = Instant::now() + self.settings.interval;
        }

        info!(stats = %self.stats(), "Management loop stopped");
        Ok(())
    }
}
