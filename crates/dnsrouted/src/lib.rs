//! DNS-driven route lifecycle daemon
//!
//! dnsrouted keeps host routes toward addresses handed out by a DNS resolver
//! alive for as long as their TTL (plus a grace period) is valid. Every
//! destination is protected by a blackhole "killswitch" route at a lower
//! preference, so traffic is dropped instead of leaking through the default
//! route whenever the managed interface cannot carry it.
//!
//! # Architecture
//!
//! ```text
//! DNS listener ──RouteRequest──┐
//!                              ▼
//!                       ┌──────────────┐  NetDevUpdate / RouteAdded / RouteRemoved
//!                       │ MessageBroker│◀──────────────────────── NetDevTracker
//!                       └──────┬───────┘                               ▲
//!                              ▼                                       │ RTMGRP_* notifications
//!                       RoutingManager ──RTM_NEWROUTE/RTM_DELROUTE──▶ kernel
//! ```
//!
//! The tracker and the manager's management loop each run on a dedicated
//! thread ([`worker::WorkerHandle`]); the broker delivers messages
//! synchronously on the publisher's thread.

pub mod broker;
pub mod clock;
pub mod config;
pub mod error;
pub mod message;
pub mod netdev_tracker;
pub mod netlink;
pub mod route_table;
pub mod routing_manager;
pub mod shutdown_handler;
pub mod worker;

pub use broker::{MessageBroker, Subscriber};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::DnsRouteConfig;
pub use error::{Result, RoutedError};
pub use message::{Message, MessageKind, SenderId};
pub use netdev_tracker::{NetDevTracker, TrackedInterface, TrackerSettings};
pub use route_table::{ExpiryMark, RouteStats, RouteTable};
pub use routing_manager::{RouteSettings, RouteSink, RoutingManager, TickReport};
pub use shutdown_handler::ShutdownHandler;
pub use worker::{ShutdownToken, Worker, WorkerHandle};
