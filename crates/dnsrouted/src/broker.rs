//! Synchronous publish/subscribe broker
//!
//! Publishing delivers the message on the caller's thread to every subscriber
//! that reports itself ready, in registration order. There is no queue: the
//! publish call returns once every handler has returned.
//!
//! A handler may publish again. The broker remembers, per thread, which
//! senders are currently being dispatched; a nested publish from a sender that
//! is already in flight on this thread is dropped, which stops two components
//! from bouncing events between each other forever while still letting a
//! handler forward a different sender's event.

use crate::message::{Message, MessageKind, SenderId};
use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::trace;

/// Receiver side of the broker.
pub trait Subscriber: Send + Sync {
    /// Cheap filter evaluated before every delivery.
    fn ready_for_message(&self, kind: MessageKind) -> bool;

    /// Handles one message on the publisher's thread.
    fn on_message(&self, message: &Message);
}

static NEXT_BROKER_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    /// (broker, sender) pairs being dispatched on this thread
    static IN_FLIGHT: RefCell<HashSet<(usize, SenderId)>> = RefCell::new(HashSet::new());
}

/// Removes the in-flight marker once dispatch finishes, even on unwind.
struct InFlightGuard {
    key: (usize, SenderId),
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let _ = IN_FLIGHT.try_with(|set| set.borrow_mut().remove(&self.key));
    }
}

/// Message broker shared by all components of the daemon.
pub struct MessageBroker {
    id: usize,
    subscribers: Mutex<Vec<Arc<dyn Subscriber>>>,
}

impl MessageBroker {
    pub fn new() -> Self {
        Self {
            id: NEXT_BROKER_ID.fetch_add(1, Ordering::Relaxed),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Registers a subscriber; it receives every message published afterwards.
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber>) {
        self.subscribers.lock().push(subscriber);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Delivers `message` to all ready subscribers.
    ///
    /// Returns the number of subscribers that handled the message; a publish
    /// suppressed by the recursion guard returns 0.
    pub fn publish(&self, sender: SenderId, message: &Message) -> usize {
        let key = (self.id, sender);
        let entered = IN_FLIGHT.with(|set| set.borrow_mut().insert(key));
        if !entered {
            trace!(%message, "Dropping recursive publish from in-flight sender");
            return 0;
        }
        let _guard = InFlightGuard { key };

        // Snapshot so (un)registration during dispatch does not affect this broadcast
        let snapshot: Vec<Arc<dyn Subscriber>> = self.subscribers.lock().clone();

        let kind = message.kind();
        let mut delivered = 0;
        for subscriber in snapshot {
            if subscriber.ready_for_message(kind) {
                subscriber.on_message(message);
                delivered += 1;
            }
        }
        delivered
    }
}

impl Default for MessageBroker {
    fn default() -> Self {
        Self::new()
    }
}
