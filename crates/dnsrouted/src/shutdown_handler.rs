//! Records fatal `Shutdown` events for the main thread

use crate::broker::Subscriber;
use crate::message::{Message, MessageKind};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use tracing::{info, warn};

/// Subscriber that latches the first requested exit code.
///
/// Later requests are logged and otherwise ignored, so the code reported by
/// the process is the one of the failure that started the shutdown.
#[derive(Debug, Default)]
pub struct ShutdownHandler {
    requested: AtomicBool,
    exit_code: AtomicI32,
}

impl ShutdownHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latches `exit_code` unless a shutdown was already requested.
    ///
    /// Returns true if this call was the first request.
    pub fn request(&self, exit_code: i32) -> bool {
        if self
            .requested
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.exit_code.store(exit_code, Ordering::SeqCst);
            info!(exit_code, "Shutdown requested");
            true
        } else {
            warn!(
                exit_code,
                first = self.exit_code(),
                "Shutdown already requested"
            );
            false
        }
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Exit code of the first request, 0 if none
    pub fn exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::SeqCst)
    }
}

impl Subscriber for ShutdownHandler {
    fn ready_for_message(&self, kind: MessageKind) -> bool {
        kind == MessageKind::Shutdown
    }

    fn on_message(&self, message: &Message) {
        if let Message::Shutdown { exit_code } = message {
            self.request(*exit_code);
        }
    }
}
