//! Dedicated-thread workers with cooperative shutdown

use crate::error::{Result, RoutedError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use tracing::{debug, error};

/// Cooperative cancellation flag handed to each worker at construction.
///
/// Workers only block in bounded waits and re-check the token after each one,
/// so a cancelled worker exits within one wait period.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken(Arc<AtomicBool>);

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Long-running component driven by its own OS thread.
pub trait Worker: Send + Sync + 'static {
    /// Thread name, also used in log records.
    fn name(&self) -> &str;

    /// Token observed by [`Worker::run`].
    fn shutdown_token(&self) -> &ShutdownToken;

    /// Thread body; returns once the token is cancelled or on a fatal error.
    fn run(&self) -> Result<()>;
}

/// Owner of a started worker thread.
pub struct WorkerHandle {
    name: String,
    token: ShutdownToken,
    thread: JoinHandle<Result<()>>,
}

impl WorkerHandle {
    /// Spawns `worker.run()` on a new named thread.
    pub fn start<W: Worker>(worker: Arc<W>) -> Result<Self> {
        let name = worker.name().to_string();
        let token = worker.shutdown_token().clone();
        let thread = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker.run())
            .map_err(|e| RoutedError::Worker {
                worker: name.clone(),
                message: format!("failed to spawn thread: {}", e),
            })?;
        debug!(worker = %name, "Worker thread started");
        Ok(Self {
            name,
            token,
            thread,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Asks the worker to stop at its next wait boundary.
    pub fn request_stop(&self) {
        self.token.cancel();
    }

    /// Waits for the worker thread and returns its result.
    pub fn join(self) -> Result<()> {
        match self.thread.join() {
            Ok(result) => {
                debug!(worker = %self.name, "Worker thread joined");
                result
            }
            Err(_) => {
                error!(worker = %self.name, "Worker thread panicked");
                Err(RoutedError::Worker {
                    worker: self.name,
                    message: "thread panicked".to_string(),
                })
            }
        }
    }
}
