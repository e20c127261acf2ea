//! Shutdown coordination for the bridge.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;

/// Graceful drain did not complete cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShutdownError {
    /// Connections were still open when the grace period ended.
    #[error("{open} connection(s) still active after the {grace:?} grace period")]
    DrainTimeout { open: u64, grace: Duration },
}

/// Coordinator for graceful shutdown.
///
/// Triggering is idempotent and latched: a signal that arrives before the
/// server subscribes is still observed.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Whether shutdown has been triggered.
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot receiving end of [`Shutdown`]. Consumed by waiting on it.
#[derive(Debug)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolve once shutdown is triggered, or every [`Shutdown`] is gone.
    pub async fn recv(mut self) {
        if self.rx.wait_for(|triggered| *triggered).await.is_err() {
            tracing::warn!("Shutdown coordinator dropped, treating as shutdown");
        }
    }
}
