//! Server state machine.
//!
//! # State Transitions
//! ```text
//! Initializing → Listening → ShuttingDown → Stopped
//!       └────────────┴────────────┴──────→ Failed
//! ```
//!
//! Observers subscribe to a watch channel; the lifecycle is the only writer.

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Resolving endpoints and waiting for the upstream.
    Initializing,
    /// Bound and accepting connections.
    Listening,
    /// Not accepting; in-flight work is draining.
    ShuttingDown,
    /// Clean exit.
    Stopped,
    /// Startup or shutdown failed.
    Failed,
}

impl ServerState {
    /// Whether no further transitions can happen.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ServerState::Stopped | ServerState::Failed)
    }
}

/// Publishes state transitions.
#[derive(Debug, Clone)]
pub struct StateHandle {
    tx: Arc<watch::Sender<ServerState>>,
}

impl StateHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ServerState::Initializing);
        Self { tx: Arc::new(tx) }
    }

    /// Move to `state`. Terminal states are final.
    pub fn set(&self, state: ServerState) {
        self.tx.send_if_modified(|current| {
            if current.is_terminal() || *current == state {
                return false;
            }
            tracing::debug!(from = ?current, to = ?state, "Server state transition");
            *current = state;
            true
        });
    }

    /// Current state.
    pub fn current(&self) -> ServerState {
        *self.tx.borrow()
    }

    /// Watch transitions.
    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.tx.subscribe()
    }
}

impl Default for StateHandle {
    fn default() -> Self {
        Self::new()
    }
}
