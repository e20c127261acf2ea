//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! "<scheme>://<address>"
//!     → endpoint.rs (parse into TransportKind + address)
//!     → readiness.rs (startup: poll until the upstream answers)
//!     → listener.rs (bind, stale unix socket cleanup, accept)
//!     → connection.rs (lifecycle tracking, drain signal)
//!     → Hand off to HTTP layer as a BridgeStream
//!
//! Upstream side:
//!     dial.rs (connect to the upstream Endpoint) → BridgeStream
//! ```
//!
//! # Design Decisions
//! - One stream type for every transport keeps the HTTP layer transport-blind
//! - Transports missing on a platform fail with UnsupportedPlatform instead
//!   of disappearing at compile time

pub mod connection;
pub mod dial;
pub mod endpoint;
pub mod listener;
pub mod pipe;
pub mod readiness;
pub mod stream;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
pub use dial::dial;
pub use endpoint::{Endpoint, EndpointError, TcpFamily, TransportKind};
pub use listener::{ListenError, Listener};
pub use readiness::{wait_ready, ReadinessError};
pub use stream::{BridgeStream, PeerAddr};

use thiserror::Error;

/// The running platform has no implementation of a transport kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("transport {kind} is not available on this platform")]
pub struct UnsupportedPlatform {
    kind: TransportKind,
}

impl UnsupportedPlatform {
    pub fn new(kind: TransportKind) -> Self {
        Self { kind }
    }

    /// The transport that is missing.
    pub fn kind(&self) -> TransportKind {
        self.kind
    }
}
