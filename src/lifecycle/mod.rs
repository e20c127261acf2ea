//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validate config → Resolve endpoints → Wait for upstream → Bind → Serve
//!
//! Shutdown (shutdown.rs):
//!     Trigger → Stop accepting → Drain connections (bounded) → Exit
//!
//! Signals (signals.rs):
//!     SIGHUP/SIGINT/SIGQUIT/SIGTERM → Trigger graceful shutdown
//!
//! State (state.rs):
//!     Initializing → Listening → ShuttingDown → Stopped | Failed
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then upstream, then listener
//! - Ordered shutdown: stop accept, drain, close
//! - Drain has a deadline; overrunning it is reported as an error

pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod state;

pub use shutdown::{Shutdown, ShutdownError, ShutdownSignal};
pub use signals::spawn_signal_listener;
pub use startup::{BridgeContext, Lifecycle};
pub use state::{ServerState, StateHandle};
