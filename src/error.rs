//! Top-level error type.
//!
//! Every fatal condition maps onto one variant so the binary can log it once
//! and pick an exit code.

use std::io;

use thiserror::Error;

use crate::config::ConfigError;
use crate::lifecycle::ShutdownError;
use crate::net::{ListenError, ReadinessError};

/// Any error that ends the process.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Readiness(#[from] ReadinessError),

    #[error("listen error: {0}")]
    Listen(#[from] ListenError),

    #[error("shutdown error: {0}")]
    Shutdown(#[from] ShutdownError),

    #[error("failed to install signal handlers: {0}")]
    Signal(#[source] io::Error),
}

impl BridgeError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            BridgeError::Config(_)
            | BridgeError::Readiness(_)
            | BridgeError::Listen(_)
            | BridgeError::Shutdown(_)
            | BridgeError::Signal(_) => 1,
        }
    }
}
