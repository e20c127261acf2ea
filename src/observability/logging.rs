//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the global tracing subscriber once, before startup work
//! - Pick text or JSON output
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for log shippers, text format for humans
//! - `RUST_LOG` wins over the configured level when set

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::{LogFormat, ObservabilityConfig};

/// Install the global subscriber described by `config`.
///
/// Fails if a global subscriber is already set.
pub fn init(config: &ObservabilityConfig) -> Result<(), TryInitError> {
    let fmt_layer = match config.log_format {
        LogFormat::Text => tracing_subscriber::fmt::layer().boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter(&config.log_level))
        .with(fmt_layer)
        .try_init()
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directive(level).into())
}

fn default_directive(level: &str) -> String {
    format!("h2c_bridge={level}")
}
