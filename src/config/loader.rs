//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::config::validation::ValidationError;
use crate::http::director::InvalidRewriteHost;
use crate::net::{EndpointError, UnsupportedPlatform};

/// Error type for configuration problems. Always fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),

    #[error("{0}")]
    Endpoint(#[from] EndpointError),

    #[error("{0}")]
    Unsupported(#[from] UnsupportedPlatform),

    #[error("{0}")]
    RewriteHost(#[from] InvalidRewriteHost),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration from a TOML file.
///
/// Only syntax is checked here. Flags and environment may still override
/// file values, so semantic validation runs once on the merged result in
/// `BridgeContext::from_config`.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}
