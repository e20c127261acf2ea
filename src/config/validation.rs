//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check that both endpoints parse
//! - Check that the rewrite host can be used as Host and URI authority
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::http::director::Director;
use crate::net::{Endpoint, EndpointError};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener endpoint: {0}")]
    ListenEndpoint(EndpointError),

    #[error("upstream endpoint: {0}")]
    UpstreamEndpoint(EndpointError),

    #[error("host_rewrite.host {0:?} is not a valid host[:port]")]
    RewriteHost(String),

    #[error("listener and upstream are the same endpoint {0}")]
    SameEndpoint(String),
}

/// Validate `config`, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let listen = Endpoint::parse(&config.listener.endpoint)
        .map_err(|e| errors.push(ValidationError::ListenEndpoint(e)))
        .ok();
    let upstream = Endpoint::parse(&config.upstream.endpoint)
        .map_err(|e| errors.push(ValidationError::UpstreamEndpoint(e)))
        .ok();

    if let (Some(listen), Some(upstream)) = (&listen, &upstream) {
        if listen == upstream {
            errors.push(ValidationError::SameEndpoint(listen.to_string()));
        }
    }

    // Always checked: the rewrite host doubles as fallback URI authority.
    if Director::new(config.host_rewrite.mode, &config.host_rewrite.host).is_err() {
        errors.push(ValidationError::RewriteHost(config.host_rewrite.host.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
