//! Upstream readiness polling.
//!
//! # Responsibilities
//! - Block startup until the upstream endpoint is reachable
//! - Give up after a bounded number of one-second polls
//!
//! # Design Decisions
//! - unix: a socket-type entry must exist at the path; a failed `stat` is
//!   treated as "not yet", never as fatal
//! - tcp: a short dial that is closed immediately on success
//! - npipe: existence of the pipe path only
//! - Runs before the acceptor, never concurrently with serving

use std::time::Duration;

use thiserror::Error;

use crate::net::dial::dial_tcp;
use crate::net::endpoint::{Endpoint, TransportKind};
use crate::net::pipe::NamedPipe;

/// Interval between readiness probes.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound for a single TCP readiness dial.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(1);

/// The upstream did not become reachable in time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("timed out after {timeout_secs}s waiting for upstream {endpoint} to become ready")]
pub struct ReadinessError {
    pub endpoint: String,
    pub timeout_secs: u64,
}

/// Wait until `endpoint` is reachable, polling once per second.
///
/// `timeout_secs == 0` returns immediately without probing.
pub async fn wait_ready(endpoint: &Endpoint, timeout_secs: u64) -> Result<(), ReadinessError> {
    if timeout_secs == 0 {
        return Ok(());
    }

    let mut remaining = timeout_secs;
    loop {
        if probe(endpoint).await {
            tracing::info!(upstream = %endpoint, "Upstream is ready");
            return Ok(());
        }

        if remaining == 0 {
            return Err(ReadinessError {
                endpoint: endpoint.to_string(),
                timeout_secs,
            });
        }

        tracing::info!(
            upstream = %endpoint,
            remaining_secs = remaining,
            "Waiting for upstream to become ready"
        );
        tokio::time::sleep(POLL_INTERVAL).await;
        remaining -= 1;
    }
}

/// One readiness check.
pub async fn probe(endpoint: &Endpoint) -> bool {
    match endpoint.kind() {
        TransportKind::Unix => is_socket(endpoint.address()),
        TransportKind::Tcp(family) => {
            match tokio::time::timeout(DIAL_TIMEOUT, dial_tcp(endpoint.address(), family)).await {
                Ok(Ok(stream)) => {
                    drop(stream);
                    true
                }
                Ok(Err(e)) => {
                    tracing::trace!(upstream = %endpoint, error = %e, "Readiness dial failed");
                    false
                }
                Err(_) => false,
            }
        }
        TransportKind::NamedPipe => NamedPipe::exists(endpoint.address()),
    }
}

#[cfg(unix)]
fn is_socket(path: &str) -> bool {
    use std::os::unix::fs::FileTypeExt;

    match std::fs::metadata(path) {
        Ok(meta) => meta.file_type().is_socket(),
        Err(e) => {
            tracing::trace!(path, error = %e, "Socket stat failed");
            false
        }
    }
}

#[cfg(not(unix))]
fn is_socket(_path: &str) -> bool {
    false
}
