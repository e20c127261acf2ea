//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the bridge.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the bridge.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ProxyConfig {
    /// Where clients connect.
    pub listener: ListenerConfig,

    /// Where requests are forwarded.
    pub upstream: UpstreamConfig,

    /// Host header normalization.
    pub host_rewrite: HostRewriteConfig,

    /// Graceful shutdown settings.
    pub shutdown: ShutdownConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Listen endpoint, e.g. `unix:///csi-data/csi.sock` or `tcp://0.0.0.0:8080`.
    pub endpoint: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            endpoint: "unix:///csi-data/csi.sock".to_string(),
        }
    }
}

/// Upstream configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Upstream endpoint.
    pub endpoint: String,

    /// Seconds to wait at startup for the upstream to become reachable.
    /// `0` disables the wait.
    pub readiness_timeout_secs: u64,

    /// Declares that HTTP/2 may be sent to the upstream without TLS.
    pub allow_cleartext_h2: bool,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: "unix:///tmp/csi.sock".to_string(),
            readiness_timeout_secs: 60,
            allow_cleartext_h2: true,
        }
    }
}

/// When the Host header is replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum HostRewriteMode {
    /// Never touch Host.
    Off,
    /// Replace Host on every request.
    Always,
    /// Replace Host only when it is not a plain `host[:port]`.
    OnlyIfNonCompliant,
}

impl std::fmt::Display for HostRewriteMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            HostRewriteMode::Off => "off",
            HostRewriteMode::Always => "always",
            HostRewriteMode::OnlyIfNonCompliant => "only-if-non-compliant",
        })
    }
}

/// Host rewrite configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HostRewriteConfig {
    /// Rewrite mode.
    pub mode: HostRewriteMode,

    /// Replacement host, also used as URI authority when the original is unusable.
    pub host: String,
}

impl Default for HostRewriteConfig {
    fn default() -> Self {
        Self {
            mode: HostRewriteMode::Always,
            host: "localhost".to_string(),
        }
    }
}

/// Graceful shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Seconds in-flight work may take to finish after a termination signal.
    pub grace_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { grace_secs: 10 }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}
