//! h2c bridge
//!
//! Terminates HTTP/1.1 and HTTP/2 on a local endpoint and forwards every
//! request as cleartext HTTP/2 to a single upstream endpoint.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────┐
//!                     │                  H2C BRIDGE                  │
//!                     │                                              │
//!   Client Request    │  ┌──────────┐   ┌─────────┐   ┌──────────┐  │
//!   ──────────────────┼─▶│   net    │──▶│  http   │──▶│ director │  │
//!   unix / tcp / pipe │  │ listener │   │ server  │   │  (Host)  │  │
//!                     │  └──────────┘   └─────────┘   └────┬─────┘  │
//!                     │                                    ▼        │
//!   Client Response   │  ┌──────────┐   ┌─────────┐   ┌──────────┐  │
//!   ◀─────────────────┼──│  proxy   │◀──│  h2c    │◀──│ net dial │◀─┼── Upstream
//!                     │  │ response │   │transport│   │          │  │
//!                     │  └──────────┘   └─────────┘   └──────────┘  │
//!                     │                                              │
//!                     │   lifecycle: readiness → listen → drain      │
//!                     └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use h2c_bridge::config::{load_config, HostRewriteMode, LogFormat, ProxyConfig};
use h2c_bridge::lifecycle::{spawn_signal_listener, Lifecycle};
use h2c_bridge::observability::logging;
use h2c_bridge::BridgeError;

#[derive(Debug, Parser)]
#[command(name = "h2c-bridge")]
#[command(about = "Forward HTTP/1.1 and HTTP/2 requests to an h2c upstream", long_about = None)]
struct Cli {
    /// Optional TOML file; flags and environment override its values
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen endpoint, e.g. unix:///csi-data/csi.sock
    #[arg(long, env = "BIND_TO")]
    listen: Option<String>,

    /// Upstream endpoint, e.g. unix:///tmp/csi.sock
    #[arg(long, env = "PROXY_TO")]
    upstream: Option<String>,

    /// Seconds to wait for the upstream at startup (0 disables the wait)
    #[arg(long, env = "PROXY_TO_INITIAL_TIMEOUT")]
    readiness_timeout: Option<u64>,

    /// When to replace the Host header
    #[arg(long, env = "REWRITE_HOST_MODE", value_enum)]
    host_rewrite: Option<HostRewriteMode>,

    /// Legacy switch: "1" always rewrites, anything else disables rewriting
    #[arg(long = "legacy-rewrite-host", env = "REWRITE_HOST", hide = true)]
    legacy_rewrite_host: Option<String>,

    /// Replacement Host value
    #[arg(long, env = "REWRITE_HOST_NAME")]
    rewrite_host: Option<String>,

    /// Seconds in-flight requests may take to finish on shutdown
    #[arg(long, env = "SHUTDOWN_GRACE_SECS")]
    shutdown_grace: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum)]
    log_format: Option<LogFormat>,

    /// Do not declare cleartext HTTP/2 to the upstream
    #[arg(long)]
    no_cleartext_h2: bool,
}

impl Cli {
    /// Lay flag and environment values over `config`.
    fn apply(self, mut config: ProxyConfig) -> ProxyConfig {
        if let Some(listen) = self.listen {
            config.listener.endpoint = listen;
        }
        if let Some(upstream) = self.upstream {
            config.upstream.endpoint = upstream;
        }
        if let Some(secs) = self.readiness_timeout {
            config.upstream.readiness_timeout_secs = secs;
        }
        if let Some(mode) = self
            .host_rewrite
            .or_else(|| self.legacy_rewrite_host.as_deref().map(legacy_mode))
        {
            config.host_rewrite.mode = mode;
        }
        if let Some(host) = self.rewrite_host {
            config.host_rewrite.host = host;
        }
        if let Some(secs) = self.shutdown_grace {
            config.shutdown.grace_secs = secs;
        }
        if let Some(level) = self.log_level {
            config.observability.log_level = level;
        }
        if let Some(format) = self.log_format {
            config.observability.log_format = format;
        }
        if self.no_cleartext_h2 {
            config.upstream.allow_cleartext_h2 = false;
        }
        config
    }
}

fn legacy_mode(value: &str) -> HostRewriteMode {
    if value == "1" {
        HostRewriteMode::Always
    } else {
        HostRewriteMode::Off
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let base = match cli.config.as_deref().map(load_config).transpose() {
        Ok(file) => file.unwrap_or_default(),
        Err(e) => {
            eprintln!("h2c-bridge: failed to load config: {e}");
            return ExitCode::from(BridgeError::from(e).exit_code());
        }
    };
    let config = cli.apply(base);

    if let Err(e) = logging::init(&config.observability) {
        eprintln!("h2c-bridge: failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "h2c-bridge starting");

    let lifecycle = Lifecycle::new();
    let result = match spawn_signal_listener(lifecycle.shutdown().clone()) {
        Ok(_signals) => lifecycle.run(config).await,
        Err(e) => Err(BridgeError::Signal(e)),
    };

    let code = match &result {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(error = %e, "Fatal error");
            e.exit_code()
        }
    };
    tracing::info!(exit_code = code, "Exiting");
    ExitCode::from(code)
}
