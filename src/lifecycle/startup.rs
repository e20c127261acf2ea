//! Startup orchestration.
//!
//! # Responsibilities
//! - Resolve both endpoints into the immutable [`BridgeContext`]
//! - Wait for the upstream when a readiness timeout is configured
//! - Bind the listener and hand it to the server
//! - Publish every state transition
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal, nothing is retried
//! - The readiness wait finishes before the listener exists; a shutdown
//!   during the wait ends the run without ever binding
//! - Listeners start last (traffic only when ready)

use std::sync::Arc;

use tokio::sync::watch;

use crate::config::{validate_config, ConfigError, ProxyConfig};
use crate::error::BridgeError;
use crate::http::{BridgeServer, Director};
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::state::{ServerState, StateHandle};
use crate::net::{wait_ready, Endpoint, Listener};

/// Read-only values shared by every component, built once at startup.
#[derive(Debug, Clone)]
pub struct BridgeContext {
    config: Arc<ProxyConfig>,
    listen: Endpoint,
    upstream: Endpoint,
    director: Director,
}

impl BridgeContext {
    /// Validate `config` and resolve both endpoints.
    pub fn from_config(config: ProxyConfig) -> Result<Self, ConfigError> {
        validate_config(&config).map_err(ConfigError::Validation)?;

        let listen = Endpoint::parse(&config.listener.endpoint)?;
        let upstream = Endpoint::parse(&config.upstream.endpoint)?;
        listen.ensure_supported()?;
        upstream.ensure_supported()?;

        let director = Director::new(config.host_rewrite.mode, &config.host_rewrite.host)?;

        Ok(Self {
            config: Arc::new(config),
            listen,
            upstream,
            director,
        })
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn listen(&self) -> &Endpoint {
        &self.listen
    }

    pub fn upstream(&self) -> &Endpoint {
        &self.upstream
    }

    pub fn director(&self) -> &Director {
        &self.director
    }
}

/// Drives the bridge through its states.
#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    shutdown: Shutdown,
    state: StateHandle,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shutdown coordinator; trigger it to begin a graceful shutdown.
    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Watch state transitions.
    pub fn state(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// Run until shutdown. Ends in `Stopped` on success, `Failed` otherwise.
    pub async fn run(&self, config: ProxyConfig) -> Result<(), BridgeError> {
        let result = self.run_to_completion(config).await;
        match &result {
            Ok(()) => self.state.set(ServerState::Stopped),
            Err(e) => {
                tracing::error!(error = %e, "Bridge failed");
                self.state.set(ServerState::Failed);
            }
        }
        result
    }

    async fn run_to_completion(&self, config: ProxyConfig) -> Result<(), BridgeError> {
        self.state.set(ServerState::Initializing);

        let ctx = BridgeContext::from_config(config)?;
        tracing::info!(
            listen = %ctx.listen(),
            upstream = %ctx.upstream(),
            host_rewrite = %ctx.director().mode(),
            "Configuration loaded"
        );

        let timeout_secs = ctx.config().upstream.readiness_timeout_secs;
        if timeout_secs > 0 {
            tokio::select! {
                ready = wait_ready(ctx.upstream(), timeout_secs) => ready?,
                _ = self.shutdown.subscribe().recv() => {
                    tracing::info!("Shutdown requested while waiting for upstream");
                    return Ok(());
                }
            }
        }

        let listener = Listener::bind(ctx.listen()).await?;
        let server = BridgeServer::new(&ctx);

        self.state.set(ServerState::Listening);
        tracing::info!(listen = %ctx.listen(), "Bridge is ready");

        server
            .run(listener, self.shutdown.subscribe(), &self.state)
            .await?;

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }
}
