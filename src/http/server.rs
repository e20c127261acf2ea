//! Accept loop and per-connection serving.
//!
//! # Responsibilities
//! - Accept connections from the bound listener until shutdown is signalled
//! - Serve each connection on its own task with HTTP/1.1 and HTTP/2 cleartext
//!   (prior knowledge) detected per connection
//! - Switch HTTP/1.1 connections that ask for `Upgrade: h2c`
//! - Route every request through the proxy core
//! - Stop accepting at once on shutdown, then drain with a deadline
//!
//! # Design Decisions
//! - Dropping the listener is the stop-accepting step; for unix sockets it
//!   also unlinks the socket path
//! - Connections receive a graceful shutdown (GOAWAY on HTTP/2) and are never
//!   aborted. Streams that outlive the grace period are reported, not killed

use std::time::Duration;

use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;

use crate::http::proxy::Proxy;
use crate::http::upgrade;
use crate::lifecycle::{BridgeContext, ServerState, ShutdownError, ShutdownSignal, StateHandle};
use crate::net::{BridgeStream, ConnectionTracker, Listener, PeerAddr};

/// Pause after a failed accept so descriptor exhaustion does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// HTTP server for the bridge.
pub struct BridgeServer {
    proxy: Proxy,
    tracker: ConnectionTracker,
    grace: Duration,
}

impl BridgeServer {
    /// Create a server for the given context.
    pub fn new(ctx: &BridgeContext) -> Self {
        Self {
            proxy: Proxy::from_context(ctx),
            tracker: ConnectionTracker::new(),
            grace: Duration::from_secs(ctx.config().shutdown.grace_secs),
        }
    }

    /// Connection tracker shared with every connection task.
    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    /// Serve `listener` until `shutdown` fires, then drain.
    ///
    /// The listener is consumed and closed before draining starts.
    pub async fn run(
        self,
        mut listener: Listener,
        shutdown: ShutdownSignal,
        state: &StateHandle,
    ) -> Result<(), ShutdownError> {
        tracing::info!(address = %listener.local_label(), "Bridge server accepting connections");

        let signal = shutdown.recv();
        tokio::pin!(signal);

        loop {
            tokio::select! {
                _ = &mut signal => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_connection(stream, peer),
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
            }
        }

        state.set(ServerState::ShuttingDown);
        drop(listener);

        let active = self.tracker.active_count();
        tracing::info!(
            active_connections = active,
            grace_secs = self.grace.as_secs(),
            "Stopped accepting, draining connections"
        );
        self.tracker.begin_drain();

        match self.tracker.wait_for_drain(self.grace).await {
            0 => {
                tracing::info!("All connections drained");
                Ok(())
            }
            open => {
                tracing::warn!(open_connections = open, "Grace period ended with connections still open");
                Err(ShutdownError::DrainTimeout {
                    open,
                    grace: self.grace,
                })
            }
        }
    }

    fn spawn_connection(&self, stream: BridgeStream, peer: PeerAddr) {
        let guard = self.tracker.track();
        let proxy = self.proxy.clone();
        let tracker = self.tracker.clone();
        let mut drain = self.tracker.drain_receiver();

        tokio::spawn(async move {
            let connection_id = guard.id();
            tracing::debug!(connection_id = %connection_id, peer = %peer, "Connection accepted");

            let svc = service_fn(move |req: Request<Incoming>| {
                let proxy = proxy.clone();
                let peer = peer.clone();
                let tracker = tracker.clone();
                async move {
                    if let Some(settings) = upgrade::requested_settings(&req) {
                        return Ok(upgrade::switch(req, settings, proxy, peer, &tracker));
                    }
                    proxy.handle(req, peer).await
                }
            });

            let builder = auto::Builder::new(TokioExecutor::new());
            let conn = builder.serve_connection_with_upgrades(TokioIo::new(stream), svc);
            tokio::pin!(conn);

            let mut draining = false;
            loop {
                tokio::select! {
                    result = conn.as_mut() => {
                        if let Err(e) = result {
                            tracing::debug!(connection_id = %connection_id, error = %e, "Connection ended with error");
                        }
                        break;
                    }
                    _ = drain.wait_for(|started| *started), if !draining => {
                        draining = true;
                        tracing::debug!(connection_id = %connection_id, "Gracefully shutting down connection");
                        conn.as_mut().graceful_shutdown();
                    }
                }
            }

            drop(guard);
        });
    }
}
