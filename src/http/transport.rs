//! Forwarding transport: HTTP/2 cleartext to a fixed upstream endpoint.
//!
//! # Responsibilities
//! - Hold the pooled HTTP/2 client used for every upstream request
//! - Supply the dial hook that always reaches the configured upstream
//!
//! # Design Decisions
//! - The client is built `http2_only`, so it speaks HTTP/2 by prior knowledge
//!   over whatever stream the connector returns. There is no TLS anywhere:
//!   the connector is a protocol-downgrade hook, not a TLS emulation
//! - The connector ignores the URI it is handed. The client believes it is
//!   dialing `http://<authority>`; the hook always opens the upstream
//!   endpoint, which may be a unix socket or named pipe
//! - Sending HTTP/2 in cleartext must be declared explicitly through
//!   `allow_cleartext_h2`. Without it the transport refuses to forward
//! - Connection pooling and lifetime belong to the client; the proxy never
//!   manages upstream connections directly

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use hyper::body::{Body, Incoming};
use hyper::{Request, Response, Uri, Version};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use thiserror::Error;

use crate::net::{dial, BridgeStream, Endpoint};

/// Errors from forwarding a single request. Always local to that request.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// Cleartext HTTP/2 was not declared allowed, so nothing was sent.
    #[error("cleartext HTTP/2 to the upstream is not allowed")]
    CleartextNotAllowed,

    /// The upstream could not be dialed or the exchange failed.
    #[error("upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),
}

impl ForwardError {
    /// Whether the failure happened while dialing the upstream.
    pub fn is_dial_failure(&self) -> bool {
        match self {
            ForwardError::CleartextNotAllowed => false,
            ForwardError::Upstream(e) => e.is_connect(),
        }
    }
}

/// Dial hook handed to the HTTP/2 client.
#[derive(Debug, Clone)]
pub struct UpstreamConnector {
    upstream: Arc<Endpoint>,
}

impl UpstreamConnector {
    pub fn new(upstream: Endpoint) -> Self {
        Self {
            upstream: Arc::new(upstream),
        }
    }

    /// The endpoint every dial goes to.
    pub fn upstream(&self) -> &Endpoint {
        &self.upstream
    }
}

impl tower::Service<Uri> for UpstreamConnector {
    type Response = TokioIo<BridgeStream>;
    type Error = io::Error;
    type Future = Pin<Box<dyn Future<Output = io::Result<Self::Response>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, believed: Uri) -> Self::Future {
        let upstream = Arc::clone(&self.upstream);
        Box::pin(async move {
            tracing::debug!(believed = %believed, upstream = %upstream, "Dialing upstream");
            match dial(&upstream).await {
                Ok(stream) => Ok(TokioIo::new(stream)),
                Err(e) => {
                    tracing::warn!(upstream = %upstream, error = %e, "Upstream dial failed");
                    Err(e)
                }
            }
        })
    }
}

/// Pooled HTTP/2 cleartext client bound to one upstream endpoint.
#[derive(Debug)]
pub struct ForwardingTransport<B = Incoming> {
    client: Client<UpstreamConnector, B>,
    allow_cleartext_h2: bool,
}

impl<B> Clone for ForwardingTransport<B> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            allow_cleartext_h2: self.allow_cleartext_h2,
        }
    }
}

impl<B> ForwardingTransport<B>
where
    B: Body<Data = Bytes> + Send + 'static + Unpin,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    /// Build a transport to `upstream`. `allow_cleartext_h2` is the explicit
    /// declaration that HTTP/2 may be spoken without TLS.
    pub fn new(upstream: Endpoint, allow_cleartext_h2: bool) -> Self {
        let client = Client::builder(TokioExecutor::new())
            .http2_only(true)
            .timer(TokioTimer::new())
            .pool_timer(TokioTimer::new())
            .build(UpstreamConnector::new(upstream));

        Self {
            client,
            allow_cleartext_h2,
        }
    }

    /// Whether cleartext HTTP/2 has been declared allowed.
    pub fn allows_cleartext_h2(&self) -> bool {
        self.allow_cleartext_h2
    }

    /// Send `req` upstream and return the response with its body unread.
    pub async fn forward(&self, mut req: Request<B>) -> Result<Response<Incoming>, ForwardError> {
        if !self.allow_cleartext_h2 {
            return Err(ForwardError::CleartextNotAllowed);
        }
        *req.version_mut() = Version::HTTP_2;
        Ok(self.client.request(req).await?)
    }
}
