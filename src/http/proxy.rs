//! Per-request forwarding.
//!
//! # Responsibilities
//! - Log each inbound request (method, URI, version, headers)
//! - Run the director and hand the request to the forwarding transport
//! - Stream the upstream status, headers and body back unchanged
//! - Map upstream failures to `502 Bad Gateway` for that request only
//!
//! # Design Decisions
//! - Bodies are never buffered in either direction; long-lived streams flow
//!   through frame by frame
//! - No retries: a failed forward is reported, the server keeps running

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use uuid::Uuid;

use crate::http::director::{strip_hop_by_hop, Director};
use crate::http::transport::ForwardingTransport;
use crate::lifecycle::BridgeContext;
use crate::net::PeerAddr;

/// Body type returned to clients.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Composes the director and the forwarding transport.
#[derive(Debug, Clone)]
pub struct Proxy {
    director: Arc<Director>,
    transport: ForwardingTransport,
}

impl Proxy {
    pub fn new(director: Director, transport: ForwardingTransport) -> Self {
        Self {
            director: Arc::new(director),
            transport,
        }
    }

    /// Build the proxy described by the startup context.
    pub fn from_context(ctx: &BridgeContext) -> Self {
        let transport = ForwardingTransport::new(
            ctx.upstream().clone(),
            ctx.config().upstream.allow_cleartext_h2,
        );
        Self::new(ctx.director().clone(), transport)
    }

    /// Forward one request and return the upstream response.
    pub async fn handle(
        &self,
        mut req: Request<Incoming>,
        peer: PeerAddr,
    ) -> Result<Response<ProxyBody>, Infallible> {
        let request_id = Uuid::new_v4();
        let start = Instant::now();

        tracing::info!(
            request_id = %request_id,
            peer = %peer,
            method = %req.method(),
            uri = %req.uri(),
            version = ?req.version(),
            "Proxying request"
        );
        tracing::debug!(request_id = %request_id, headers = ?req.headers(), "Request headers");

        self.director.direct(&mut req, &peer);

        match self.transport.forward(req).await {
            Ok(response) => {
                tracing::info!(
                    request_id = %request_id,
                    status = response.status().as_u16(),
                    latency_ms = start.elapsed().as_millis() as u64,
                    "Upstream responded"
                );

                let (mut parts, body) = response.into_parts();
                strip_hop_by_hop(&mut parts.headers);
                Ok(Response::from_parts(parts, body.boxed()))
            }
            Err(e) => {
                tracing::error!(
                    request_id = %request_id,
                    dial_failure = e.is_dial_failure(),
                    error = %e,
                    "Upstream error"
                );
                Ok(bad_gateway())
            }
        }
    }
}

/// `502 Bad Gateway` with a short plain-text body.
pub fn bad_gateway() -> Response<ProxyBody> {
    let body = Full::new(Bytes::from_static(b"Upstream request failed"))
        .map_err(|never| match never {})
        .boxed();

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::BAD_GATEWAY;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
