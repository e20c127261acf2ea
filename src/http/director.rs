//! Request normalization before forwarding.
//!
//! # Responsibilities
//! - Force the outbound scheme to plaintext `http`
//! - Apply the host rewrite mode and record the original host
//! - Strip hop-by-hop headers that must not cross the proxy
//! - Append the TCP peer to `X-Forwarded-For`
//!
//! # Design Decisions
//! - The scheme is rewritten unconditionally: upstream traffic is always
//!   HTTP/2 cleartext, whatever the client connected with
//! - A host that cannot be a URI authority still needs one for the pooled
//!   client; the rewrite host fills in without touching the Host header

use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use hyper::http::uri::{Authority, PathAndQuery, Scheme};
use hyper::{Request, Uri};
use thiserror::Error;

use crate::config::HostRewriteMode;
use crate::net::PeerAddr;

/// Header carrying the original Host when it is rewritten.
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");

/// Header accumulating client addresses.
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Headers scoped to a single connection (RFC 9110 §7.6.1).
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// The configured rewrite host is unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rewrite host {0:?} is not a valid host[:port]")]
pub struct InvalidRewriteHost(pub String);

/// Mutates inbound requests into upstream requests.
#[derive(Debug, Clone)]
pub struct Director {
    mode: HostRewriteMode,
    rewrite_value: HeaderValue,
    rewrite_authority: Authority,
}

impl Director {
    /// Build a director. `rewrite_host` must be a valid URI authority.
    pub fn new(mode: HostRewriteMode, rewrite_host: &str) -> Result<Self, InvalidRewriteHost> {
        let invalid = || InvalidRewriteHost(rewrite_host.to_string());
        let rewrite_authority: Authority = rewrite_host.parse().map_err(|_| invalid())?;
        let rewrite_value = HeaderValue::from_str(rewrite_host).map_err(|_| invalid())?;

        Ok(Self {
            mode,
            rewrite_value,
            rewrite_authority,
        })
    }

    /// Active rewrite mode.
    pub fn mode(&self) -> HostRewriteMode {
        self.mode
    }

    /// Prepare `req` for the upstream.
    pub fn direct<B>(&self, req: &mut Request<B>, peer: &PeerAddr) {
        strip_hop_by_hop(req.headers_mut());

        let original = original_host(req);
        let rewrite = match (&original, self.mode) {
            (_, HostRewriteMode::Off) => false,
            (_, HostRewriteMode::Always) => true,
            (Some(host), HostRewriteMode::OnlyIfNonCompliant) => is_non_compliant(host),
            (None, HostRewriteMode::OnlyIfNonCompliant) => false,
        };

        let authority = if rewrite {
            // Set even when the client sent no host at all.
            let forwarded = original
                .as_deref()
                .and_then(|host| HeaderValue::from_str(host).ok())
                .unwrap_or_else(|| HeaderValue::from_static(""));
            req.headers_mut().insert(X_FORWARDED_HOST, forwarded);
            req.headers_mut()
                .insert(header::HOST, self.rewrite_value.clone());
            self.rewrite_authority.clone()
        } else {
            original
                .as_deref()
                .and_then(|host| host.parse::<Authority>().ok())
                .unwrap_or_else(|| self.rewrite_authority.clone())
        };

        if let Some(ip) = peer.ip() {
            append_forwarded_for(req.headers_mut(), ip);
        }

        let path_and_query = req
            .uri()
            .path_and_query()
            .cloned()
            .unwrap_or_else(|| PathAndQuery::from_static("/"));

        let mut parts = hyper::http::uri::Parts::default();
        parts.scheme = Some(Scheme::HTTP);
        parts.authority = Some(authority);
        parts.path_and_query = Some(path_and_query);
        if let Ok(uri) = Uri::from_parts(parts) {
            *req.uri_mut() = uri;
        }
    }
}

/// The Host the client asked for: the Host header, else the URI authority
/// (HTTP/2 clients usually send only `:authority`).
pub fn original_host<B>(req: &Request<B>) -> Option<String> {
    req.headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| req.uri().authority().map(|a| a.as_str().to_string()))
}

/// A Host that is not a plain `host[:port]` token. HTTP/1.1 clients dialing
/// a unix socket commonly send the socket path here. An HTTP/2 `:authority`
/// of that shape never reaches the director: the h2 codec resets the stream.
pub fn is_non_compliant(host: &str) -> bool {
    host.contains('/') || host.contains('\\')
}

/// Remove hop-by-hop headers, including those named by `Connection`.
/// `TE: trailers` is the one value allowed to pass.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }

    let keep_trailers = headers
        .get_all(header::TE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|v| v.trim().eq_ignore_ascii_case("trailers"));

    for name in HOP_BY_HOP {
        headers.remove(name);
    }

    if keep_trailers {
        headers.insert(header::TE, HeaderValue::from_static("trailers"));
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, ip: std::net::IpAddr) {
    let prior: Vec<&str> = headers
        .get_all(X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();

    let value = if prior.is_empty() {
        ip.to_string()
    } else {
        format!("{}, {}", prior.join(", "), ip)
    };

    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}
