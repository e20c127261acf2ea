//! HTTP/1.1 `Upgrade: h2c`.
//!
//! # Responsibilities
//! - Recognize a bodiless HTTP/1.1 request asking to switch to h2c
//! - Answer `101 Switching Protocols` and serve the connection as HTTP/2
//! - Answer the request that carried the upgrade on stream 1
//!
//! # Design Decisions
//! - hyper's HTTP/2 server cannot adopt a request that was already parsed,
//!   so stream 1 is replayed to it as HEADERS frames right after the
//!   client's preface SETTINGS
//! - The decoded `HTTP2-Settings` are prepended to the client's first
//!   SETTINGS frame: both apply in order and the client sees one ACK
//! - Requests with a body are served as plain HTTP/1.1

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use bytes::{BufMut, Bytes, BytesMut};
use http_body_util::{BodyExt, Empty};
use hyper::body::Incoming;
use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use hyper::http::request::Parts;
use hyper::http::uri::Authority;
use hyper::service::service_fn;
use hyper::upgrade::Upgraded;
use hyper::{Request, Response, StatusCode, Version};
use hyper_util::rt::{TokioExecutor, TokioIo};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tokio::sync::watch;

use crate::http::director::strip_hop_by_hop;
use crate::http::proxy::{Proxy, ProxyBody};
use crate::net::{ConnectionId, ConnectionTracker, PeerAddr};

/// Request header carrying the client's base64url SETTINGS payload.
pub const HTTP2_SETTINGS: HeaderName = HeaderName::from_static("http2-settings");

const PREFACE_LEN: usize = 24;
const PREFACE: &[u8; PREFACE_LEN] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

const FRAME_HEADER_LEN: usize = 9;
const MAX_FRAME_PAYLOAD: usize = 16_384;
const SETTING_LEN: usize = 6;

const FRAME_HEADERS: u8 = 0x1;
const FRAME_SETTINGS: u8 = 0x4;
const FRAME_CONTINUATION: u8 = 0x9;

const FLAG_END_STREAM: u8 = 0x1;
const FLAG_ACK: u8 = 0x1;
const FLAG_END_HEADERS: u8 = 0x4;

/// The upgraded connection could not be served.
#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("connection upgrade failed: {0}")]
    Upgrade(#[from] hyper::Error),

    #[error("i/o error on upgraded connection: {0}")]
    Io(#[from] io::Error),

    #[error("client did not send the HTTP/2 connection preface")]
    MissingPreface,

    #[error("expected SETTINGS after the preface, got frame type {0:#x}")]
    ExpectedSettings(u8),

    #[error("SETTINGS payload of {0} bytes exceeds the frame size limit")]
    SettingsTooLarge(usize),
}

/// The decoded `HTTP2-Settings` payload when `req` asks for an h2c upgrade
/// the bridge will perform.
pub fn requested_settings<B>(req: &Request<B>) -> Option<Bytes> {
    if req.version() != Version::HTTP_11 {
        return None;
    }

    let headers = req.headers();
    if !has_token(headers, &header::UPGRADE, "h2c")
        || !has_token(headers, &header::CONNECTION, "upgrade")
    {
        return None;
    }

    let bodiless = !headers.contains_key(header::TRANSFER_ENCODING)
        && headers
            .get(header::CONTENT_LENGTH)
            .map_or(true, |v| v.as_bytes() == b"0");
    if !bodiless {
        return None;
    }

    let mut values = headers.get_all(HTTP2_SETTINGS).iter();
    let value = values.next()?;
    if values.next().is_some() {
        return None;
    }
    decode_settings(value)
}

fn has_token(headers: &HeaderMap, name: &HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

fn decode_settings(value: &HeaderValue) -> Option<Bytes> {
    let encoded = value.to_str().ok()?.trim().trim_end_matches('=');
    let decoded = URL_SAFE_NO_PAD.decode(encoded).ok()?;
    (decoded.len() % SETTING_LEN == 0).then(|| Bytes::from(decoded))
}

/// Answer `req` with `101 Switching Protocols` and serve the upgraded
/// connection as HTTP/2 on its own tracked task.
pub fn switch(
    mut req: Request<Incoming>,
    settings: Bytes,
    proxy: Proxy,
    peer: PeerAddr,
    tracker: &ConnectionTracker,
) -> Response<ProxyBody> {
    let on_upgrade = hyper::upgrade::on(&mut req);
    let (parts, _body) = req.into_parts();
    let replay = replay_request(&parts);

    let guard = tracker.track();
    let drain = tracker.drain_receiver();
    tracing::info!(
        connection_id = %guard.id(),
        peer = %peer,
        settings = settings.len() / SETTING_LEN,
        "Upgrading connection to h2c"
    );

    tokio::spawn(async move {
        let connection_id = guard.id();
        let result = match on_upgrade.await {
            Ok(upgraded) => {
                serve_upgraded(upgraded, settings, replay, proxy, peer, drain, connection_id).await
            }
            Err(e) => Err(UpgradeError::Upgrade(e)),
        };
        if let Err(e) = result {
            tracing::debug!(connection_id = %connection_id, error = %e, "Upgraded connection ended with error");
        }
        drop(guard);
    });

    switching_protocols()
}

fn switching_protocols() -> Response<ProxyBody> {
    let mut response = Response::new(Empty::<Bytes>::new().map_err(|never| match never {}).boxed());
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    let headers = response.headers_mut();
    headers.insert(header::CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(header::UPGRADE, HeaderValue::from_static("h2c"));
    response
}

async fn serve_upgraded(
    upgraded: Upgraded,
    settings: Bytes,
    replay: Bytes,
    proxy: Proxy,
    peer: PeerAddr,
    mut drain: watch::Receiver<bool>,
    connection_id: ConnectionId,
) -> Result<(), UpgradeError> {
    let mut io = TokioIo::new(upgraded);

    let mut preface = [0u8; PREFACE_LEN];
    io.read_exact(&mut preface).await?;
    if &preface != PREFACE {
        return Err(UpgradeError::MissingPreface);
    }

    let mut head = [0u8; FRAME_HEADER_LEN];
    io.read_exact(&mut head).await?;
    let kind = head[3];
    if kind != FRAME_SETTINGS || head[4] & FLAG_ACK != 0 {
        return Err(UpgradeError::ExpectedSettings(kind));
    }
    let len = u32::from_be_bytes([0, head[0], head[1], head[2]]) as usize;
    if settings.len() + len > MAX_FRAME_PAYLOAD {
        return Err(UpgradeError::SettingsTooLarge(settings.len() + len));
    }
    let mut client_settings = vec![0u8; len];
    io.read_exact(&mut client_settings).await?;

    let mut merged = BytesMut::with_capacity(settings.len() + len);
    merged.extend_from_slice(&settings);
    merged.extend_from_slice(&client_settings);

    let mut prefix = BytesMut::with_capacity(PREFACE_LEN + FRAME_HEADER_LEN + merged.len() + replay.len());
    prefix.extend_from_slice(PREFACE);
    push_frame(&mut prefix, FRAME_SETTINGS, 0, 0, &merged);
    prefix.extend_from_slice(&replay);

    let io = PrefixedIo {
        prefix: prefix.freeze(),
        inner: io,
    };

    let svc = service_fn(move |req: Request<Incoming>| {
        let proxy = proxy.clone();
        let peer = peer.clone();
        async move { proxy.handle(req, peer).await }
    });
    let conn = hyper::server::conn::http2::Builder::new(TokioExecutor::new())
        .serve_connection(TokioIo::new(io), svc);
    tokio::pin!(conn);

    let mut draining = false;
    loop {
        tokio::select! {
            result = conn.as_mut() => return result.map_err(UpgradeError::from),
            _ = drain.wait_for(|started| *started), if !draining => {
                draining = true;
                tracing::debug!(connection_id = %connection_id, "Gracefully shutting down upgraded connection");
                conn.as_mut().graceful_shutdown();
            }
        }
    }
}

/// HEADERS (and CONTINUATION) frames opening stream 1 with the request
/// that carried the upgrade.
fn replay_request(parts: &Parts) -> Bytes {
    let mut headers = parts.headers.clone();
    headers.remove(HTTP2_SETTINGS);
    strip_hop_by_hop(&mut headers);

    let path = parts
        .uri
        .path_and_query()
        .map_or("/", |p| p.as_str());
    let authority = parts
        .uri
        .authority()
        .cloned()
        .or_else(|| {
            headers
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .and_then(|host| host.parse::<Authority>().ok())
        });

    let mut block = BytesMut::new();
    encode_literal(&mut block, b":method", parts.method.as_str().as_bytes());
    encode_literal(&mut block, b":scheme", b"http");
    encode_literal(&mut block, b":path", path.as_bytes());
    if let Some(authority) = &authority {
        encode_literal(&mut block, b":authority", authority.as_str().as_bytes());
    }
    for (name, value) in &headers {
        encode_literal(&mut block, name.as_str().as_bytes(), value.as_bytes());
    }

    let mut frames = BytesMut::with_capacity(block.len() + FRAME_HEADER_LEN);
    push_header_block(&mut frames, 1, &block);
    frames.freeze()
}

/// HPACK literal header field without indexing, new name, no Huffman.
fn encode_literal(dst: &mut BytesMut, name: &[u8], value: &[u8]) {
    dst.put_u8(0x00);
    encode_string(dst, name);
    encode_string(dst, value);
}

fn encode_string(dst: &mut BytesMut, s: &[u8]) {
    encode_integer(dst, s.len(), 7, 0x00);
    dst.extend_from_slice(s);
}

/// HPACK integer with an N-bit prefix (RFC 7541 §5.1).
fn encode_integer(dst: &mut BytesMut, value: usize, prefix_bits: u8, first: u8) {
    let max = (1usize << prefix_bits) - 1;
    if value < max {
        dst.put_u8(first | value as u8);
        return;
    }
    dst.put_u8(first | max as u8);
    let mut rest = value - max;
    while rest >= 0x80 {
        dst.put_u8((rest & 0x7f) as u8 | 0x80);
        rest >>= 7;
    }
    dst.put_u8(rest as u8);
}

fn push_frame(dst: &mut BytesMut, kind: u8, flags: u8, stream_id: u32, payload: &[u8]) {
    let len = payload.len() as u32;
    dst.extend_from_slice(&len.to_be_bytes()[1..]);
    dst.put_u8(kind);
    dst.put_u8(flags);
    dst.put_u32(stream_id & 0x7fff_ffff);
    dst.extend_from_slice(payload);
}

/// A header block for a bodiless request, split to the default frame size.
fn push_header_block(dst: &mut BytesMut, stream_id: u32, block: &[u8]) {
    let count = block.chunks(MAX_FRAME_PAYLOAD).len();
    for (i, chunk) in block.chunks(MAX_FRAME_PAYLOAD).enumerate() {
        let (kind, mut flags) = if i == 0 {
            (FRAME_HEADERS, FLAG_END_STREAM)
        } else {
            (FRAME_CONTINUATION, 0)
        };
        if i + 1 == count {
            flags |= FLAG_END_HEADERS;
        }
        push_frame(dst, kind, flags, stream_id, chunk);
    }
}

/// Reads `prefix` before the inner stream; writes go straight through.
struct PrefixedIo<T> {
    prefix: Bytes,
    inner: T,
}

impl<T: AsyncRead + Unpin> AsyncRead for PrefixedIo<T> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.prefix.is_empty() {
            let n = self.prefix.len().min(buf.remaining());
            let chunk = self.prefix.split_to(n);
            buf.put_slice(&chunk);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for PrefixedIo<T> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }
}
