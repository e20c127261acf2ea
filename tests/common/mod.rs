//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::client::conn::{http1, http2};
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::{TcpStream, UnixListener, UnixStream};
use tokio::task::JoinHandle;

use h2c_bridge::config::ProxyConfig;
use h2c_bridge::lifecycle::{Lifecycle, ServerState};
use h2c_bridge::BridgeError;

/// Header carrying the host the upstream saw.
pub const SEEN_HOST: &str = "x-seen-host";
/// Header carrying the `X-Forwarded-Host` the upstream saw.
pub const SEEN_FORWARDED_HOST: &str = "x-seen-forwarded-host";
/// Header carrying the `X-Forwarded-For` the upstream saw.
pub const SEEN_FORWARDED_FOR: &str = "x-seen-forwarded-for";
/// Request header asking the upstream to wait before answering.
pub const DELAY_MS: &str = "x-delay-ms";
/// Response body size of `/large`.
pub const LARGE_BODY_LEN: usize = 256 * 1024;

/// Unique socket path in the temp directory.
pub fn temp_socket(prefix: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{prefix}-{}.sock", uuid::Uuid::new_v4().simple()))
}

/// Bridge config listening on `listen` and forwarding to `upstream`.
pub fn bridge_config(listen: &Path, upstream: &Path) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.endpoint = format!("unix://{}", listen.display());
    config.upstream.endpoint = format!("unix://{}", upstream.display());
    config.upstream.readiness_timeout_secs = 0;
    config.shutdown.grace_secs = 5;
    config
}

/// Deterministic payload for `/large`.
pub fn large_body() -> Bytes {
    (0..LARGE_BODY_LEN).map(|i| (i % 251) as u8).collect()
}

async fn upstream_handler(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    if let Some(ms) = req
        .headers()
        .get(DELAY_MS)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
    {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    let seen_host = req
        .uri()
        .authority()
        .map(|a| a.to_string())
        .or_else(|| {
            req.headers()
                .get(hyper::header::HOST)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .unwrap_or_default();
    let echo = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string()
    };
    let forwarded = echo("x-forwarded-host");
    let forwarded_for = echo("x-forwarded-for");

    let (status, body) = match req.uri().path() {
        "/large" => (StatusCode::CREATED, large_body()),
        _ => (StatusCode::OK, Bytes::from_static(b"hello from upstream")),
    };

    let response = Response::builder()
        .status(status)
        .header(SEEN_HOST, seen_host)
        .header(SEEN_FORWARDED_HOST, forwarded)
        .header(SEEN_FORWARDED_FOR, forwarded_for)
        .header("x-upstream", "h2c")
        .body(Full::new(body))
        .unwrap();
    Ok(response)
}

/// Serve h2c (prior knowledge) on a unix socket at `path`.
pub async fn spawn_h2c_upstream(path: &Path) -> JoinHandle<()> {
    let listener = UnixListener::bind(path).unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _ = hyper::server::conn::http2::Builder::new(TokioExecutor::new())
                    .serve_connection(TokioIo::new(stream), service_fn(upstream_handler))
                    .await;
            });
        }
    })
}

/// HTTP/2 prior-knowledge client over the unix socket at `path`.
pub async fn h2_client(path: &Path) -> http2::SendRequest<Full<Bytes>> {
    h2_handshake(UnixStream::connect(path).await.unwrap()).await
}

/// HTTP/2 prior-knowledge client over TCP.
pub async fn h2_tcp_client(addr: &str) -> http2::SendRequest<Full<Bytes>> {
    h2_handshake(TcpStream::connect(addr).await.unwrap()).await
}

async fn h2_handshake<S>(stream: S) -> http2::SendRequest<Full<Bytes>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sender, conn) = http2::handshake(TokioExecutor::new(), TokioIo::new(stream))
        .await
        .unwrap();
    tokio::spawn(async move {
        let _ = conn.await;
    });
    sender
}

/// HTTP/1.1 client over the unix socket at `path`.
pub async fn http1_client(path: &Path) -> http1::SendRequest<Full<Bytes>> {
    http1_handshake(UnixStream::connect(path).await.unwrap()).await
}

/// HTTP/1.1 client over TCP.
pub async fn http1_tcp_client(addr: &str) -> http1::SendRequest<Full<Bytes>> {
    http1_handshake(TcpStream::connect(addr).await.unwrap()).await
}

async fn http1_handshake<S>(stream: S) -> http1::SendRequest<Full<Bytes>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sender, conn) = http1::handshake(TokioIo::new(stream)).await.unwrap();
    tokio::spawn(async move {
        let _ = conn.await;
    });
    sender
}

/// A loopback TCP port that was free a moment ago.
pub fn free_tcp_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Empty-bodied GET.
pub fn get(uri: &str) -> Request<Full<Bytes>> {
    Request::get(uri).body(Full::new(Bytes::new())).unwrap()
}

/// A running bridge.
pub struct RunningBridge {
    pub lifecycle: Lifecycle,
    pub task: JoinHandle<Result<(), BridgeError>>,
}

impl RunningBridge {
    /// Trigger shutdown and wait for the lifecycle to finish.
    pub async fn stop(self) -> Result<(), BridgeError> {
        self.lifecycle.shutdown().trigger();
        tokio::time::timeout(Duration::from_secs(15), self.task)
            .await
            .expect("bridge did not stop in time")
            .unwrap()
    }
}

/// Run the bridge and wait until it is listening.
pub async fn start_bridge(config: ProxyConfig) -> RunningBridge {
    let lifecycle = Lifecycle::new();
    let mut state = lifecycle.state();

    let runner = lifecycle.clone();
    let task = tokio::spawn(async move { runner.run(config).await });

    tokio::time::timeout(
        Duration::from_secs(10),
        state.wait_for(|s| *s == ServerState::Listening || s.is_terminal()),
    )
    .await
    .expect("bridge did not start in time")
    .unwrap();
    assert_eq!(*state.borrow(), ServerState::Listening);

    RunningBridge { lifecycle, task }
}

/// HTTP/2 client connection preface.
pub const H2_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

pub const FRAME_DATA: u8 = 0x0;
pub const FRAME_HEADERS: u8 = 0x1;
pub const FRAME_RST_STREAM: u8 = 0x3;
pub const FRAME_SETTINGS: u8 = 0x4;
pub const FLAG_END_STREAM: u8 = 0x1;
pub const FLAG_END_HEADERS: u8 = 0x4;

/// One raw HTTP/2 frame.
#[derive(Debug)]
pub struct Frame {
    pub kind: u8,
    pub flags: u8,
    pub stream_id: u32,
    pub payload: Vec<u8>,
}

/// Encode a raw HTTP/2 frame.
pub fn encode_frame(kind: u8, flags: u8, stream_id: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = (payload.len() as u32).to_be_bytes()[1..].to_vec();
    out.push(kind);
    out.push(flags);
    out.extend_from_slice(&stream_id.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Read the next raw HTTP/2 frame.
pub async fn read_frame<S: AsyncRead + Unpin>(stream: &mut S) -> Frame {
    let mut head = [0u8; 9];
    stream.read_exact(&mut head).await.unwrap();
    let len = u32::from_be_bytes([0, head[0], head[1], head[2]]) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await.unwrap();
    Frame {
        kind: head[3],
        flags: head[4],
        stream_id: u32::from_be_bytes([head[5], head[6], head[7], head[8]]) & 0x7fff_ffff,
        payload,
    }
}

/// Read frames until one matches `wanted`, skipping the rest.
pub async fn read_until<S, F>(stream: &mut S, mut wanted: F) -> Frame
where
    S: AsyncRead + Unpin,
    F: FnMut(&Frame) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let frame = read_frame(stream).await;
            if wanted(&frame) {
                return frame;
            }
        }
    })
    .await
    .expect("expected frame never arrived")
}

/// Read an HTTP/1.1 response head, up to and including the blank line.
pub async fn read_http1_head<S: AsyncRead + Unpin>(stream: &mut S) -> String {
    let mut head = Vec::new();
    while !head.ends_with(b"\r\n\r\n") {
        head.push(stream.read_u8().await.unwrap());
    }
    String::from_utf8(head).unwrap()
}
