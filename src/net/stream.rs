//! Duplex byte streams over every supported transport.
//!
//! Accepted and dialed connections are both carried as [`BridgeStream`], so
//! the HTTP layer never sees which transport is underneath. Transports the
//! platform lacks are represented by the uninhabited [`Unavailable`] type:
//! their variants exist everywhere but can never be constructed.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use hyper_util::client::legacy::connect::{Connected, Connection};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

/// Stream type for a transport that does not exist on this platform.
#[derive(Debug)]
pub enum Unavailable {}

impl AsyncRead for Unavailable {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match *self {}
    }
}

impl AsyncWrite for Unavailable {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match *self {}
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match *self {}
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match *self {}
    }
}

#[cfg(unix)]
pub type UnixStream = tokio::net::UnixStream;
#[cfg(not(unix))]
pub type UnixStream = Unavailable;

#[cfg(windows)]
pub type PipeServerStream = tokio::net::windows::named_pipe::NamedPipeServer;
#[cfg(not(windows))]
pub type PipeServerStream = Unavailable;

#[cfg(windows)]
pub type PipeClientStream = tokio::net::windows::named_pipe::NamedPipeClient;
#[cfg(not(windows))]
pub type PipeClientStream = Unavailable;

/// A connected stream on any transport.
#[derive(Debug)]
pub enum BridgeStream {
    Tcp(TcpStream),
    Unix(UnixStream),
    /// Server end of a named pipe, produced by accepting.
    PipeServer(PipeServerStream),
    /// Client end of a named pipe, produced by dialing.
    PipeClient(PipeClientStream),
}

impl AsyncRead for BridgeStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BridgeStream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            BridgeStream::Unix(s) => Pin::new(s).poll_read(cx, buf),
            BridgeStream::PipeServer(s) => Pin::new(s).poll_read(cx, buf),
            BridgeStream::PipeClient(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for BridgeStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            BridgeStream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            BridgeStream::Unix(s) => Pin::new(s).poll_write(cx, buf),
            BridgeStream::PipeServer(s) => Pin::new(s).poll_write(cx, buf),
            BridgeStream::PipeClient(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            BridgeStream::Tcp(s) => Pin::new(s).poll_write_vectored(cx, bufs),
            BridgeStream::Unix(s) => Pin::new(s).poll_write_vectored(cx, bufs),
            BridgeStream::PipeServer(s) => Pin::new(s).poll_write_vectored(cx, bufs),
            BridgeStream::PipeClient(s) => Pin::new(s).poll_write_vectored(cx, bufs),
        }
    }

    fn is_write_vectored(&self) -> bool {
        match self {
            BridgeStream::Tcp(s) => s.is_write_vectored(),
            BridgeStream::Unix(s) => s.is_write_vectored(),
            BridgeStream::PipeServer(s) => s.is_write_vectored(),
            BridgeStream::PipeClient(s) => s.is_write_vectored(),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BridgeStream::Tcp(s) => Pin::new(s).poll_flush(cx),
            BridgeStream::Unix(s) => Pin::new(s).poll_flush(cx),
            BridgeStream::PipeServer(s) => Pin::new(s).poll_flush(cx),
            BridgeStream::PipeClient(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            BridgeStream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            BridgeStream::Unix(s) => Pin::new(s).poll_shutdown(cx),
            BridgeStream::PipeServer(s) => Pin::new(s).poll_shutdown(cx),
            BridgeStream::PipeClient(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

/// Dialed upstream streams carry no negotiated protocol: HTTP/2 is spoken by
/// prior knowledge, never selected through ALPN.
impl Connection for BridgeStream {
    fn connected(&self) -> Connected {
        Connected::new()
    }
}

/// Remote side of an accepted connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerAddr {
    Tcp(std::net::SocketAddr),
    /// Unix peers are almost always unnamed.
    Unix,
    NamedPipe,
}

impl PeerAddr {
    /// Peer IP address, when the transport has one.
    pub fn ip(&self) -> Option<std::net::IpAddr> {
        match self {
            PeerAddr::Tcp(addr) => Some(addr.ip()),
            PeerAddr::Unix | PeerAddr::NamedPipe => None,
        }
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerAddr::Tcp(addr) => write!(f, "{addr}"),
            PeerAddr::Unix => f.write_str("unix:@"),
            PeerAddr::NamedPipe => f.write_str("npipe:@"),
        }
    }
}
