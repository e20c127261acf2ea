//! Listener creation for every transport.
//!
//! # Responsibilities
//! - Bind to the configured listen endpoint
//! - Remove a stale unix socket left behind by a previous run
//! - Accept incoming connections as [`BridgeStream`]s
//! - Unlink the unix socket path exactly once when the listener goes away
//!
//! # Design Decisions
//! - Stale-socket policy: only an entry that `lstat` reports as a socket is
//!   removed. A regular file, directory or symlink at the path is left alone
//!   and binding fails with [`ListenError::NotASocket`]
//! - A path that vanishes between `lstat` and removal is not an error
//! - tcp endpoints are bound directly with no pre-cleanup; an empty host
//!   (`tcp://:9000`) binds every interface

use std::io;

use thiserror::Error;
use tokio::net::TcpListener;

use crate::net::dial::{resolve_for, Purpose};
use crate::net::endpoint::{Endpoint, TcpFamily, TransportKind};
use crate::net::pipe::{NamedPipe, PipeListener};
use crate::net::stream::{BridgeStream, PeerAddr};
use crate::net::UnsupportedPlatform;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenError {
    /// Failed to bind to the endpoint.
    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    /// A stale socket was found but could not be removed.
    #[error("failed to remove stale socket {path}: {source}")]
    StaleSocket {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Something other than a socket occupies the unix socket path.
    #[error("refusing to replace {path}: it exists and is not a socket")]
    NotASocket { path: String },

    /// The transport does not exist on this platform.
    #[error(transparent)]
    Unsupported(#[from] UnsupportedPlatform),
}

/// A bound listener on any transport.
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    Unix(UnixSocketListener),
    NamedPipe(PipeListener),
}

impl Listener {
    /// Bind to `endpoint`, cleaning up a stale unix socket first.
    pub async fn bind(endpoint: &Endpoint) -> Result<Self, ListenError> {
        endpoint.ensure_supported()?;

        let listener = match endpoint.kind() {
            TransportKind::Tcp(family) => bind_tcp(endpoint, family).await.map(Listener::Tcp)?,
            TransportKind::Unix => UnixSocketListener::bind(endpoint.address()).map(Listener::Unix)?,
            TransportKind::NamedPipe => NamedPipe::listen(endpoint.address())
                .map(Listener::NamedPipe)
                .map_err(|source| ListenError::Bind {
                    endpoint: endpoint.to_string(),
                    source,
                })?,
        };

        tracing::info!(
            endpoint = %endpoint,
            address = %listener.local_label(),
            "Listener bound"
        );

        Ok(listener)
    }

    /// Accept the next connection.
    pub async fn accept(&mut self) -> io::Result<(BridgeStream, PeerAddr)> {
        match self {
            Listener::Tcp(inner) => {
                let (stream, addr) = inner.accept().await?;
                let _ = stream.set_nodelay(true);
                Ok((BridgeStream::Tcp(stream), PeerAddr::Tcp(addr)))
            }
            Listener::Unix(inner) => inner.accept().await,
            Listener::NamedPipe(inner) => {
                let stream = inner.accept().await?;
                Ok((stream, PeerAddr::NamedPipe))
            }
        }
    }

    /// Human readable description of the bound address.
    ///
    /// For tcp this reports the actual port, which matters when binding port 0.
    pub fn local_label(&self) -> String {
        match self {
            Listener::Tcp(inner) => match inner.local_addr() {
                Ok(addr) => format!("tcp://{addr}"),
                Err(_) => "tcp://<unknown>".to_string(),
            },
            Listener::Unix(inner) => format!("unix://{}", inner.path()),
            Listener::NamedPipe(inner) => format!("npipe://{}", inner.address()),
        }
    }

    /// Local socket address of a tcp listener.
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        match self {
            Listener::Tcp(inner) => inner.local_addr().ok(),
            Listener::Unix(_) | Listener::NamedPipe(_) => None,
        }
    }
}

async fn bind_tcp(endpoint: &Endpoint, family: TcpFamily) -> Result<TcpListener, ListenError> {
    let bind_err = |source| ListenError::Bind {
        endpoint: endpoint.to_string(),
        source,
    };

    let mut last_err = None;
    for addr in resolve_for(endpoint.address(), family, Purpose::Listen)
        .await
        .map_err(bind_err)?
    {
        match TcpListener::bind(addr).await {
            Ok(listener) => return Ok(listener),
            Err(e) => last_err = Some(e),
        }
    }

    Err(bind_err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::AddrNotAvailable, "no address to bind")
    })))
}

#[cfg(unix)]
pub use unix::UnixSocketListener;

#[cfg(not(unix))]
pub use fallback::UnixSocketListener;

#[cfg(unix)]
mod unix {
    use std::io;
    use std::os::unix::fs::FileTypeExt;

    use tokio::net::UnixListener;

    use super::ListenError;
    use crate::net::stream::{BridgeStream, PeerAddr};

    /// A unix listener that owns its socket path.
    #[derive(Debug)]
    pub struct UnixSocketListener {
        inner: UnixListener,
        path: String,
    }

    impl UnixSocketListener {
        pub fn bind(path: &str) -> Result<Self, ListenError> {
            remove_stale_socket(path)?;

            let inner = UnixListener::bind(path).map_err(|source| ListenError::Bind {
                endpoint: format!("unix://{path}"),
                source,
            })?;

            Ok(Self {
                inner,
                path: path.to_string(),
            })
        }

        pub async fn accept(&self) -> io::Result<(BridgeStream, PeerAddr)> {
            let (stream, _) = self.inner.accept().await?;
            Ok((BridgeStream::Unix(stream), PeerAddr::Unix))
        }

        pub fn path(&self) -> &str {
            &self.path
        }
    }

    impl Drop for UnixSocketListener {
        fn drop(&mut self) {
            match std::fs::remove_file(&self.path) {
                Ok(()) => tracing::debug!(path = %self.path, "Removed listen socket"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(path = %self.path, error = %e, "Failed to remove listen socket"),
            }
        }
    }

    /// Remove `path` if it is a socket left over from a previous run.
    pub(super) fn remove_stale_socket(path: &str) -> Result<(), ListenError> {
        let meta = match std::fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(source) => {
                return Err(ListenError::StaleSocket {
                    path: path.to_string(),
                    source,
                })
            }
        };

        if !meta.file_type().is_socket() {
            return Err(ListenError::NotASocket {
                path: path.to_string(),
            });
        }

        tracing::info!(path, "Removing existing listen socket");
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ListenError::StaleSocket {
                path: path.to_string(),
                source,
            }),
        }
    }
}

#[cfg(not(unix))]
mod fallback {
    use std::io;

    use super::ListenError;
    use crate::net::endpoint::TransportKind;
    use crate::net::stream::{BridgeStream, PeerAddr};
    use crate::net::UnsupportedPlatform;

    /// Never constructed on this platform.
    #[derive(Debug)]
    pub enum UnixSocketListener {}

    impl UnixSocketListener {
        pub fn bind(_path: &str) -> Result<Self, ListenError> {
            Err(UnsupportedPlatform::new(TransportKind::Unix).into())
        }

        pub async fn accept(&self) -> io::Result<(BridgeStream, PeerAddr)> {
            match *self {}
        }

        pub fn path(&self) -> &str {
            match *self {}
        }
    }
}
