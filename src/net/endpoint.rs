//! Endpoint parsing.
//!
//! # Responsibilities
//! - Split `<scheme>://<address>` into a transport kind and an address
//! - Reject unknown schemes and empty addresses
//! - Report whether the current platform can serve a transport kind
//!
//! # Design Decisions
//! - Transport kind is a closed enum; every consumer matches exhaustively
//! - Parsing is pure and deterministic; `Display` reproduces the input

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::net::pipe::NamedPipe;
use crate::net::UnsupportedPlatform;

/// Separator between scheme and address.
const SCHEME_SEPARATOR: &str = "://";

/// Errors produced while parsing an endpoint string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    /// The string has no `://` separator.
    #[error("invalid endpoint format {0:?}: expected <scheme>://<address>")]
    InvalidFormat(String),

    /// The scheme is not one of the supported transports.
    #[error("invalid transport kind {0:?}: expected one of unix, tcp, tcp4, tcp6, npipe")]
    InvalidTransportKind(String),

    /// The address part is empty.
    #[error("endpoint {0:?} has an empty address")]
    EmptyAddress(String),
}

/// Address family restriction for TCP endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TcpFamily {
    /// `tcp`: any resolved address.
    Any,
    /// `tcp4`: IPv4 only.
    V4,
    /// `tcp6`: IPv6 only.
    V6,
}

impl TcpFamily {
    /// Whether a resolved socket address belongs to this family.
    pub fn admits(&self, addr: &std::net::SocketAddr) -> bool {
        match self {
            TcpFamily::Any => true,
            TcpFamily::V4 => addr.is_ipv4(),
            TcpFamily::V6 => addr.is_ipv6(),
        }
    }
}

/// The transport an endpoint is reached through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Unix domain socket; the address is a filesystem path.
    Unix,
    /// TCP socket; the address is `host:port`.
    Tcp(TcpFamily),
    /// Windows named pipe; the address is a pipe path such as `\\.\pipe\name`.
    NamedPipe,
}

impl TransportKind {
    /// The scheme string for this kind.
    pub fn scheme(&self) -> &'static str {
        match self {
            TransportKind::Unix => "unix",
            TransportKind::Tcp(TcpFamily::Any) => "tcp",
            TransportKind::Tcp(TcpFamily::V4) => "tcp4",
            TransportKind::Tcp(TcpFamily::V6) => "tcp6",
            TransportKind::NamedPipe => "npipe",
        }
    }

    fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "unix" => Some(TransportKind::Unix),
            "tcp" => Some(TransportKind::Tcp(TcpFamily::Any)),
            "tcp4" => Some(TransportKind::Tcp(TcpFamily::V4)),
            "tcp6" => Some(TransportKind::Tcp(TcpFamily::V6)),
            "npipe" => Some(TransportKind::NamedPipe),
            _ => None,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

/// A resolved listen or dial target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    kind: TransportKind,
    address: String,
}

impl Endpoint {
    /// Parse an endpoint string of the form `<scheme>://<address>`.
    pub fn parse(raw: &str) -> Result<Self, EndpointError> {
        let (scheme, address) = raw
            .split_once(SCHEME_SEPARATOR)
            .ok_or_else(|| EndpointError::InvalidFormat(raw.to_string()))?;

        let kind = TransportKind::from_scheme(scheme)
            .ok_or_else(|| EndpointError::InvalidTransportKind(scheme.to_string()))?;

        if address.is_empty() {
            return Err(EndpointError::EmptyAddress(raw.to_string()));
        }

        Ok(Self {
            kind,
            address: address.to_string(),
        })
    }

    /// Transport kind.
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Scheme string, exactly as parsed.
    pub fn scheme(&self) -> &'static str {
        self.kind.scheme()
    }

    /// Transport-specific address, exactly as parsed.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Fail if this platform cannot listen on or dial this transport.
    pub fn ensure_supported(&self) -> Result<(), UnsupportedPlatform> {
        match self.kind {
            TransportKind::Tcp(_) => Ok(()),
            TransportKind::Unix => {
                if cfg!(unix) {
                    Ok(())
                } else {
                    Err(UnsupportedPlatform::new(self.kind))
                }
            }
            TransportKind::NamedPipe => NamedPipe::ensure_available(),
        }
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.scheme(), SCHEME_SEPARATOR, self.address)
    }
}
