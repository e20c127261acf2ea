//! Outbound connections to an endpoint.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::net::TcpStream;

use crate::net::endpoint::{Endpoint, TcpFamily, TransportKind};
use crate::net::pipe::NamedPipe;
use crate::net::stream::BridgeStream;

/// Open a stream to `endpoint` over its transport.
pub async fn dial(endpoint: &Endpoint) -> io::Result<BridgeStream> {
    match endpoint.kind() {
        TransportKind::Tcp(family) => dial_tcp(endpoint.address(), family)
            .await
            .map(BridgeStream::Tcp),
        TransportKind::Unix => dial_unix(endpoint.address()).await,
        TransportKind::NamedPipe => NamedPipe::dial(endpoint.address()).await,
    }
}

/// Resolve `address`, keep the addresses of `family`, connect to the first
/// that accepts.
pub(crate) async fn dial_tcp(address: &str, family: TcpFamily) -> io::Result<TcpStream> {
    let candidates = resolve(address, family).await?;

    let mut last_err = None;
    for addr in candidates {
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                return Ok(stream);
            }
            Err(e) => last_err = Some(e),
        }
    }

    Err(last_err.unwrap_or_else(|| no_address(address, family)))
}

/// What a resolved address will be used for. Decides what an empty host
/// (`:port`) stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Purpose {
    /// Empty host means every local interface.
    Listen,
    /// Empty host means the local system.
    Dial,
}

/// Resolve a `host:port` string filtered to one address family.
pub(crate) async fn resolve(address: &str, family: TcpFamily) -> io::Result<Vec<SocketAddr>> {
    resolve_for(address, family, Purpose::Dial).await
}

/// Like [`resolve`], with an empty host interpreted for `purpose`.
pub(crate) async fn resolve_for(
    address: &str,
    family: TcpFamily,
    purpose: Purpose,
) -> io::Result<Vec<SocketAddr>> {
    let addrs: Vec<SocketAddr> = match empty_host_port(address) {
        Some(port) => implied_hosts(family, purpose)
            .into_iter()
            .map(|ip| SocketAddr::new(ip, port))
            .collect(),
        None => tokio::net::lookup_host(address)
            .await?
            .filter(|addr| family.admits(addr))
            .collect(),
    };

    if addrs.is_empty() {
        return Err(no_address(address, family));
    }
    Ok(addrs)
}

/// Port of a `:port` address.
fn empty_host_port(address: &str) -> Option<u16> {
    address.strip_prefix(':')?.parse().ok()
}

fn implied_hosts(family: TcpFamily, purpose: Purpose) -> Vec<IpAddr> {
    let (v4, v6) = match purpose {
        Purpose::Listen => (IpAddr::V4(Ipv4Addr::UNSPECIFIED), IpAddr::V6(Ipv6Addr::UNSPECIFIED)),
        Purpose::Dial => (IpAddr::V4(Ipv4Addr::LOCALHOST), IpAddr::V6(Ipv6Addr::LOCALHOST)),
    };
    match (family, purpose) {
        (TcpFamily::V4, _) => vec![v4],
        (TcpFamily::V6, _) => vec![v6],
        // `[::]` is dual-stack where the host allows it; IPv4 is the fallback.
        (TcpFamily::Any, Purpose::Listen) => vec![v6, v4],
        (TcpFamily::Any, Purpose::Dial) => vec![v4, v6],
    }
}

fn no_address(address: &str, family: TcpFamily) -> io::Error {
    io::Error::new(
        io::ErrorKind::AddrNotAvailable,
        format!("{address} has no {family:?} address"),
    )
}

#[cfg(unix)]
async fn dial_unix(path: &str) -> io::Result<BridgeStream> {
    tokio::net::UnixStream::connect(path)
        .await
        .map(BridgeStream::Unix)
}

#[cfg(not(unix))]
async fn dial_unix(_path: &str) -> io::Result<BridgeStream> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        crate::net::UnsupportedPlatform::new(TransportKind::Unix),
    ))
}
