//! HTTP/2 cleartext bridge library.
//!
//! Accepts HTTP/1.1 and HTTP/2 requests on a unix socket, TCP port or
//! Windows named pipe and forwards them as h2c to a single upstream endpoint.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;

pub use config::schema::ProxyConfig;
pub use error::BridgeError;
pub use http::BridgeServer;
pub use lifecycle::{Lifecycle, Shutdown};
