//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! BridgeStream (tcp / unix / npipe)
//!     → server.rs (accept loop, HTTP/1.1 or h2c per connection)
//!     → upgrade.rs (HTTP/1.1 `Upgrade: h2c` switched to HTTP/2)
//!     → proxy.rs (log, direct, forward, stream back)
//!     → director.rs (scheme = http, host rewrite, hop-by-hop removal)
//!     → transport.rs (pooled HTTP/2 client, dial hook to the upstream)
//!     → Upstream response streamed to the client
//! ```

pub mod director;
pub mod proxy;
pub mod server;
pub mod transport;
pub mod upgrade;

pub use director::{Director, X_FORWARDED_FOR, X_FORWARDED_HOST};
pub use proxy::{Proxy, ProxyBody};
pub use server::BridgeServer;
pub use transport::{ForwardError, ForwardingTransport, UpstreamConnector};
pub use upgrade::UpgradeError;
