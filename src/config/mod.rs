//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! optional config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → command line flags / environment override file values (binary)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → shared via Arc inside the BridgeContext
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    HostRewriteConfig, HostRewriteMode, ListenerConfig, LogFormat, ObservabilityConfig,
    ProxyConfig, ShutdownConfig, UpstreamConfig,
};
pub use validation::{validate_config, ValidationError};
