//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! proxyauth.toml
//!     → loader.rs (parse, environment overrides for credentials)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → stored in ArcSwap, one snapshot taken per accepted connection
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads + validates
//!     → server swaps the shared Arc<ProxyConfig>
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Listener address, port and backlog only apply at startup

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    LimitsConfig, ListenerConfig, ObservabilityConfig, PolicyConfig, ProxyConfig, TimeoutConfig,
    UpstreamConfig,
};
pub use validation::{validate_config, ValidationError};
