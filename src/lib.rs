//! Authenticating forward proxy library.
//!
//! Accepts plain HTTP proxy connections, adds `Proxy-Authorization: Basic`
//! credentials to each request header block and relays the connection to an
//! upstream proxy.

pub mod config;
pub mod forward;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod resilience;
pub mod server;

pub use config::schema::ProxyConfig;
pub use lifecycle::Shutdown;
pub use server::{ProxyServer, ServerError};
