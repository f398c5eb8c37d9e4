//! HTTP header handling.
//!
//! # Data Flow
//! ```text
//! Client socket
//!     → framer.rs (read up to the first blank line)
//!     → headers.rs (ordered HeaderSequence)
//!     → rewrite.rs (inject Proxy-Authorization, force Connection: Close)
//!     → relay to upstream
//!
//! Upstream socket
//!     → framer.rs
//!     → response.rs (407 detection)
//!     → rewrite.rs (force Connection: Close)
//!     → relay to client
//! ```
//!
//! # Design Decisions
//! - Headers are lines, not a map: order and duplicates survive untouched
//! - Rewrites are pure functions, independent of any socket
//! - Bodies are never parsed; everything after the block is opaque

pub mod framer;
pub mod headers;
pub mod response;
pub mod rewrite;

pub use framer::{read_header_block, FramingError};
pub use headers::HeaderSequence;
pub use response::is_proxy_auth_error;
pub use rewrite::{basic_credentials, force_close, inject_auth};
