//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (bind with backlog, accept)
//!     → registry.rs (insert, wait while at capacity)
//!     → connection.rs (lifecycle tracking, state machine)
//!     → Hand off to the forward coordinator
//!
//! Connection States:
//!     Accepted → HeadersRead → UpstreamConnected → Relaying
//!         → FinishedOk | FinishedError
//! ```
//!
//! # Design Decisions
//! - No new connection is accepted while the registry is full
//! - A connection leaves the registry only after both relays reported

pub mod connection;
pub mod listener;
pub mod registry;

pub use connection::{Completion, Connection, ConnectionId, ConnectionState};
pub use listener::{Listener, ListenerError};
pub use registry::{ActiveRegistry, RegistryEntry};
