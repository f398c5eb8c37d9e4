//! Byte forwarding between a client and the upstream proxy.
//!
//! # Data Flow
//! ```text
//! client ──upload relay──▶ upstream proxy
//! client ◀─download relay── upstream proxy
//! ```
//!
//! # Design Decisions
//! - One task per direction; the coordinator owns both through a `JoinSet`
//! - A failing relay raises a shared abort signal so its sibling stops too
//! - A clean EOF half-closes the opposite socket instead of closing it

pub mod coordinator;
pub mod relay;

pub use coordinator::{ForwardCoordinator, ForwardError, ForwardSummary};
pub use relay::{Direction, Relay, RelayOutcome, RelayReport};
