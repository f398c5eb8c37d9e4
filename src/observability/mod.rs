//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Connection tasks and relays produce:
//!     → logging.rs (structured log events, connection_id on every event)
//!     → metrics.rs (connection counters, relay byte counters)
//!
//! Consumers:
//!     → stdout
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```

pub mod logging;
pub mod metrics;
