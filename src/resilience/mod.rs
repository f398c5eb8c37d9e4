//! Resilience subsystem.
//!
//! # Design Decisions
//! - No retries anywhere: a failed connection is reported, never replayed
//! - A single socket timeout bounds every connect, read and write
//! - Timeout expiry is indistinguishable from other I/O faults

pub mod timeouts;
