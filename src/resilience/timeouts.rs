//! Timeout enforcement.
//!
//! One socket timeout covers connecting, reading and writing on both legs.
//! Expiry surfaces as an ordinary `io::ErrorKind::TimedOut` error, so callers
//! treat it like any other I/O fault.

use std::future::Future;
use std::io;
use std::time::Duration;

/// Run an I/O future under an optional deadline.
pub async fn io_timeout<F, T>(limit: Option<Duration>, fut: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match limit {
        None => fut.await,
        Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
            io::Error::new(
                io::ErrorKind::TimedOut,
                format!("socket timed out after {}ms", limit.as_millis()),
            )
        })?,
    }
}
