//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_connections_total` (counter): finished connections by status
//! - `proxy_active_connections` (gauge): connections in the registry
//! - `proxy_connection_duration_seconds` (histogram): accept to finish
//! - `proxy_relay_bytes_total` (counter): body bytes relayed by direction
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and serve it over HTTP at `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint started"),
        Err(e) => tracing::error!(error = %e, "Failed to start metrics endpoint"),
    }
}

pub fn record_connection_opened() {
    metrics::gauge!("proxy_active_connections").increment(1.0);
}

pub fn record_connection_finished(succeeded: bool, elapsed: Duration) {
    let status = if succeeded { "ok" } else { "error" };
    metrics::gauge!("proxy_active_connections").decrement(1.0);
    metrics::counter!("proxy_connections_total", "status" => status).increment(1);
    metrics::histogram!("proxy_connection_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn record_relay_bytes(direction: &'static str, bytes: u64) {
    metrics::counter!("proxy_relay_bytes_total", "direction" => direction).increment(bytes);
}
