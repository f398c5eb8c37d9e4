//! Configuration validation.
//!
//! Serde handles the syntax; this module checks value ranges and required
//! settings. Every problem is reported, not just the first.

use thiserror::Error;

use crate::config::schema::ProxyConfig;

/// Smallest accepted header or relay buffer.
pub const MIN_BUFFER_BYTES: usize = 100;

/// A single semantic problem with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{field} must be at least {min} (got {actual})")]
    TooSmall {
        field: &'static str,
        min: usize,
        actual: usize,
    },

    #[error("{0} must be between 1 and 65535")]
    InvalidPort(&'static str),

    #[error("observability.metrics_address is not a socket address: {0}")]
    InvalidMetricsAddress(String),
}

/// Validate a configuration, collecting every error.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.address.trim().is_empty() {
        errors.push(ValidationError::Missing("listener.address"));
    }
    if config.listener.max_connections < 1 {
        errors.push(ValidationError::TooSmall {
            field: "listener.max_connections",
            min: 1,
            actual: config.listener.max_connections,
        });
    }

    if config.upstream.host.trim().is_empty() {
        errors.push(ValidationError::Missing("upstream.host"));
    }
    if config.upstream.port == 0 {
        errors.push(ValidationError::InvalidPort("upstream.port"));
    }
    if config.upstream.username.is_empty() {
        errors.push(ValidationError::Missing("upstream.username"));
    }
    if config.upstream.password.is_empty() {
        errors.push(ValidationError::Missing("upstream.password"));
    }

    for (field, actual) in [
        ("limits.max_header_bytes", config.limits.max_header_bytes),
        ("limits.relay_buffer_bytes", config.limits.relay_buffer_bytes),
    ] {
        if actual < MIN_BUFFER_BYTES {
            errors.push(ValidationError::TooSmall {
                field,
                min: MIN_BUFFER_BYTES,
                actual,
            });
        }
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
