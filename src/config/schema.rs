//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the authenticating proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ProxyConfig {
    /// Local listener (address, port, backlog, concurrency cap).
    pub listener: ListenerConfig,

    /// Upstream proxy and the credentials presented to it.
    pub upstream: UpstreamConfig,

    /// Socket timeouts.
    pub timeouts: TimeoutConfig,

    /// Header block and relay buffer limits.
    pub limits: LimitsConfig,

    /// Header rewrite and failure policies.
    pub policy: PolicyConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Local address or host name to listen on. A loopback address keeps the
    /// proxy reachable only from the local machine.
    pub address: String,

    /// TCP port to listen on (0 picks an ephemeral port).
    pub port: u16,

    /// Number of pending connections the OS may queue.
    pub backlog: u32,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.127".to_string(),
            port: 8080,
            backlog: 50,
            max_connections: 20,
        }
    }
}

/// Upstream proxy configuration.
#[derive(Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Name or IP address of the upstream proxy.
    pub host: String,

    /// TCP port of the upstream proxy.
    pub port: u16,

    /// Username sent in `Proxy-Authorization`.
    pub username: String,

    /// Password sent in `Proxy-Authorization`.
    pub password: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 8080,
            username: String::new(),
            password: String::new(),
        }
    }
}

impl std::fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Timeout in milliseconds for connecting, reading and writing on both
    /// the client and the upstream socket. Zero disables the timeout.
    pub socket_ms: u64,
}

impl TimeoutConfig {
    /// The socket timeout, or `None` when disabled.
    pub fn socket(&self) -> Option<Duration> {
        (self.socket_ms > 0).then(|| Duration::from_millis(self.socket_ms))
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { socket_ms: 180_000 }
    }
}

/// Size limits.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest accepted header block, terminator included.
    pub max_header_bytes: usize,

    /// Size of each relay buffer.
    pub relay_buffer_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_header_bytes: 8 * 1024,
            relay_buffer_bytes: 8 * 1024,
        }
    }
}

/// Header rewrite and failure policies.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PolicyConfig {
    /// Strip keep-alive headers and send `Connection: Close` on both legs.
    pub connection_close: bool,

    /// Stop the whole proxy on an upstream `407`, so repeated attempts with a
    /// wrong password cannot lock the account.
    pub stop_on_proxy_auth_error: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            connection_close: true,
            stop_on_proxy_auth_error: true,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log captured header blocks and per-connection details.
    pub debug: bool,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            debug: false,
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = ProxyConfig::default();
        assert_eq!(config.listener.address, "127.0.0.127");
        assert_eq!(config.listener.port, 8080);
        assert_eq!(config.listener.backlog, 50);
        assert_eq!(config.listener.max_connections, 20);
        assert_eq!(config.upstream.port, 8080);
        assert_eq!(config.timeouts.socket(), Some(Duration::from_secs(180)));
        assert!(config.policy.connection_close);
        assert!(config.policy.stop_on_proxy_auth_error);
    }

    #[test]
    fn zero_timeout_disables_it() {
        let timeouts = TimeoutConfig { socket_ms: 0 };
        assert_eq!(timeouts.socket(), None);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [upstream]
            host = "proxy.corp"
            username = "alice"
            password = "secret"

            [policy]
            connection_close = false
            "#,
        )
        .unwrap();

        assert_eq!(config.upstream.host, "proxy.corp");
        assert_eq!(config.upstream.port, 8080);
        assert!(!config.policy.connection_close);
        assert!(config.policy.stop_on_proxy_auth_error);
        assert_eq!(config.listener, ListenerConfig::default());
    }

    #[test]
    fn debug_output_hides_password() {
        let upstream = UpstreamConfig {
            password: "hunter2".into(),
            ..Default::default()
        };
        let printed = format!("{:?}", upstream);
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("<redacted>"));
    }
}
