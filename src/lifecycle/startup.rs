//! Startup orchestration.
//!
//! # Order
//! ```text
//! load + validate config (errors go to stderr, logging is not up yet)
//!     → logging → metrics → bind listener → config watcher
//!     → accept loop, until a stop signal or a fatal 407
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::watcher::ConfigWatcher;
use crate::config::{load_config, ConfigError, ProxyConfig};
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::signals;
use crate::net::{Listener, ListenerError};
use crate::observability::{logging, metrics};
use crate::server::{ProxyServer, ServerError};

/// Exit code when the upstream proxy rejects our credentials.
pub const EXIT_PROXY_AUTH_REJECTED: i32 = 5;

/// Exit code for configuration or startup failures.
pub const EXIT_STARTUP_FAILURE: i32 = 1;

/// Options taken from the command line.
#[derive(Debug, Clone)]
pub struct StartupOptions {
    pub config_path: PathBuf,
    /// Force debug output regardless of the file.
    pub debug: bool,
    /// Reload the config file when it changes.
    pub watch: bool,
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("listener error: {0}")]
    Listener(#[from] ListenerError),

    #[error("failed to watch config file: {0}")]
    Watch(#[from] notify::Error),

    #[error(transparent)]
    Server(#[from] ServerError),
}

impl StartupError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            StartupError::Server(ServerError::ProxyAuthRejected { .. }) => {
                EXIT_PROXY_AUTH_REJECTED
            }
            _ => EXIT_STARTUP_FAILURE,
        }
    }
}

/// Load the configuration file and apply command-line overrides.
pub fn prepare_config(options: &StartupOptions) -> Result<ProxyConfig, ConfigError> {
    let mut config = load_config(&options.config_path)?;
    apply_cli_overrides(&mut config, options);
    Ok(config)
}

fn apply_cli_overrides(config: &mut ProxyConfig, options: &StartupOptions) {
    if options.debug {
        config.observability.debug = true;
    }
}

/// Run the proxy until a stop signal. Logging must not be initialized yet.
pub async fn run(options: StartupOptions, config: ProxyConfig) -> Result<(), StartupError> {
    logging::init_logging(&config.observability);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %options.config_path.display(),
        "proxy-auth starting"
    );
    tracing::debug!(?config, "Effective configuration");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = Listener::bind(&config.listener).await?;

    let (updates, _watcher) = if options.watch {
        let (watcher, updates) = ConfigWatcher::new(&options.config_path);
        let cli = options.clone();
        let handle = watcher
            .with_overrides(move |config| apply_cli_overrides(config, &cli))
            .run()?;
        (updates, Some(handle))
    } else {
        let (_tx, rx) = mpsc::unbounded_channel();
        (rx, None)
    };

    let shutdown = Arc::new(Shutdown::new());
    let server_shutdown = shutdown.subscribe();
    let signal_shutdown = Arc::clone(&shutdown);
    tokio::spawn(async move { signals::shutdown_on_signal(&signal_shutdown).await });

    ProxyServer::new(config)
        .run(listener, updates, server_shutdown)
        .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Human-readable summary of the effective settings, without the password.
pub fn describe(config: &ProxyConfig, path: &Path) -> String {
    let timeout = match config.timeouts.socket() {
        Some(t) => format!("{} ms", t.as_millis()),
        None => "none".to_string(),
    };
    [
        format!("config file:          {}", path.display()),
        format!(
            "listen:               {}:{} (backlog {})",
            config.listener.address, config.listener.port, config.listener.backlog
        ),
        format!("max connections:      {}", config.listener.max_connections),
        format!(
            "upstream proxy:       {}:{}",
            config.upstream.host, config.upstream.port
        ),
        format!("username:             {}", config.upstream.username),
        format!("socket timeout:       {}", timeout),
        format!("max header bytes:     {}", config.limits.max_header_bytes),
        format!("relay buffer bytes:   {}", config.limits.relay_buffer_bytes),
        format!("connection close:     {}", config.policy.connection_close),
        format!(
            "stop on 407:          {}",
            config.policy.stop_on_proxy_auth_error
        ),
        format!("debug:                {}", config.observability.debug),
    ]
    .join("\n")
}
