//! Accept loop and per-connection tasks.
//!
//! # Responsibilities
//! - Hold the connection count under `listener.max_connections`
//! - Give every connection its own config snapshot and task
//! - Apply reloaded configuration between accepts
//! - Stop on shutdown, or fail when the upstream proxy rejects our credentials

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use thiserror::Error;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};

use crate::config::ProxyConfig;
use crate::forward::{ForwardCoordinator, ForwardError, ForwardSummary};
use crate::http::{read_header_block, FramingError};
use crate::net::{
    ActiveRegistry, Completion, Connection, ConnectionState, Listener, ListenerError,
};

/// Error that ends the accept loop.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("upstream proxy rejected credentials: {status_line}")]
    ProxyAuthRejected { status_line: String },
}

/// Why a single connection failed. Never ends the accept loop by itself.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to read request headers: {0}")]
    RequestHeaders(#[source] FramingError),

    #[error(transparent)]
    Forward(#[from] ForwardError),
}

impl ConnectionError {
    /// Bytes relayed before the failure, as (upload, download).
    pub fn bytes(&self) -> (u64, u64) {
        match self {
            ConnectionError::RequestHeaders(_) => (0, 0),
            ConnectionError::Forward(e) => e.bytes(),
        }
    }
}

/// The authenticating forward proxy.
pub struct ProxyServer {
    config: Arc<ArcSwap<ProxyConfig>>,
    registry: Arc<ActiveRegistry>,
}

impl ProxyServer {
    pub fn new(config: ProxyConfig) -> Self {
        Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            registry: Arc::new(ActiveRegistry::new()),
        }
    }

    /// Connections currently in flight.
    pub fn registry(&self) -> Arc<ActiveRegistry> {
        Arc::clone(&self.registry)
    }

    /// The configuration new connections will be given.
    pub fn config(&self) -> Arc<ProxyConfig> {
        self.config.load_full()
    }

    /// Accept and serve connections until `shutdown` fires.
    ///
    /// Returns [`ServerError::ProxyAuthRejected`] as soon as any connection
    /// sees a `407` while `policy.stop_on_proxy_auth_error` is set. In-flight
    /// connections are not waited for in either case.
    pub async fn run(
        self,
        listener: Listener,
        mut config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        if let Ok(addr) = listener.local_addr() {
            let config = self.config.load();
            tracing::info!(
                address = %addr,
                upstream = %format!("{}:{}", config.upstream.host, config.upstream.port),
                username = %config.upstream.username,
                "Proxy server started"
            );
        }

        let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel::<String>();
        let mut updates_open = true;

        loop {
            let max_connections = self.config.load().listener.max_connections;

            tokio::select! {
                biased;

                Some(status_line) = fatal_rx.recv() => {
                    tracing::error!(
                        status = %status_line,
                        "Stopping: upstream proxy rejected credentials"
                    );
                    return Err(ServerError::ProxyAuthRejected { status_line });
                }

                _ = shutdown.recv() => {
                    tracing::info!(
                        active = self.registry.len(),
                        "Shutdown signal received, no longer accepting connections"
                    );
                    break;
                }

                update = config_updates.recv(), if updates_open => match update {
                    Some(config) => self.apply_update(config),
                    None => updates_open = false,
                },

                accepted = accept_with_capacity(&listener, &self.registry, max_connections) => {
                    match accepted {
                        Ok((stream, peer)) => self.dispatch(stream, peer, fatal_tx.clone()),
                        Err(e) => accept_failed(e).await,
                    }
                }
            }
        }

        Ok(())
    }

    fn apply_update(&self, config: ProxyConfig) {
        let current = self.config.load();
        let listener_moved = current.listener.address != config.listener.address
            || current.listener.port != config.listener.port
            || current.listener.backlog != config.listener.backlog;
        if listener_moved {
            tracing::warn!("Listener address, port or backlog changed; restart to apply");
        }
        tracing::info!(
            upstream = %format!("{}:{}", config.upstream.host, config.upstream.port),
            max_connections = config.listener.max_connections,
            "Configuration reloaded"
        );
        self.config.store(Arc::new(config));
    }

    fn dispatch(&self, stream: TcpStream, peer: SocketAddr, fatal_tx: mpsc::UnboundedSender<String>) {
        let config = self.config.load_full();
        let connection = Connection::new(peer);
        let entry = self.registry.insert(&connection);

        tokio::spawn(async move {
            let mut connection = connection;
            let result = serve_connection(&mut connection, stream, config).await;

            let completion = match &result {
                Ok(summary) => Completion::success(summary.upload_bytes, summary.download_bytes),
                Err(e) => {
                    let (up, down) = e.bytes();
                    Completion::failure(e, up, down)
                }
            };
            entry.finish(&connection, &completion);

            if let Err(ConnectionError::Forward(ForwardError::ProxyAuthRejected { status_line })) =
                result
            {
                let _ = fatal_tx.send(status_line);
            }
        });
    }
}

/// Pause after a failed accept. Errors such as running out of file
/// descriptors persist, and retrying at once would spin.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

async fn accept_failed(error: ListenerError) {
    tracing::error!(
        error = %error,
        retry_ms = ACCEPT_RETRY_DELAY.as_millis() as u64,
        "Accept failed"
    );
    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
}

async fn accept_with_capacity(
    listener: &Listener,
    registry: &ActiveRegistry,
    max_connections: usize,
) -> Result<(TcpStream, SocketAddr), ListenerError> {
    registry.wait_for_capacity(max_connections).await;
    listener.accept().await
}

/// Read the request header block, then hand the connection to the coordinator.
pub async fn serve_connection(
    connection: &mut Connection,
    stream: TcpStream,
    config: Arc<ProxyConfig>,
) -> Result<ForwardSummary, ConnectionError> {
    let (client_read, client_write) = stream.into_split();
    let mut client_reader = BufReader::with_capacity(config.limits.relay_buffer_bytes, client_read);

    let request = read_header_block(
        &mut client_reader,
        config.limits.max_header_bytes,
        config.timeouts.socket(),
        config.observability.debug,
    )
    .await;
    let request = match request {
        Ok(request) => request,
        Err(e) => {
            connection.advance(ConnectionState::FinishedError);
            return Err(ConnectionError::RequestHeaders(e));
        }
    };

    connection.request_headers = request;
    connection.advance(ConnectionState::HeadersRead);
    tracing::debug!(
        connection_id = %connection.id(),
        request = %connection.request_line(),
        "Request headers read"
    );

    Ok(ForwardCoordinator::new(config)
        .run(connection, client_reader, client_write)
        .await?)
}
