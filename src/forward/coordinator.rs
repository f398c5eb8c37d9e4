//! Forwarding of one client connection through the upstream proxy.
//!
//! # Sequence
//! ```text
//! connect upstream
//!     → rewrite request headers, start upload relay (client → upstream)
//!     → frame upstream response headers (while watching the upload relay)
//!     → 407 check
//!     → rewrite response headers, start download relay (upstream → client)
//!     → wait for both reports; first failure aborts the sibling
//! ```

use std::io;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};

use crate::config::ProxyConfig;
use crate::forward::relay::{Direction, Relay, RelayOutcome, RelayReport};
use crate::http::{
    force_close, inject_auth, is_proxy_auth_error, read_header_block, FramingError,
    HeaderSequence,
};
use crate::net::{Connection, ConnectionState};
use crate::resilience::timeouts::io_timeout;

/// Result of a connection where both relays completed cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardSummary {
    pub upload_bytes: u64,
    pub download_bytes: u64,
}

/// Why forwarding a connection failed.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("failed to connect to upstream proxy {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to read upstream response headers: {0}")]
    ResponseHeaders(#[source] FramingError),

    #[error("relay failed (upload: {upload}, download: {download})")]
    Relay {
        upload: RelayOutcome,
        download: RelayOutcome,
        upload_bytes: u64,
        download_bytes: u64,
    },

    /// The upstream proxy answered `407` and the stop policy is enabled.
    #[error("upstream proxy rejected credentials: {status_line}")]
    ProxyAuthRejected { status_line: String },
}

impl ForwardError {
    /// Bytes relayed before the failure, as (upload, download).
    pub fn bytes(&self) -> (u64, u64) {
        match self {
            ForwardError::Relay {
                upload_bytes,
                download_bytes,
                ..
            } => (*upload_bytes, *download_bytes),
            _ => (0, 0),
        }
    }
}

/// Drives one connection from upstream connect to both relays finishing.
pub struct ForwardCoordinator {
    config: Arc<ProxyConfig>,
}

impl ForwardCoordinator {
    pub fn new(config: Arc<ProxyConfig>) -> Self {
        Self { config }
    }

    /// Forward `connection`, whose request headers have already been read
    /// from `client_reader`.
    pub async fn run<CR, CW>(
        &self,
        connection: &mut Connection,
        client_reader: CR,
        client_writer: CW,
    ) -> Result<ForwardSummary, ForwardError>
    where
        CR: AsyncRead + Unpin + Send + 'static,
        CW: AsyncWrite + Unpin + Send + 'static,
    {
        let result = self.forward(connection, client_reader, client_writer).await;
        connection.advance(if result.is_ok() {
            ConnectionState::FinishedOk
        } else {
            ConnectionState::FinishedError
        });
        result
    }

    async fn forward<CR, CW>(
        &self,
        connection: &mut Connection,
        client_reader: CR,
        client_writer: CW,
    ) -> Result<ForwardSummary, ForwardError>
    where
        CR: AsyncRead + Unpin + Send + 'static,
        CW: AsyncWrite + Unpin + Send + 'static,
    {
        let config = &self.config;
        let timeout = config.timeouts.socket();
        let buffer_size = config.limits.relay_buffer_bytes;
        let id = connection.id();

        let upstream_addr = format!("{}:{}", config.upstream.host, config.upstream.port);
        let upstream = io_timeout(
            timeout,
            TcpStream::connect((config.upstream.host.as_str(), config.upstream.port)),
        )
        .await
        .map_err(|source| ForwardError::Connect {
            address: upstream_addr.clone(),
            source,
        })?;
        connection.advance(ConnectionState::UpstreamConnected);
        tracing::debug!(connection_id = %id, upstream = %upstream_addr, "Upstream connected");

        let (upstream_read, upstream_write) = upstream.into_split();
        let mut upstream_reader = BufReader::with_capacity(buffer_size, upstream_read);

        let mut request = inject_auth(
            &connection.request_headers,
            &config.upstream.username,
            &config.upstream.password,
        );
        if config.policy.connection_close {
            request = force_close(&request);
        }

        let (abort_tx, abort_rx) = watch::channel(false);
        let mut relays = RelaySet::new(abort_tx);
        relays.spawn(
            Direction::Upload,
            Relay::new(id, Direction::Upload, client_reader, upstream_write)
                .with_headers(request)
                .half_close_on_eof()
                .buffer_size(buffer_size)
                .timeout(timeout)
                .run(abort_rx.clone()),
        );

        // The upload keeps running while the response is framed; if it fails
        // first there is no point in waiting for an answer.
        let framed = {
            let framing = read_header_block(
                &mut upstream_reader,
                config.limits.max_header_bytes,
                timeout,
                config.observability.debug,
            );
            tokio::pin!(framing);
            loop {
                tokio::select! {
                    result = &mut framing => break Some(result),
                    Some(report) = relays.next_report() => {
                        if !report.outcome.is_success() {
                            break None;
                        }
                    }
                }
            }
        };

        let response = match framed {
            Some(Ok(response)) => response,
            Some(Err(e)) => {
                relays.abort();
                relays.drain().await;
                return Err(ForwardError::ResponseHeaders(e));
            }
            None => {
                relays.abort();
                relays.drain().await;
                return Err(relays.into_error());
            }
        };

        let status_line = response.first_line().unwrap_or_default().to_string();
        connection.response_headers = Some(response.clone());

        if config.policy.stop_on_proxy_auth_error && is_proxy_auth_error(&status_line) {
            tracing::error!(
                connection_id = %id,
                status = %status_line,
                "Upstream proxy rejected credentials"
            );
            relays.abort();
            relays.drain().await;
            return Err(ForwardError::ProxyAuthRejected { status_line });
        }

        let response: HeaderSequence = if config.policy.connection_close {
            force_close(&response)
        } else {
            response
        };

        relays.spawn(
            Direction::Download,
            Relay::new(id, Direction::Download, upstream_reader, client_writer)
                .with_headers(response)
                .half_close_on_eof()
                .buffer_size(buffer_size)
                .timeout(timeout)
                .run(abort_rx),
        );
        connection.advance(ConnectionState::Relaying);

        relays.drain().await;
        if relays.any_failed() {
            return Err(relays.into_error());
        }
        let (upload_bytes, download_bytes) = relays.bytes();
        Ok(ForwardSummary {
            upload_bytes,
            download_bytes,
        })
    }
}

/// The relays of one connection and the reports they have produced.
///
/// The first failed report raises the shared abort signal, so the sibling
/// drops its socket halves and reports too.
struct RelaySet {
    tasks: JoinSet<RelayReport>,
    pending: Vec<Direction>,
    reports: Vec<RelayReport>,
    abort_tx: watch::Sender<bool>,
}

impl RelaySet {
    fn new(abort_tx: watch::Sender<bool>) -> Self {
        Self {
            tasks: JoinSet::new(),
            pending: Vec::with_capacity(2),
            reports: Vec::with_capacity(2),
            abort_tx,
        }
    }

    fn spawn<F>(&mut self, direction: Direction, relay: F)
    where
        F: std::future::Future<Output = RelayReport> + Send + 'static,
    {
        self.pending.push(direction);
        self.tasks.spawn(relay);
    }

    /// Wait for the next relay to report. `None` once nothing is running.
    async fn next_report(&mut self) -> Option<RelayReport> {
        let joined = self.tasks.join_next().await?;
        let report = self.record(joined);
        if !report.outcome.is_success() {
            self.abort();
        }
        Some(report)
    }

    async fn drain(&mut self) {
        while self.next_report().await.is_some() {}
    }

    fn record(&mut self, joined: Result<RelayReport, JoinError>) -> RelayReport {
        let report = match joined {
            Ok(report) => report,
            Err(e) => RelayReport {
                // A panicked task cannot say which one it was; any pending
                // direction will do for accounting.
                direction: self.pending.first().copied().unwrap_or(Direction::Upload),
                bytes: 0,
                outcome: RelayOutcome::Failed(format!("relay task failed: {}", e)),
            },
        };
        self.pending.retain(|d| *d != report.direction);
        self.reports.push(report.clone());
        report
    }

    fn abort(&self) {
        self.abort_tx.send_replace(true);
    }

    fn any_failed(&self) -> bool {
        self.reports.iter().any(|r| !r.outcome.is_success())
    }

    fn report(&self, direction: Direction) -> Option<&RelayReport> {
        self.reports.iter().find(|r| r.direction == direction)
    }

    fn bytes(&self) -> (u64, u64) {
        let bytes = |d| self.report(d).map(|r| r.bytes).unwrap_or(0);
        (bytes(Direction::Upload), bytes(Direction::Download))
    }

    fn into_error(self) -> ForwardError {
        let outcome = |d| {
            self.report(d)
                .map(|r| r.outcome.clone())
                .unwrap_or(RelayOutcome::Aborted)
        };
        let (upload_bytes, download_bytes) = self.bytes();
        ForwardError::Relay {
            upload: outcome(Direction::Upload),
            download: outcome(Direction::Download),
            upload_bytes,
            download_bytes,
        }
    }
}
