//! Connection state machine and lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing
//! - Track connection state (Accepted → HeadersRead → UpstreamConnected →
//!   Relaying → Finished)
//! - Hold the request and response header blocks for diagnostics

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::http::HeaderSequence;

/// Global atomic counter for connection IDs.
/// Relaxed ordering is enough: we only need uniqueness.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket accepted, nothing read yet.
    Accepted,
    /// Client request header block framed.
    HeadersRead,
    /// Upstream proxy socket open.
    UpstreamConnected,
    /// Both relays started.
    Relaying,
    /// Both relays reported success.
    FinishedOk,
    /// Any fault occurred.
    FinishedError,
}

impl ConnectionState {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::FinishedOk | Self::FinishedError)
    }
}

/// One accepted client session.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    started: Instant,
    state: ConnectionState,
    /// Request header block as received from the client.
    pub request_headers: HeaderSequence,
    /// Response header block as received from the upstream proxy.
    pub response_headers: Option<HeaderSequence>,
}

impl Connection {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            id: ConnectionId::new(),
            peer,
            started: Instant::now(),
            state: ConnectionState::Accepted,
            request_headers: HeaderSequence::new(),
            response_headers: None,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// First line of the client request, for logging.
    pub fn request_line(&self) -> &str {
        self.request_headers.first_line().unwrap_or("")
    }

    /// Move to `next`. A finished connection stays finished.
    pub fn advance(&mut self, next: ConnectionState) {
        if self.state.is_finished() {
            return;
        }
        tracing::trace!(
            connection_id = %self.id,
            from = ?self.state,
            to = ?next,
            "Connection state change"
        );
        self.state = next;
    }
}

/// Final report for one connection, handed to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub succeeded: bool,
    pub upload_bytes: u64,
    pub download_bytes: u64,
    pub error: Option<String>,
}

impl Completion {
    pub fn success(upload_bytes: u64, download_bytes: u64) -> Self {
        Self {
            succeeded: true,
            upload_bytes,
            download_bytes,
            error: None,
        }
    }

    pub fn failure(error: impl ToString, upload_bytes: u64, download_bytes: u64) -> Self {
        Self {
            succeeded: false,
            upload_bytes,
            download_bytes,
            error: Some(error.to_string()),
        }
    }
}
