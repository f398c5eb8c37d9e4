//! One-directional byte pump.
//!
//! A relay optionally writes a header block first, then copies bytes from its
//! source to its sink until the source ends. The sink is buffered and only
//! flushed when the source has nothing immediately available, which keeps
//! interactive traffic moving without a flush per read.
//!
//! Every relay produces exactly one [`RelayReport`].

use std::future::{poll_fn, Future};
use std::io;
use std::pin::pin;
use std::task::Poll;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::watch;

use crate::http::HeaderSequence;
use crate::net::ConnectionId;
use crate::observability::metrics;
use crate::resilience::timeouts::io_timeout;

/// Default relay buffer size.
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// Which way the bytes flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Client to upstream proxy.
    Upload,
    /// Upstream proxy to client.
    Download,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Upload => "upload",
            Direction::Download => "download",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a relay ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Source reached a clean end of stream.
    Completed,
    /// A peer reset the connection.
    Reset,
    /// Any other I/O fault, including timeouts.
    Failed(String),
    /// Stopped because the sibling relay failed.
    Aborted,
}

impl RelayOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RelayOutcome::Completed)
    }
}

impl std::fmt::Display for RelayOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayOutcome::Completed => f.write_str("completed"),
            RelayOutcome::Reset => f.write_str("connection reset"),
            RelayOutcome::Failed(e) => write!(f, "failed: {}", e),
            RelayOutcome::Aborted => f.write_str("aborted"),
        }
    }
}

/// Terminal status of one relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayReport {
    pub direction: Direction,
    /// Body bytes copied; header lines are not counted.
    pub bytes: u64,
    pub outcome: RelayOutcome,
}

/// A configured relay, consumed by [`Relay::run`].
pub struct Relay<R, W> {
    connection_id: ConnectionId,
    direction: Direction,
    source: R,
    sink: W,
    headers: Option<HeaderSequence>,
    half_close: bool,
    buffer_size: usize,
    timeout: Option<Duration>,
}

impl<R, W> Relay<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(connection_id: ConnectionId, direction: Direction, source: R, sink: W) -> Self {
        Self {
            connection_id,
            direction,
            source,
            sink,
            headers: None,
            half_close: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
            timeout: None,
        }
    }

    /// Send this header block before any body bytes.
    pub fn with_headers(mut self, headers: HeaderSequence) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Shut down the sink's outbound side when the source ends cleanly.
    pub fn half_close_on_eof(mut self) -> Self {
        self.half_close = true;
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    /// Deadline for each individual read, write or flush.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Pump until the source ends, an I/O fault occurs or `abort` is raised.
    pub async fn run(self, mut abort: watch::Receiver<bool>) -> RelayReport {
        let Relay {
            connection_id,
            direction,
            mut source,
            sink,
            headers,
            half_close,
            buffer_size,
            timeout,
        } = self;
        let mut sink = BufWriter::with_capacity(buffer_size, sink);
        let mut bytes = 0u64;

        tracing::debug!(connection_id = %connection_id, direction = %direction, "Relay started");

        let result = tokio::select! {
            result = pump(
                &mut source,
                &mut sink,
                headers.as_ref(),
                half_close,
                buffer_size,
                timeout,
                &mut bytes,
            ) => result.map_err(classify),
            _ = aborted(&mut abort) => Err(RelayOutcome::Aborted),
        };

        // Bytes already accepted into the buffer still belong to the peer,
        // even when the source ended with a fault.
        if matches!(result, Err(RelayOutcome::Reset | RelayOutcome::Failed(_))) {
            tokio::select! {
                _ = io_timeout(timeout, sink.flush()) => {}
                _ = aborted(&mut abort) => {}
            }
        }

        // Sockets close here, before the report goes out.
        drop(source);
        drop(sink);

        metrics::record_relay_bytes(direction.as_str(), bytes);
        let outcome = match result {
            Ok(()) => {
                tracing::debug!(
                    connection_id = %connection_id,
                    direction = %direction,
                    bytes,
                    "Relay finished"
                );
                RelayOutcome::Completed
            }
            Err(RelayOutcome::Failed(error)) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    direction = %direction,
                    bytes,
                    error = %error,
                    "Relay failed"
                );
                RelayOutcome::Failed(error)
            }
            Err(outcome) => {
                tracing::debug!(
                    connection_id = %connection_id,
                    direction = %direction,
                    bytes,
                    outcome = %outcome,
                    "Relay closed"
                );
                outcome
            }
        };

        RelayReport {
            direction,
            bytes,
            outcome,
        }
    }
}

async fn pump<R, W>(
    source: &mut R,
    sink: &mut BufWriter<W>,
    headers: Option<&HeaderSequence>,
    half_close: bool,
    buffer_size: usize,
    timeout: Option<Duration>,
    bytes: &mut u64,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if let Some(headers) = headers {
        io_timeout(timeout, sink.write_all(&headers.to_wire())).await?;
    }

    let mut buf = vec![0u8; buffer_size];
    loop {
        let n = read_or_flush(source, sink, &mut buf, timeout).await?;
        if n == 0 {
            break;
        }
        io_timeout(timeout, sink.write_all(&buf[..n])).await?;
        *bytes += n as u64;
    }

    if half_close {
        // Flushes the buffer, then shuts down the write side.
        io_timeout(timeout, sink.shutdown()).await
    } else {
        io_timeout(timeout, sink.flush()).await
    }
}

/// Read from `source`; if nothing is ready right now, flush `sink` before
/// waiting.
async fn read_or_flush<R, W>(
    source: &mut R,
    sink: &mut W,
    buf: &mut [u8],
    timeout: Option<Duration>,
) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut read = pin!(source.read(buf));
    if let Poll::Ready(result) = poll_fn(|cx| Poll::Ready(read.as_mut().poll(cx))).await {
        return result;
    }
    io_timeout(timeout, sink.flush()).await?;
    io_timeout(timeout, read).await
}

/// Resolves once `abort` is raised. Never resolves if the sender is gone.
async fn aborted(abort: &mut watch::Receiver<bool>) {
    if abort.wait_for(|raised| *raised).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn classify(error: io::Error) -> RelayOutcome {
    match error.kind() {
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => RelayOutcome::Reset,
        _ => RelayOutcome::Failed(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn never_abort() -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        // Dropping the sender leaves the receiver waiting forever.
        drop(tx);
        rx
    }

    #[tokio::test]
    async fn relays_bytes_exactly_and_counts_them() {
        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let (mut sink_peer, sink) = duplex(1024);

        let relay = Relay::new(ConnectionId::new(), Direction::Upload, &payload[..], sink)
            .buffer_size(333)
            .half_close_on_eof();

        let mut received = Vec::new();
        let (report, read) = tokio::join!(
            relay.run(never_abort()),
            sink_peer.read_to_end(&mut received)
        );
        read.unwrap();

        assert_eq!(received, payload);
        assert_eq!(report.bytes, payload.len() as u64);
        assert_eq!(report.outcome, RelayOutcome::Completed);
        assert_eq!(report.direction, Direction::Upload);
    }

    #[tokio::test]
    async fn empty_source_completes_with_zero_bytes() {
        let (mut sink_peer, sink) = duplex(64);
        let relay = Relay::new(ConnectionId::new(), Direction::Download, &b""[..], sink)
            .half_close_on_eof();
        let report = relay.run(never_abort()).await;

        let mut received = Vec::new();
        sink_peer.read_to_end(&mut received).await.unwrap();
        assert!(received.is_empty());
        assert_eq!(report.bytes, 0);
        assert!(report.outcome.is_success());
    }

    #[tokio::test]
    async fn headers_precede_body_and_are_not_counted() {
        let headers: HeaderSequence = ["HTTP/1.1 200 OK", "X: 1"].into_iter().collect();
        let (mut sink_peer, sink) = duplex(1024);

        let relay = Relay::new(ConnectionId::new(), Direction::Download, &b"BODY"[..], sink)
            .with_headers(headers)
            .half_close_on_eof();
        let report = relay.run(never_abort()).await;

        let mut received = Vec::new();
        sink_peer.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"HTTP/1.1 200 OK\r\nX: 1\r\n\r\nBODY");
        assert_eq!(report.bytes, 4);
    }

    #[tokio::test]
    async fn flushes_while_source_is_idle() {
        let (mut source_peer, source) = duplex(1024);
        let (mut sink_peer, sink) = duplex(1024);

        let relay = Relay::new(ConnectionId::new(), Direction::Upload, source, sink)
            .buffer_size(4096);
        let task = tokio::spawn(relay.run(never_abort()));

        // The source stays open, so these bytes only arrive if the relay
        // flushes its buffer while waiting for more.
        source_peer.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        tokio::time::timeout(Duration::from_secs(2), sink_peer.read_exact(&mut buf))
            .await
            .expect("flushed while idle")
            .unwrap();
        assert_eq!(&buf, b"ping");

        drop(source_peer);
        let report = task.await.unwrap();
        assert_eq!(report.bytes, 4);
        assert!(report.outcome.is_success());
    }

    #[tokio::test]
    async fn abort_stops_a_blocked_relay() {
        let (_source_peer, source) = duplex(64);
        let (_sink_peer, sink) = duplex(64);
        let (abort_tx, abort_rx) = watch::channel(false);

        let relay = Relay::new(ConnectionId::new(), Direction::Download, source, sink);
        let task = tokio::spawn(relay.run(abort_rx));

        tokio::time::sleep(Duration::from_millis(20)).await;
        abort_tx.send(true).unwrap();

        let report = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("relay unwound")
            .unwrap();
        assert_eq!(report.outcome, RelayOutcome::Aborted);
        assert!(!report.outcome.is_success());
    }

    #[tokio::test]
    async fn idle_source_times_out_as_failure() {
        let (_source_peer, source) = duplex(64);
        let (_sink_peer, sink) = duplex(64);

        let relay = Relay::new(ConnectionId::new(), Direction::Upload, source, sink)
            .timeout(Some(Duration::from_millis(20)));
        let report = relay.run(never_abort()).await;
        assert!(matches!(report.outcome, RelayOutcome::Failed(_)));
    }

    #[tokio::test]
    async fn closed_sink_is_reported_as_failure() {
        let (sink_peer, sink) = duplex(16);
        drop(sink_peer);

        let payload = vec![7u8; 1024];
        let relay = Relay::new(ConnectionId::new(), Direction::Upload, &payload[..], sink)
            .buffer_size(16);
        let report = relay.run(never_abort()).await;
        assert!(!report.outcome.is_success());
    }

    /// Yields `data` once, then fails every later read with a reset.
    struct ResetAfter {
        data: Option<&'static [u8]>,
    }

    impl AsyncRead for ResetAfter {
        fn poll_read(
            mut self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &mut tokio::io::ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            match self.data.take() {
                Some(data) => {
                    buf.put_slice(data);
                    Poll::Ready(Ok(()))
                }
                None => Poll::Ready(Err(io::ErrorKind::ConnectionReset.into())),
            }
        }
    }

    #[tokio::test]
    async fn buffered_bytes_reach_sink_when_source_resets() {
        let (mut sink_peer, sink) = duplex(1024);
        let headers: HeaderSequence = ["HTTP/1.1 407 Proxy Authentication Required"]
            .into_iter()
            .collect();

        let relay = Relay::new(
            ConnectionId::new(),
            Direction::Download,
            ResetAfter { data: Some(b"abc") },
            sink,
        )
        .with_headers(headers);
        let report = relay.run(never_abort()).await;

        assert_eq!(report.outcome, RelayOutcome::Reset);
        assert_eq!(report.bytes, 3);

        let mut received = Vec::new();
        sink_peer.read_to_end(&mut received).await.unwrap();
        assert_eq!(
            received,
            b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\nabc"
        );
    }

    #[test]
    fn reset_kinds_are_classified() {
        for kind in [
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::BrokenPipe,
        ] {
            assert_eq!(classify(io::Error::from(kind)), RelayOutcome::Reset);
        }
        assert!(matches!(
            classify(io::Error::from(io::ErrorKind::TimedOut)),
            RelayOutcome::Failed(_)
        ));
    }
}
