//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use proxy_auth::lifecycle::Shutdown;
use proxy_auth::net::{ActiveRegistry, Listener};
use proxy_auth::{ProxyConfig, ProxyServer, ServerError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A fake upstream proxy.
///
/// Each connection is read until the proxy half-closes it, the bytes are
/// reported on `requests`, then `response` is written and the socket shut
/// down.
pub struct MockUpstream {
    pub addr: SocketAddr,
    pub accepted: Arc<AtomicUsize>,
    pub requests: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl MockUpstream {
    pub async fn start(response: &'static [u8]) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let (tx, requests) = mpsc::unbounded_channel();

        let counter = accepted.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut received = Vec::new();
                    if socket.read_to_end(&mut received).await.is_err() {
                        return;
                    }
                    let _ = tx.send(received);
                    let _ = socket.write_all(response).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        Self {
            addr,
            accepted,
            requests,
        }
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Next request the mock received in full.
    pub async fn next_request(&mut self) -> Vec<u8> {
        tokio::time::timeout(Duration::from_secs(5), self.requests.recv())
            .await
            .expect("upstream received a request")
            .expect("mock upstream running")
    }
}

/// An address nothing listens on.
pub async fn unreachable_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// Config pointing at `upstream` with credentials foo:bar, listening on an
/// ephemeral loopback port.
pub fn test_config(upstream: SocketAddr) -> ProxyConfig {
    let mut config = ProxyConfig::default();
    config.listener.address = "127.0.0.1".into();
    config.listener.port = 0;
    config.upstream.host = upstream.ip().to_string();
    config.upstream.port = upstream.port();
    config.upstream.username = "foo".into();
    config.upstream.password = "bar".into();
    config.timeouts.socket_ms = 5_000;
    config
}

/// A proxy server running in the background.
pub struct RunningProxy {
    pub addr: SocketAddr,
    pub registry: Arc<ActiveRegistry>,
    pub shutdown: Shutdown,
    pub updates: mpsc::UnboundedSender<ProxyConfig>,
    pub handle: JoinHandle<Result<(), ServerError>>,
}

impl RunningProxy {
    pub async fn start(config: ProxyConfig) -> Self {
        let listener = Listener::bind(&config.listener).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = ProxyServer::new(config);
        let registry = server.registry();
        let shutdown = Shutdown::new();
        let (updates, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(server.run(listener, rx, shutdown.subscribe()));

        Self {
            addr,
            registry,
            shutdown,
            updates,
            handle,
        }
    }

    /// Wait for the accept loop to return.
    pub async fn join(self) -> Result<(), ServerError> {
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server stopped in time")
            .expect("server task did not panic")
    }
}

/// Send `request`, half-close, and read everything the proxy sends back.
pub async fn exchange(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    // Fails if the proxy already reset the connection.
    let _ = stream.shutdown().await;
    read_until_closed(&mut stream).await
}

/// Read until EOF or error; a reset still yields what arrived before it.
pub async fn read_until_closed(stream: &mut TcpStream) -> Vec<u8> {
    let mut received = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let read = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .expect("proxy closed the connection in time");
        match read {
            Ok(0) | Err(_) => return received,
            Ok(n) => received.extend_from_slice(&buf[..n]),
        }
    }
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
