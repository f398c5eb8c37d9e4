//! TCP listener implementation.
//!
//! # Responsibilities
//! - Resolve and bind the configured address with the configured backlog
//! - Accept incoming TCP connections
//!
//! Concurrency limits live in the registry, not here.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket, TcpStream};

use crate::config::ListenerConfig;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("Failed to resolve listen address {address}")]
    Resolve { address: String },

    #[error("Failed to bind: {0}")]
    Bind(std::io::Error),

    #[error("Failed to accept: {0}")]
    Accept(std::io::Error),
}

/// Local listening socket.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    /// Bind to the configured address and port with the configured backlog.
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let addr = resolve(&config.address, config.port).await?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(ListenerError::Bind)?;

        #[cfg(unix)]
        socket.set_reuseaddr(true).map_err(ListenerError::Bind)?;

        socket.bind(addr).map_err(ListenerError::Bind)?;
        let inner = socket.listen(config.backlog).map_err(ListenerError::Bind)?;

        let local_addr = inner.local_addr().map_err(ListenerError::Bind)?;
        tracing::info!(
            address = %local_addr,
            backlog = config.backlog,
            max_connections = config.max_connections,
            "Listener bound"
        );

        Ok(Self { inner })
    }

    /// Wait for the next client connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), ListenerError> {
        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;
        tracing::debug!(peer_addr = %addr, "Connection accepted");
        Ok((stream, addr))
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }
}

async fn resolve(address: &str, port: u16) -> Result<SocketAddr, ListenerError> {
    let resolve_error = || ListenerError::Resolve {
        address: format!("{}:{}", address, port),
    };
    tokio::net::lookup_host((address, port))
        .await
        .map_err(|_| resolve_error())?
        .next()
        .ok_or_else(resolve_error)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> ListenerConfig {
        ListenerConfig {
            address: "127.0.0.1".into(),
            port: 0,
            backlog: 8,
            max_connections: 4,
        }
    }

    #[tokio::test]
    async fn binds_ephemeral_port_and_accepts() {
        let listener = Listener::bind(&loopback()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        let client = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (_stream, peer) = listener.accept().await.unwrap();
        let client = client.await.unwrap();
        assert_eq!(peer, client.local_addr().unwrap());
    }

    #[tokio::test]
    async fn resolves_host_names() {
        let config = ListenerConfig {
            address: "localhost".into(),
            ..loopback()
        };
        let listener = Listener::bind(&config).await.unwrap();
        assert!(listener.local_addr().unwrap().ip().is_loopback());
    }

    #[tokio::test]
    async fn unresolvable_address_is_reported() {
        let config = ListenerConfig {
            address: "no such host.invalid".into(),
            ..loopback()
        };
        assert!(matches!(
            Listener::bind(&config).await,
            Err(ListenerError::Resolve { .. })
        ));
    }
}
