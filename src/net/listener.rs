//! TCP listener implementation with backpressure.
//!
//! # Responsibilities
//! - Bind to the configured address with an explicit accept backlog
//! - Hand the socket to either execution model (std or Tokio)
//! - Enforce max_connections for the cooperative model via semaphore

use std::net::SocketAddr;
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The bind address is not a socket address.
    #[error("invalid bind address '{0}'")]
    Address(String),

    /// Failed to bind to address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// Failed to accept connection.
    #[error("failed to accept: {0}")]
    Accept(std::io::Error),
}

/// Bind and listen on `address` with the given backlog.
///
/// Returns a blocking std listener; the cooperative model converts it with
/// [`BoundedListener::from_std`].
pub fn bind(address: &str, backlog: u32) -> Result<std::net::TcpListener, ListenerError> {
    let addr: SocketAddr = address
        .parse()
        .map_err(|_| ListenerError::Address(address.to_string()))?;

    let bind_err = |source| ListenerError::Bind { addr, source };

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;
    socket
        .listen(backlog.min(i32::MAX as u32) as i32)
        .map_err(bind_err)?;

    let listener: std::net::TcpListener = socket.into();
    let local_addr = listener.local_addr().map_err(bind_err)?;

    tracing::info!(address = %local_addr, backlog, "Listener bound");
    Ok(listener)
}

/// A bounded Tokio listener that limits concurrent connections.
///
/// Uses a semaphore to enforce `max_connections`. When the limit is reached,
/// new connections wait in the kernel backlog until a slot becomes available.
pub struct BoundedListener {
    /// The underlying TCP listener.
    inner: TcpListener,
    /// Semaphore to limit concurrent connections.
    connection_limit: Arc<Semaphore>,
    /// Configured maximum connections.
    max_connections: usize,
}

impl BoundedListener {
    /// Wrap an already-bound std listener. Must run inside a Tokio runtime.
    pub fn from_std(
        listener: std::net::TcpListener,
        max_connections: usize,
    ) -> Result<Self, ListenerError> {
        let local_addr = listener.local_addr().map_err(ListenerError::Accept)?;
        let bind_err = |source| ListenerError::Bind {
            addr: local_addr,
            source,
        };
        listener.set_nonblocking(true).map_err(bind_err)?;
        let inner = TcpListener::from_std(listener).map_err(bind_err)?;

        Ok(Self {
            inner,
            connection_limit: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        })
    }

    /// Accept a new connection, respecting the connection limit.
    ///
    /// This will wait if the connection limit has been reached.
    /// Returns the stream and a permit that must be held for the connection's lifetime.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        // Acquire permit first (backpressure). The semaphore is never closed.
        let permit = match self.connection_limit.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return Err(ListenerError::Accept(std::io::Error::other(
                    "connection limit closed",
                )))
            }
        };

        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;

        tracing::debug!(
            peer_addr = %addr,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    /// Get current available connection slots.
    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    /// Get configured maximum connections.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// A permit representing a connection slot.
///
/// When dropped, the connection slot is released back to the pool,
/// including when the connection task panics.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_ephemeral_port() {
        let listener = bind("127.0.0.1:0", 100).unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[test]
    fn bind_conflict_is_reported() {
        let first = bind("127.0.0.1:0", 16).unwrap();
        let addr = first.local_addr().unwrap().to_string();

        let err = bind(&addr, 16).unwrap_err();
        assert!(matches!(err, ListenerError::Bind { .. }));
        assert!(err.to_string().contains(&addr));
    }

    #[test]
    fn bad_address_is_rejected() {
        assert!(matches!(bind("not-an-address", 16), Err(ListenerError::Address(_))));
    }

    #[tokio::test]
    async fn permits_are_held_per_connection() {
        let listener = BoundedListener::from_std(bind("127.0.0.1:0", 16).unwrap(), 2).unwrap();
        let addr = listener.local_addr().unwrap();

        let _client = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (_stream, _peer, permit) = listener.accept().await.unwrap();
        assert_eq!(listener.available_permits(), 1);

        drop(permit);
        assert_eq!(listener.available_permits(), 2);
        assert_eq!(listener.max_connections(), 2);
    }
}
