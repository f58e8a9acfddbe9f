//! Transport abstraction layer for Rally.
//!
//! Provides the [`Connector`], [`Transport`] and [`Connection`] traits that
//! abstract over the persistent text-frame connection between a participant
//! and the authoritative peer.
//!
//! - [`Connector`] dials out (the client side: one logical connection per
//!   participant).
//! - [`Transport`] accepts incoming connections (the peer side).
//! - [`Connection`] is the open pipe both sides read and write frames on.
//!
//! A connection surfaces the four transport events the session layer cares
//! about: *open* (`connect` resolved `Ok`), *message* (`recv` returned a
//! frame), *close* (`recv` returned `Ok(None)`) and *error* (`connect` or
//! `recv` returned `Err`).
//!
//! # Feature Flags
//!
//! - `websocket` (default): WebSocket transport via `tokio-tungstenite`

#![allow(async_fn_in_trait)]

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{WebSocketConnection, WebSocketConnector, WebSocketTransport};

use std::fmt;
use std::future::Future;

/// Process-unique tag for one accepted or dialed connection.
///
/// Shows up in logs as `conn-N` and lets the peer tell a participant's
/// current connection from one it already replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Opens outgoing connections to a remote peer.
///
/// The session layer holds exactly one `Connector` and calls
/// [`connect`](Self::connect) at most once per handshake. Resolving `Ok`
/// is the transport's "open" signal; resolving `Err` is an error before
/// opening.
///
/// The returned futures are `Send` because the session layer drives them
/// from spawned Tokio tasks.
pub trait Connector: Send + Sync + 'static {
    /// The connection type produced by this connector.
    type Connection: Connection;

    /// Dials `url` and resolves once the connection is open.
    fn connect(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;
}

/// Accepts new incoming connections.
pub trait Transport: Send + Sync + 'static {
    /// The connection type produced by this transport.
    type Connection: Connection;

    /// Waits for and accepts the next incoming connection.
    async fn accept(&mut self) -> Result<Self::Connection, TransportError>;
}

/// A single open connection that carries UTF-8 text frames.
///
/// `send` and `recv` may be called concurrently from different tasks: a
/// reader task parks in `recv` while other tasks keep sending.
pub trait Connection: Send + Sync + 'static {
    /// Sends one frame to the remote peer.
    fn send(
        &self,
        frame: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receives the next frame from the remote peer.
    ///
    /// Returns `Ok(None)` when the connection is cleanly closed.
    fn recv(
        &self,
    ) -> impl Future<Output = Result<Option<String>, TransportError>> + Send;

    /// Closes the connection.
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Returns the unique identifier for this connection.
    fn id(&self) -> ConnectionId;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_id_logs_as_conn_n() {
        let id = ConnectionId::new(7);
        assert_eq!(id.to_string(), "conn-7");
        assert_eq!(id.into_inner(), 7);
    }

    #[test]
    fn test_connection_id_tells_replaced_connection_apart() {
        let replaced = ConnectionId::new(3);
        let current = ConnectionId::new(4);
        assert_ne!(replaced, current);
        assert_eq!(current, ConnectionId::new(4));
    }

    #[test]
    fn test_connect_failed_keeps_io_source() {
        use std::error::Error as _;

        let err = TransportError::ConnectFailed(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "nobody home",
        ));
        assert_eq!(err.to_string(), "could not open connection: nobody home");
        assert!(err.source().is_some());
    }

    #[test]
    fn test_connection_closed_display_includes_reason() {
        let err = TransportError::ConnectionClosed("peer went away".into());
        assert_eq!(err.to_string(), "connection closed: peer went away");
    }
}
