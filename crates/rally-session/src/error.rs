//! Error types for the session layer.

use std::sync::Arc;

use rally_protocol::ProtocolError;
use rally_transport::TransportError;

/// Errors surfaced by the [`ConnectionManager`](crate::ConnectionManager).
///
/// None of these are retried internally; retry policy belongs to the caller
/// (or to an explicitly configured [`ReconnectPolicy`](crate::ReconnectPolicy)).
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The transport failed before it opened. Every caller that was waiting
    /// on the same handshake receives the same underlying error, hence the
    /// `Arc`.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(#[source] Arc<TransportError>),

    /// A send was attempted without an open transport, and connecting did
    /// not bring one up.
    #[error("not connected")]
    NotConnected,

    /// The transport was open but writing the frame failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] TransportError),

    /// A local precondition failed before anything was sent, e.g. an empty
    /// lobby name.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The outbound message could not be encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
