//! Unified error type for Rally.

use rally_lobby::LobbyError;
use rally_protocol::ProtocolError;
use rally_session::SessionError;
use rally_transport::TransportError;

/// Top-level error that wraps every crate-specific error.
///
/// `#[from]` on each variant lets `?` convert sub-crate errors directly.
#[derive(Debug, thiserror::Error)]
pub enum RallyError {
    /// Bytes on the wire: bind, accept, send, receive.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Encoding, decoding, malformed or unexpected messages.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Participant connection lifecycle and local request validation.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Lobby rules and directory violations.
    #[error(transparent)]
    Lobby(#[from] LobbyError),
}
