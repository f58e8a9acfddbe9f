//! Error types for the lobby layer.

use rally_protocol::{LobbyId, LobbyStatus, ParticipantId, ProtocolError, Role};

/// Errors from lobby operations, on either side of the connection.
///
/// On the authoritative peer these are rejections that become `error`
/// frames. On the participant side only [`ProtocolViolation`] occurs,
/// when an inbound frame breaks the lobby invariants.
///
/// [`ProtocolViolation`]: LobbyError::ProtocolViolation
#[derive(Debug, thiserror::Error)]
pub enum LobbyError {
    /// The lobby does not exist.
    #[error("lobby {0} not found")]
    NotFound(LobbyId),

    /// Every seat for the requested role is taken.
    #[error("no {role} seats left in lobby {lobby_id}")]
    RoleFull { lobby_id: LobbyId, role: Role },

    /// The participant already holds a seat in this lobby.
    #[error("participant {0} is already in lobby {1}")]
    AlreadyMember(ParticipantId, LobbyId),

    /// The participant holds a seat in a different lobby. A participant is
    /// in at most one lobby at a time.
    #[error("participant {0} must leave lobby {1} first")]
    InAnotherLobby(ParticipantId, LobbyId),

    /// The participant holds no seat in this lobby.
    #[error("participant {0} is not in lobby {1}")]
    NotInLobby(ParticipantId, LobbyId),

    /// The lobby is no longer accepting participants.
    #[error("lobby {0} is {1} and not accepting participants")]
    NotJoinable(LobbyId, LobbyStatus),

    /// The request itself is malformed (empty name, zero capacity).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// An inbound frame is well-formed but semantically invalid.
    #[error("protocol violation: {0}")]
    ProtocolViolation(#[from] ProtocolError),
}
