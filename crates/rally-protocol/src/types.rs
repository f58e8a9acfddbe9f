//! Core data model shared by every participant and the authoritative peer.
//!
//! These are the structures that appear inside frames: identities, roles,
//! and the [`Lobby`] record itself.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Opaque identifier of one connected client instance.
///
/// Generated once when a client starts (a random UUID v4 in its hyphenated
/// form) and embedded in the transport address, so the peer knows who is on
/// the other end without a handshake message. The peer treats it as an
/// opaque string.
///
/// `#[serde(transparent)]` keeps it a plain JSON string on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Mints a fresh random identity.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wraps an identity received from elsewhere (a path segment, a frame).
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Identifier of a lobby, minted by the authoritative peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LobbyId(String);

impl LobbyId {
    /// Mints a fresh random lobby id. Only the authoritative peer does this.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Wraps a lobby id received in a frame.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LobbyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LobbyId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// The two seats a participant can take in a lobby.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Commander,
    Pawn,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Commander => f.write_str("commander"),
            Self::Pawn => f.write_str("pawn"),
        }
    }
}

impl FromStr for Role {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "commander" => Ok(Self::Commander),
            "pawn" => Ok(Self::Pawn),
            other => Err(ProtocolError::InvalidMessage(format!(
                "unknown role `{other}`"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// LobbyStatus
// ---------------------------------------------------------------------------

/// Lifecycle of a lobby. Only the authoritative peer moves it forward:
///
/// ```text
/// Waiting → InProgress → Completed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LobbyStatus {
    /// Accepting participants.
    #[default]
    Waiting,
    /// A match is running.
    InProgress,
    /// The match has ended.
    Completed,
}

impl LobbyStatus {
    /// Returns `true` if the lobby is accepting new participants.
    pub fn is_joinable(&self) -> bool {
        matches!(self, Self::Waiting)
    }
}

impl fmt::Display for LobbyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => f.write_str("waiting"),
            Self::InProgress => f.write_str("in_progress"),
            Self::Completed => f.write_str("completed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Lobby
// ---------------------------------------------------------------------------

/// A named, capacity-bounded grouping of participants.
///
/// The host is positional: it is whoever sits first in `commanders`. There
/// is no separate host field, so when the host leaves the next commander
/// inherits the role.
///
/// Capacity fields use the camelCase names the browser client expects,
/// while `created_at` keeps its snake_case spelling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lobby {
    pub id: LobbyId,
    pub name: String,
    #[serde(default)]
    pub commanders: Vec<ParticipantId>,
    #[serde(default)]
    pub pawns: Vec<ParticipantId>,
    #[serde(rename = "maxCommanders")]
    pub max_commanders: usize,
    #[serde(rename = "maxPawns")]
    pub max_pawns: usize,
    #[serde(default)]
    pub status: LobbyStatus,
    /// Unix time in seconds.
    #[serde(default)]
    pub created_at: f64,
}

impl Lobby {
    /// The lobby's host: the first commander, if any.
    pub fn host(&self) -> Option<&ParticipantId> {
        self.commanders.first()
    }

    /// The participants currently seated in `role`, in seating order.
    pub fn members(&self, role: Role) -> &[ParticipantId] {
        match role {
            Role::Commander => &self.commanders,
            Role::Pawn => &self.pawns,
        }
    }

    /// Maximum number of seats for `role`.
    pub fn capacity(&self, role: Role) -> usize {
        match role {
            Role::Commander => self.max_commanders,
            Role::Pawn => self.max_pawns,
        }
    }

    /// Returns the role `participant` holds here, if they are a member.
    pub fn role_of(&self, participant: &ParticipantId) -> Option<Role> {
        if self.commanders.contains(participant) {
            Some(Role::Commander)
        } else if self.pawns.contains(participant) {
            Some(Role::Pawn)
        } else {
            None
        }
    }

    /// Returns `true` if `participant` holds either role.
    pub fn is_member(&self, participant: &ParticipantId) -> bool {
        self.role_of(participant).is_some()
    }

    /// Returns `true` if another participant could take `role`.
    pub fn has_room_for(&self, role: Role) -> bool {
        self.members(role).len() < self.capacity(role)
    }

    /// Total number of seated participants.
    pub fn member_count(&self) -> usize {
        self.commanders.len() + self.pawns.len()
    }

    /// Checks the structural invariants every lobby must satisfy:
    ///
    /// - `commanders.len() <= max_commanders`
    /// - `pawns.len() <= max_pawns`
    /// - nobody is seated twice, in the same role or across roles
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidMessage`] naming the first violation.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        for role in [Role::Commander, Role::Pawn] {
            let seated = self.members(role).len();
            let capacity = self.capacity(role);
            if seated > capacity {
                return Err(ProtocolError::InvalidMessage(format!(
                    "lobby {} seats {seated} {role}s but allows {capacity}",
                    self.id
                )));
            }
        }

        let mut seen = std::collections::HashSet::new();
        for participant in self.commanders.iter().chain(&self.pawns) {
            if !seen.insert(participant) {
                return Err(ProtocolError::InvalidMessage(format!(
                    "participant {participant} is seated twice in lobby {}",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn lobby(commanders: &[&str], pawns: &[&str]) -> Lobby {
        Lobby {
            id: LobbyId::from("L1"),
            name: "Alpha".into(),
            commanders: commanders.iter().map(|&p| p.into()).collect(),
            pawns: pawns.iter().map(|&p| p.into()).collect(),
            max_commanders: 2,
            max_pawns: 4,
            status: LobbyStatus::Waiting,
            created_at: 1_700_000_000.5,
        }
    }

    // =====================================================================
    // Identity types
    // =====================================================================

    #[test]
    fn test_participant_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&ParticipantId::from("A")).unwrap();
        assert_eq!(json, "\"A\"");
    }

    #[test]
    fn test_participant_id_generate_is_unique_uuid() {
        let a = ParticipantId::generate();
        let b = ParticipantId::generate();
        assert_ne!(a, b);
        assert!(uuid::Uuid::parse_str(a.as_str()).is_ok());
    }

    #[test]
    fn test_lobby_id_display_is_raw_value() {
        assert_eq!(LobbyId::from("L1").to_string(), "L1");
    }

    // =====================================================================
    // Role / LobbyStatus
    // =====================================================================

    #[test]
    fn test_role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Commander).unwrap(), "\"commander\"");
        assert_eq!(serde_json::to_string(&Role::Pawn).unwrap(), "\"pawn\"");
    }

    #[test]
    fn test_role_from_str_rejects_unknown() {
        assert_eq!("pawn".parse::<Role>().unwrap(), Role::Pawn);
        assert!("spectator".parse::<Role>().is_err());
    }

    #[test]
    fn test_lobby_status_serializes_snake_case() {
        let json = serde_json::to_string(&LobbyStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }

    #[test]
    fn test_lobby_status_only_waiting_is_joinable() {
        assert!(LobbyStatus::Waiting.is_joinable());
        assert!(!LobbyStatus::InProgress.is_joinable());
        assert!(!LobbyStatus::Completed.is_joinable());
    }

    // =====================================================================
    // Lobby
    // =====================================================================

    #[test]
    fn test_lobby_json_uses_wire_field_names() {
        let json = serde_json::to_value(lobby(&["A"], &[])).unwrap();
        assert_eq!(json["maxCommanders"], 2);
        assert_eq!(json["maxPawns"], 4);
        assert_eq!(json["status"], "waiting");
        assert_eq!(json["commanders"], serde_json::json!(["A"]));
        assert!(json.get("created_at").is_some());
    }

    #[test]
    fn test_lobby_missing_optional_fields_default() {
        let json = r#"{"id":"L9","name":"x","maxCommanders":1,"maxPawns":1}"#;
        let lobby: Lobby = serde_json::from_str(json).unwrap();
        assert!(lobby.commanders.is_empty());
        assert_eq!(lobby.status, LobbyStatus::Waiting);
    }

    #[test]
    fn test_lobby_host_is_first_commander() {
        assert_eq!(lobby(&["A", "B"], &[]).host(), Some(&"A".into()));
        assert_eq!(lobby(&[], &["C"]).host(), None);
    }

    #[test]
    fn test_lobby_role_of_and_membership() {
        let l = lobby(&["A"], &["B"]);
        assert_eq!(l.role_of(&"A".into()), Some(Role::Commander));
        assert_eq!(l.role_of(&"B".into()), Some(Role::Pawn));
        assert!(!l.is_member(&"Z".into()));
        assert_eq!(l.member_count(), 2);
    }

    #[test]
    fn test_lobby_has_room_for_tracks_capacity() {
        let l = lobby(&["A", "B"], &["C"]);
        assert!(!l.has_room_for(Role::Commander));
        assert!(l.has_room_for(Role::Pawn));
    }

    #[test]
    fn test_lobby_validate_accepts_full_lobby() {
        assert!(lobby(&["A", "B"], &["C", "D", "E", "F"]).validate().is_ok());
    }

    #[test]
    fn test_lobby_validate_rejects_over_capacity() {
        let err = lobby(&["A", "B", "C"], &[]).validate().unwrap_err();
        assert!(err.to_string().contains("3 commanders"));
    }

    #[test]
    fn test_lobby_validate_rejects_participant_in_both_roles() {
        let err = lobby(&["A"], &["A"]).validate().unwrap_err();
        assert!(err.to_string().contains("seated twice"));
    }
}
