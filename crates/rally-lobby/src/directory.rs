//! The participant's local projection of the lobby directory.
//!
//! The directory is a cache of what the authoritative peer last said, not
//! a source of truth. It changes only when an inbound `lobby` frame is
//! applied; sending a request never touches it. Whatever the peer says
//! later wins, even if it contradicts what the participant expected.
//!
//! | Inbound frame | Effect |
//! |---|---|
//! | `list` | replaces every entry with the snapshot |
//! | `update` with `lobby` | upserts that lobby; tracks whether the local participant sits in it |
//! | `update` with only `lobby_id` | the local participant was removed from that lobby |
//!
//! Lobbies that break the capacity or seating invariants never enter the
//! directory, so every entry satisfies [`Lobby::validate`] at all times.

use rally_protocol::{Lobby, LobbyFrame, LobbyId, ParticipantId, ProtocolError, Role};

use crate::LobbyError;

// ---------------------------------------------------------------------------
// DirectoryEvent
// ---------------------------------------------------------------------------

/// What applying one frame changed.
#[derive(Debug, Clone, PartialEq)]
pub enum DirectoryEvent {
    /// A `list` snapshot replaced the directory.
    Replaced {
        /// Entries now in the directory.
        lobbies: usize,
        /// Snapshot entries dropped for breaking lobby invariants.
        rejected: Vec<LobbyId>,
    },
    /// One lobby was inserted or replaced.
    Upserted { lobby_id: LobbyId },
    /// The local participant was removed from a lobby.
    Removed { lobby_id: LobbyId },
}

// ---------------------------------------------------------------------------
// JoinCheck
// ---------------------------------------------------------------------------

/// Advisory answer to "could I join this lobby in this role?".
///
/// Only the authoritative peer enforces these rules; the participant uses
/// the answer to enable or disable UI affordances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinCheck {
    /// Nothing known locally stands in the way.
    Allowed,
    /// The lobby is not in the directory.
    UnknownLobby,
    /// The local participant already sits in this lobby.
    AlreadyMember(Role),
    /// The local participant sits in another lobby.
    InAnotherLobby(LobbyId),
    /// Every seat for the role is taken.
    RoleFull,
    /// The lobby has left the `waiting` status.
    NotWaiting,
}

impl JoinCheck {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

// ---------------------------------------------------------------------------
// LobbyDirectory
// ---------------------------------------------------------------------------

/// Locally known lobbies plus the one the local participant occupies.
#[derive(Debug, Clone, PartialEq)]
pub struct LobbyDirectory {
    local: ParticipantId,
    /// In snapshot order; lobbies first seen through `update` are appended.
    lobbies: Vec<Lobby>,
    current: Option<LobbyId>,
}

impl LobbyDirectory {
    /// An empty directory for `local`.
    pub fn new(local: ParticipantId) -> Self {
        Self {
            local,
            lobbies: Vec::new(),
            current: None,
        }
    }

    /// The participant this directory is projected for.
    pub fn local_participant(&self) -> &ParticipantId {
        &self.local
    }

    /// Every known lobby.
    pub fn lobbies(&self) -> &[Lobby] {
        &self.lobbies
    }

    pub fn get(&self, lobby_id: &LobbyId) -> Option<&Lobby> {
        self.lobbies.iter().find(|lobby| &lobby.id == lobby_id)
    }

    pub fn len(&self) -> usize {
        self.lobbies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lobbies.is_empty()
    }

    /// Id of the lobby the local participant currently occupies.
    pub fn current_id(&self) -> Option<&LobbyId> {
        self.current.as_ref()
    }

    /// The lobby the local participant currently occupies, if it is known.
    pub fn current(&self) -> Option<&Lobby> {
        self.current.as_ref().and_then(|id| self.get(id))
    }

    /// Applies one inbound `lobby` frame.
    ///
    /// # Errors
    /// [`LobbyError::ProtocolViolation`] if the frame is a request-only
    /// action, an `update` carries neither `lobby` nor `lobby_id`, or the
    /// updated lobby breaks the lobby invariants. The directory is left
    /// unchanged in every error case.
    pub fn apply(&mut self, frame: &LobbyFrame) -> Result<DirectoryEvent, LobbyError> {
        match frame {
            LobbyFrame::List { lobbies } => Ok(self.replace(lobbies.as_deref().unwrap_or_default())),
            LobbyFrame::Update {
                lobby: Some(lobby), ..
            } => self.upsert(lobby),
            LobbyFrame::Update {
                lobby: None,
                lobby_id: Some(lobby_id),
            } => Ok(self.remove_local(lobby_id)),
            LobbyFrame::Update {
                lobby: None,
                lobby_id: None,
            } => Err(violation("update carries neither lobby nor lobby_id")),
            LobbyFrame::Create { .. } | LobbyFrame::Join { .. } | LobbyFrame::Leave { .. } => {
                Err(violation(format!(
                    "`{}` is a request and is never sent to participants",
                    frame.action()
                )))
            }
        }
    }

    /// Advisory check for joining `lobby_id` as `role`.
    pub fn check_join(&self, lobby_id: &LobbyId, role: Role) -> JoinCheck {
        let Some(lobby) = self.get(lobby_id) else {
            return JoinCheck::UnknownLobby;
        };
        if let Some(held) = lobby.role_of(&self.local) {
            return JoinCheck::AlreadyMember(held);
        }
        if let Some(current) = self.current.as_ref().filter(|current| *current != lobby_id) {
            return JoinCheck::InAnotherLobby(current.clone());
        }
        if !lobby.status.is_joinable() {
            return JoinCheck::NotWaiting;
        }
        if !lobby.has_room_for(role) {
            return JoinCheck::RoleFull;
        }
        JoinCheck::Allowed
    }

    fn replace(&mut self, snapshot: &[Lobby]) -> DirectoryEvent {
        let mut rejected = Vec::new();
        let mut lobbies = Vec::with_capacity(snapshot.len());
        for lobby in snapshot {
            match lobby.validate() {
                Ok(()) => lobbies.push(lobby.clone()),
                Err(error) => {
                    tracing::warn!(lobby_id = %lobby.id, %error, "dropping invalid lobby from snapshot");
                    rejected.push(lobby.id.clone());
                }
            }
        }

        // The snapshot is ground truth for membership too.
        self.current = lobbies
            .iter()
            .find(|lobby| lobby.is_member(&self.local))
            .map(|lobby| lobby.id.clone());
        self.lobbies = lobbies;

        tracing::debug!(lobbies = self.lobbies.len(), rejected = rejected.len(), "directory replaced");
        DirectoryEvent::Replaced {
            lobbies: self.lobbies.len(),
            rejected,
        }
    }

    fn upsert(&mut self, lobby: &Lobby) -> Result<DirectoryEvent, LobbyError> {
        lobby.validate()?;

        match self.lobbies.iter_mut().find(|known| known.id == lobby.id) {
            Some(known) => *known = lobby.clone(),
            None => self.lobbies.push(lobby.clone()),
        }

        if lobby.is_member(&self.local) {
            if self.current.as_ref() != Some(&lobby.id) {
                tracing::info!(lobby_id = %lobby.id, "entered lobby");
            }
            self.current = Some(lobby.id.clone());
        } else if self.current.as_ref() == Some(&lobby.id) {
            tracing::info!(lobby_id = %lobby.id, "no longer seated in current lobby");
            self.current = None;
        }

        Ok(DirectoryEvent::Upserted {
            lobby_id: lobby.id.clone(),
        })
    }

    fn remove_local(&mut self, lobby_id: &LobbyId) -> DirectoryEvent {
        if self.current.as_ref() == Some(lobby_id) {
            tracing::info!(%lobby_id, "left lobby");
            self.current = None;
        }

        // Patch the cached entry so it stops listing us; the peer drops
        // lobbies nobody sits in.
        let local = &self.local;
        if let Some(known) = self.lobbies.iter_mut().find(|known| &known.id == lobby_id) {
            known.commanders.retain(|p| p != local);
            known.pawns.retain(|p| p != local);
        }
        self.lobbies
            .retain(|known| &known.id != lobby_id || known.member_count() > 0);

        DirectoryEvent::Removed {
            lobby_id: lobby_id.clone(),
        }
    }
}

fn violation(reason: impl Into<String>) -> LobbyError {
    LobbyError::ProtocolViolation(ProtocolError::InvalidMessage(reason.into()))
}

// =========================================================================
// Tests
// =========================================================================
