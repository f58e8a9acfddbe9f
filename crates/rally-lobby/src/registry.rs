//! Authoritative lobby state, owned by the peer.
//!
//! Participants only ever see projections of this state. The registry is
//! the single place the lobby rules are enforced:
//!
//! - the creator becomes the first commander, i.e. the host
//! - a role never seats more than its capacity
//! - a participant sits in at most one lobby at a time
//! - only `waiting` lobbies accept new participants
//! - a lobby nobody sits in is removed

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use rally_protocol::{Lobby, LobbyId, LobbyStatus, ParticipantId, Role};

use crate::LobbyError;

/// Outcome of a participant leaving a lobby.
#[derive(Debug, Clone, PartialEq)]
pub struct Departure {
    pub lobby_id: LobbyId,
    /// The lobby after the departure, or `None` if it emptied and was
    /// removed.
    pub remaining: Option<Lobby>,
}

/// Every live lobby plus an index of who sits where.
#[derive(Debug, Default)]
pub struct LobbyRegistry {
    lobbies: HashMap<LobbyId, Lobby>,
    /// Creation order, for stable `list()` output.
    order: Vec<LobbyId>,
    /// A participant is in at most ONE lobby at a time.
    seats: HashMap<ParticipantId, LobbyId>,
}

impl LobbyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new lobby with `creator` seated as its first commander.
    ///
    /// # Errors
    /// - `InvalidRequest` if the name is blank or there is no commander
    ///   seat for the creator.
    /// - `InAnotherLobby` if the creator already sits somewhere.
    pub fn create(
        &mut self,
        creator: &ParticipantId,
        name: &str,
        max_commanders: usize,
        max_pawns: usize,
    ) -> Result<&Lobby, LobbyError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LobbyError::InvalidRequest("lobby name is empty".into()));
        }
        if max_commanders == 0 {
            return Err(LobbyError::InvalidRequest(
                "a lobby needs at least one commander seat".into(),
            ));
        }
        if let Some(current) = self.seats.get(creator) {
            return Err(LobbyError::InAnotherLobby(creator.clone(), current.clone()));
        }

        let lobby = Lobby {
            id: LobbyId::generate(),
            name: name.to_owned(),
            commanders: vec![creator.clone()],
            pawns: Vec::new(),
            max_commanders,
            max_pawns,
            status: LobbyStatus::Waiting,
            created_at: unix_now(),
        };
        let lobby_id = lobby.id.clone();
        tracing::info!(%lobby_id, host = %creator, name, "lobby created");

        self.seats.insert(creator.clone(), lobby_id.clone());
        self.order.push(lobby_id.clone());
        Ok(self.lobbies.entry(lobby_id).or_insert(lobby))
    }

    /// Seats `participant` in `lobby_id` as `role`.
    ///
    /// # Errors
    /// `AlreadyMember`, `InAnotherLobby`, `NotFound`, `NotJoinable` or
    /// `RoleFull`, checked in that order.
    pub fn join(
        &mut self,
        participant: &ParticipantId,
        lobby_id: &LobbyId,
        role: Role,
    ) -> Result<&Lobby, LobbyError> {
        if let Some(current) = self.seats.get(participant) {
            if current == lobby_id {
                return Err(LobbyError::AlreadyMember(participant.clone(), lobby_id.clone()));
            }
            return Err(LobbyError::InAnotherLobby(participant.clone(), current.clone()));
        }

        let lobby = self
            .lobbies
            .get_mut(lobby_id)
            .ok_or_else(|| LobbyError::NotFound(lobby_id.clone()))?;
        if !lobby.status.is_joinable() {
            return Err(LobbyError::NotJoinable(lobby_id.clone(), lobby.status));
        }
        if !lobby.has_room_for(role) {
            return Err(LobbyError::RoleFull {
                lobby_id: lobby_id.clone(),
                role,
            });
        }

        match role {
            Role::Commander => lobby.commanders.push(participant.clone()),
            Role::Pawn => lobby.pawns.push(participant.clone()),
        }
        self.seats.insert(participant.clone(), lobby_id.clone());
        tracing::info!(%lobby_id, %participant, %role, "participant joined lobby");
        Ok(lobby)
    }

    /// Removes `participant` from `lobby_id`, dropping the lobby if it
    /// empties.
    ///
    /// # Errors
    /// `NotFound` if the lobby does not exist, `NotInLobby` if the
    /// participant does not sit in it.
    pub fn leave(
        &mut self,
        participant: &ParticipantId,
        lobby_id: &LobbyId,
    ) -> Result<Departure, LobbyError> {
        if !self.lobbies.contains_key(lobby_id) {
            return Err(LobbyError::NotFound(lobby_id.clone()));
        }
        if self.seats.get(participant) != Some(lobby_id) {
            return Err(LobbyError::NotInLobby(participant.clone(), lobby_id.clone()));
        }
        Ok(self.unseat(participant, lobby_id))
    }

    /// Removes `participant` from whatever lobby they sit in. Used when a
    /// connection goes away.
    pub fn remove_participant(&mut self, participant: &ParticipantId) -> Option<Departure> {
        let lobby_id = self.seats.get(participant)?.clone();
        Some(self.unseat(participant, &lobby_id))
    }

    /// Moves a lobby one step along `Waiting → InProgress → Completed`.
    ///
    /// # Errors
    /// `NotFound` if the lobby does not exist, `InvalidRequest` if it is
    /// already completed.
    pub fn advance(&mut self, lobby_id: &LobbyId) -> Result<&Lobby, LobbyError> {
        let lobby = self
            .lobbies
            .get_mut(lobby_id)
            .ok_or_else(|| LobbyError::NotFound(lobby_id.clone()))?;
        let next = match lobby.status {
            LobbyStatus::Waiting => LobbyStatus::InProgress,
            LobbyStatus::InProgress => LobbyStatus::Completed,
            LobbyStatus::Completed => {
                return Err(LobbyError::InvalidRequest(format!(
                    "lobby {lobby_id} is already completed"
                )));
            }
        };
        tracing::info!(%lobby_id, from = %lobby.status, to = %next, "lobby status changed");
        lobby.status = next;
        Ok(lobby)
    }

    pub fn get(&self, lobby_id: &LobbyId) -> Option<&Lobby> {
        self.lobbies.get(lobby_id)
    }

    /// The lobby `participant` sits in, if any.
    pub fn lobby_of(&self, participant: &ParticipantId) -> Option<&LobbyId> {
        self.seats.get(participant)
    }

    /// Snapshot of every lobby, oldest first.
    pub fn list(&self) -> Vec<Lobby> {
        self.order
            .iter()
            .filter_map(|id| self.lobbies.get(id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lobbies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lobbies.is_empty()
    }

    fn unseat(&mut self, participant: &ParticipantId, lobby_id: &LobbyId) -> Departure {
        self.seats.remove(participant);

        let Some(lobby) = self.lobbies.get_mut(lobby_id) else {
            return Departure {
                lobby_id: lobby_id.clone(),
                remaining: None,
            };
        };
        lobby.commanders.retain(|p| p != participant);
        lobby.pawns.retain(|p| p != participant);
        tracing::info!(%lobby_id, %participant, "participant left lobby");

        let remaining = if lobby.member_count() == 0 {
            self.lobbies.remove(lobby_id);
            self.order.retain(|id| id != lobby_id);
            tracing::info!(%lobby_id, "lobby removed");
            None
        } else {
            Some(lobby.clone())
        };

        Departure {
            lobby_id: lobby_id.clone(),
            remaining,
        }
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default()
}

// =========================================================================
// Tests
// =========================================================================
