//! Per-connection handler: identity, request handling, and fan-out.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Read the participant id from the `/ws/{participant_id}` path
//!   2. Register an outbox so other tasks can reach this participant
//!   3. Loop: decode inbound frames and apply them; flush the outbox
//!   4. On exit: drop the participant from matchmaking and their lobby
//!
//! Rejections never close the connection: they come back as `error`
//! frames and the loop carries on.

use std::sync::Arc;

use rally_lobby::{Departure, LobbyError};
use rally_protocol::{
    ChatMessage, Codec, ErrorNotice, LobbyFrame, MatchmakingAction, MatchmakingRequest, Message,
    ParticipantId, ProtocolError,
};
use rally_transport::{Connection, WebSocketConnection};
use tokio::sync::mpsc;

use crate::RallyError;
use crate::server::{Outbox, ServerState, update_for_members};

type Deliveries = Vec<(ParticipantId, Message)>;

/// Drop guard that removes a participant's traces when the handler exits.
///
/// `Drop` is synchronous, so the async cleanup runs in a spawned task.
struct ParticipantGuard {
    participant: ParticipantId,
    conn: rally_transport::ConnectionId,
    state: Arc<ServerState>,
}

impl Drop for ParticipantGuard {
    fn drop(&mut self) {
        let participant = self.participant.clone();
        let conn = self.conn;
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            cleanup(&state, &participant, conn).await;
        });
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection(
    conn: WebSocketConnection,
    state: Arc<ServerState>,
) -> Result<(), RallyError> {
    let conn_id = conn.id();

    // --- Step 1: identity ---
    let participant = match participant_from_path(conn.path()) {
        Ok(participant) => participant,
        Err(e) => {
            send_error(&conn, &state, &e.to_string()).await?;
            conn.close().await?;
            return Err(e.into());
        }
    };

    // --- Step 2: outbox ---
    let (tx, mut rx) = mpsc::unbounded_channel();
    {
        let mut outboxes = state.outboxes.lock().await;
        if outboxes.contains_key(&participant) {
            drop(outboxes);
            tracing::warn!(%conn_id, %participant, "participant already connected");
            send_error(&conn, &state, "participant already connected").await?;
            conn.close().await?;
            return Ok(());
        }
        outboxes.insert(participant.clone(), Outbox { conn_id, tx });
    }
    let _guard = ParticipantGuard {
        participant: participant.clone(),
        conn: conn_id,
        state: Arc::clone(&state),
    };
    tracing::info!(%conn_id, %participant, "participant connected");

    // --- Step 3: message loop ---
    loop {
        tokio::select! {
            received = conn.recv() => {
                let frame = match received {
                    Ok(Some(frame)) => frame,
                    Ok(None) => {
                        tracing::info!(%participant, "connection closed cleanly");
                        break;
                    }
                    Err(e) => {
                        tracing::debug!(%participant, error = %e, "recv error");
                        break;
                    }
                };

                let message = match state.codec.decode(&frame) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::debug!(%participant, error = %e, "failed to decode frame");
                        send_error(&conn, &state, &format!("invalid message: {e}")).await?;
                        continue;
                    }
                };

                let deliveries = handle_message(&state, &participant, message).await;
                state.deliver(deliveries).await;
            }
            Some(outbound) = rx.recv() => {
                let frame = state.codec.encode(&outbound)?;
                conn.send(&frame).await?;
            }
        }
    }

    // _guard drops here → cleanup fires.
    Ok(())
}

/// Applies one inbound message and returns who must hear about it.
async fn handle_message(
    state: &ServerState,
    participant: &ParticipantId,
    message: Message,
) -> Deliveries {
    let kind = message.kind();
    let result = match message {
        Message::Lobby(frame) => handle_lobby(state, participant, frame).await,
        Message::Chat(chat) => handle_chat(state, participant, chat).await,
        Message::Matchmaking(request) => handle_matchmaking(state, participant, request).await,
        Message::Match(_) | Message::Error(_) => Err(LobbyError::ProtocolViolation(
            ProtocolError::InvalidMessage(format!("`{kind}` is sent by the peer only")),
        )),
    };

    result.unwrap_or_else(|e| {
        tracing::debug!(%participant, error = %e, "request rejected");
        vec![(participant.clone(), error_message(&e.to_string()))]
    })
}

async fn handle_lobby(
    state: &ServerState,
    participant: &ParticipantId,
    frame: LobbyFrame,
) -> Result<Deliveries, LobbyError> {
    let mut lobbies = state.lobbies.lock().await;
    match frame {
        LobbyFrame::Create {
            name,
            max_commanders,
            max_pawns,
            ..
        } => {
            let lobby = lobbies.create(participant, &name, max_commanders, max_pawns)?;
            Ok(update_for_members(lobby))
        }
        LobbyFrame::Join { lobby_id, role, .. } => {
            let lobby = lobbies.join(participant, &lobby_id, role)?;
            Ok(update_for_members(lobby))
        }
        LobbyFrame::Leave { lobby_id } => {
            let departure = lobbies.leave(participant, &lobby_id)?;
            Ok(departure_notices(participant, departure))
        }
        LobbyFrame::List { .. } => Ok(vec![(
            participant.clone(),
            Message::Lobby(LobbyFrame::List {
                lobbies: Some(lobbies.list()),
            }),
        )]),
        LobbyFrame::Update { .. } => Err(LobbyError::ProtocolViolation(
            ProtocolError::InvalidMessage("`update` is sent by the peer only".into()),
        )),
    }
}

async fn handle_chat(
    state: &ServerState,
    participant: &ParticipantId,
    chat: ChatMessage,
) -> Result<Deliveries, LobbyError> {
    let lobbies = state.lobbies.lock().await;
    let lobby = lobbies
        .get(&chat.lobby_id)
        .ok_or_else(|| LobbyError::NotFound(chat.lobby_id.clone()))?;
    if !lobby.is_member(participant) {
        return Err(LobbyError::NotInLobby(participant.clone(), chat.lobby_id));
    }

    // The connection, not the frame, says who is talking.
    let message = Message::Chat(ChatMessage {
        sender_id: participant.clone(),
        ..chat
    });
    Ok(lobby
        .commanders
        .iter()
        .chain(&lobby.pawns)
        .map(|member| (member.clone(), message.clone()))
        .collect())
}

async fn handle_matchmaking(
    state: &ServerState,
    participant: &ParticipantId,
    request: MatchmakingRequest,
) -> Result<Deliveries, LobbyError> {
    let mut queue = state.matchmaking.lock().await;
    match request.action {
        MatchmakingAction::Join => {
            let Some(notice) = queue.join(participant) else {
                tracing::debug!(%participant, waiting = queue.len(), "waiting for a match");
                return Ok(Vec::new());
            };
            let message = Message::Match(notice.clone());
            Ok(notice
                .players
                .into_iter()
                .map(|player| (player, message.clone()))
                .collect())
        }
        MatchmakingAction::Leave => {
            if !queue.leave(participant) {
                tracing::debug!(%participant, "left matchmaking without waiting");
            }
            Ok(Vec::new())
        }
    }
}

/// The leaver hears the `lobby_id`-only removal signal; whoever is left
/// gets the updated lobby.
fn departure_notices(participant: &ParticipantId, departure: Departure) -> Deliveries {
    let mut deliveries = vec![(
        participant.clone(),
        Message::Lobby(LobbyFrame::Update {
            lobby: None,
            lobby_id: Some(departure.lobby_id),
        }),
    )];
    if let Some(remaining) = departure.remaining {
        deliveries.extend(update_for_members(&remaining));
    }
    deliveries
}

async fn cleanup(state: &ServerState, participant: &ParticipantId, conn: rally_transport::ConnectionId) {
    {
        let mut outboxes = state.outboxes.lock().await;
        // A newer connection for the same participant owns the slot now.
        if outboxes.get(participant).is_some_and(|outbox| outbox.conn_id != conn) {
            return;
        }
        outboxes.remove(participant);
    }

    state.matchmaking.lock().await.leave(participant);
    let departure = state.lobbies.lock().await.remove_participant(participant);
    if let Some(Departure {
        remaining: Some(remaining),
        ..
    }) = departure
    {
        state.deliver(update_for_members(&remaining)).await;
    }
    tracing::info!(%participant, %conn, "participant disconnected");
}

/// Parses `/ws/{participant_id}`.
fn participant_from_path(path: &str) -> Result<ParticipantId, ProtocolError> {
    match path.strip_prefix("/ws/") {
        Some(id) if !id.is_empty() && !id.contains('/') => Ok(ParticipantId::new(id)),
        _ => Err(ProtocolError::InvalidMessage(format!(
            "expected /ws/{{participant_id}}, got `{path}`"
        ))),
    }
}

fn error_message(text: &str) -> Message {
    Message::Error(ErrorNotice {
        message: text.to_owned(),
    })
}

/// Sends an `error` frame straight to the connection.
async fn send_error(
    conn: &WebSocketConnection,
    state: &ServerState,
    text: &str,
) -> Result<(), RallyError> {
    let frame = state.codec.encode(&error_message(text))?;
    conn.send(&frame).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_participant_from_path_accepts_ws_prefix() {
        let participant = participant_from_path("/ws/3f2a-9b").unwrap();
        assert_eq!(participant.as_str(), "3f2a-9b");
    }

    #[test]
    fn test_participant_from_path_rejects_other_shapes() {
        for path in ["/", "/ws/", "/ws", "/lobby/abc", "/ws/a/b"] {
            assert!(participant_from_path(path).is_err(), "{path} should be rejected");
        }
    }

    #[test]
    fn test_departure_notices_split_leaver_and_remaining() {
        use rally_lobby::LobbyRegistry;
        use rally_protocol::Role;

        let host = ParticipantId::from("host");
        let guest = ParticipantId::from("guest");
        let mut registry = LobbyRegistry::new();
        let lobby_id = registry.create(&host, "Alpha", 1, 1).unwrap().id.clone();
        registry.join(&guest, &lobby_id, Role::Pawn).unwrap();

        let departure = registry.leave(&guest, &lobby_id).unwrap();
        let deliveries = departure_notices(&guest, departure);

        assert_eq!(deliveries.len(), 2);
        assert_eq!(deliveries[0].0, guest);
        assert!(matches!(
            &deliveries[0].1,
            Message::Lobby(LobbyFrame::Update { lobby: None, lobby_id: Some(id) }) if *id == lobby_id
        ));
        assert_eq!(deliveries[1].0, host);
    }
}
