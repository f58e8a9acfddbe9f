//! The participant-facing session: one connection, the lobby directory it
//! feeds, and the actions a UI calls.
//!
//! Every action is a fire-and-forget request. `Ok(())` means the frame
//! left this process, nothing more. What the peer made of it shows up
//! later through [`Session::watch_directory`], [`Session::chat_feed`],
//! [`Session::match_feed`] or [`Session::error_feed`].

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use rally_lobby::{DirectoryEvent, JoinCheck, LobbyDirectory, LobbyError};
use rally_protocol::{
    ChatMessage, ErrorNotice, Lobby, LobbyFrame, LobbyId, MatchNotice, MatchmakingAction,
    MatchmakingRequest, Message, MessageKind, ParticipantId, Role,
};
use rally_session::{
    ConnectionManager, ConnectionState, Dispatcher, ListenerError, ListenerId, SessionConfig,
    SessionError,
};
use rally_transport::{Connector, WebSocketConnector};
use tokio::sync::{broadcast, watch};

/// Buffered notices per feed before slow subscribers start lagging.
const FEED_CAPACITY: usize = 64;

type Scrollback = Arc<Mutex<HashMap<LobbyId, VecDeque<ChatMessage>>>>;

/// A participant's connection to the authoritative peer plus the state
/// derived from what the peer has said so far.
///
/// ```rust,no_run
/// use rally::prelude::*;
///
/// # async fn play() -> Result<(), SessionError> {
/// let session = Session::new(SessionConfig::with_url("ws://localhost:8000"));
/// session.create_lobby("Friday night", 2, 4).await?;
///
/// let mut directory = session.watch_directory();
/// let current = directory.wait_for(|d| d.current().is_some()).await;
/// # let _ = current;
/// # Ok(())
/// # }
/// ```
pub struct Session<C: Connector = WebSocketConnector> {
    manager: ConnectionManager<C>,
    display_name: Option<String>,
    directory: Arc<watch::Sender<LobbyDirectory>>,
    chat: broadcast::Sender<ChatMessage>,
    scrollback: Scrollback,
    matches: broadcast::Sender<MatchNotice>,
    errors: broadcast::Sender<ErrorNotice>,
    listeners: Vec<(MessageKind, ListenerId)>,
}

impl Session {
    /// A session over WebSocket with a freshly generated participant id.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_connector(WebSocketConnector, config)
    }
}

impl<C: Connector> Session<C> {
    /// A session over `connector` with a freshly generated participant id.
    pub fn with_connector(connector: C, config: SessionConfig) -> Self {
        Self::with_identity(connector, ParticipantId::generate(), config)
    }

    /// A session over `connector` for a known participant.
    pub fn with_identity(connector: C, participant: ParticipantId, config: SessionConfig) -> Self {
        let manager = ConnectionManager::with_participant(connector, participant.clone(), &config);
        let (directory, _) = watch::channel(LobbyDirectory::new(participant));
        let (chat, _) = broadcast::channel(FEED_CAPACITY);
        let (matches, _) = broadcast::channel(FEED_CAPACITY);
        let (errors, _) = broadcast::channel(FEED_CAPACITY);

        let mut session = Self {
            manager,
            display_name: config.display_name.clone(),
            directory: Arc::new(directory),
            chat,
            scrollback: Arc::default(),
            matches,
            errors,
            listeners: Vec::with_capacity(4),
        };
        session.register_listeners(config.chat_scrollback);
        session
    }

    fn register_listeners(&mut self, scrollback_limit: usize) {
        let dispatcher = self.manager.dispatcher();

        let directory = Arc::clone(&self.directory);
        let scrollback = Arc::clone(&self.scrollback);
        let errors = self.errors.clone();
        let id = dispatcher.on::<LobbyFrame, _>(move |frame| {
            let mut outcome = None;
            directory.send_if_modified(|directory| {
                let result = directory.apply(frame);
                let changed = result.is_ok();
                outcome = Some(result);
                changed
            });

            match outcome {
                Some(Ok(event)) => {
                    tracing::debug!(?event, "directory updated");
                    if let DirectoryEvent::Replaced { rejected, .. } = &event {
                        for lobby_id in rejected {
                            let _ = errors.send(ErrorNotice {
                                message: format!("peer listed lobby {lobby_id} in a broken state"),
                            });
                        }
                    }
                    prune_scrollback(&scrollback, &directory.borrow(), &event);
                    Ok(())
                }
                Some(Err(e)) => {
                    let _ = errors.send(violation_notice(&e));
                    Err(ListenerError::from(e))
                }
                None => Ok(()),
            }
        });
        self.listeners.push((MessageKind::Lobby, id));

        let chat = self.chat.clone();
        let scrollback = Arc::clone(&self.scrollback);
        let id = dispatcher.on::<ChatMessage, _>(move |message| {
            if scrollback_limit > 0 {
                let mut scrollback = scrollback.lock().unwrap_or_else(PoisonError::into_inner);
                let lines = scrollback.entry(message.lobby_id.clone()).or_default();
                if lines.len() == scrollback_limit {
                    lines.pop_front();
                }
                lines.push_back(message.clone());
            }
            // No subscribers is fine; scrollback still has it.
            let _ = chat.send(message.clone());
            Ok(())
        });
        self.listeners.push((MessageKind::Chat, id));

        let matches = self.matches.clone();
        let id = dispatcher.on::<MatchNotice, _>(move |notice| {
            tracing::info!(match_id = %notice.timestamp, players = notice.players.len(), "match found");
            let _ = matches.send(notice.clone());
            Ok(())
        });
        self.listeners.push((MessageKind::Match, id));

        let errors = self.errors.clone();
        let id = dispatcher.on::<ErrorNotice, _>(move |notice| {
            tracing::warn!(message = %notice.message, "peer rejected a request");
            let _ = errors.send(notice.clone());
            Ok(())
        });
        self.listeners.push((MessageKind::Error, id));
    }

    // -----------------------------------------------------------------------
    // State
    // -----------------------------------------------------------------------

    pub fn participant_id(&self) -> &ParticipantId {
        self.manager.participant_id()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.manager.watch_state()
    }

    /// Snapshot of the directory as of the last applied `lobby` frame.
    pub fn directory(&self) -> LobbyDirectory {
        self.directory.borrow().clone()
    }

    /// Observe the directory. The receiver wakes after every frame that
    /// changed it.
    pub fn watch_directory(&self) -> watch::Receiver<LobbyDirectory> {
        self.directory.subscribe()
    }

    /// The lobby the local participant sits in, per the last update.
    pub fn current_lobby(&self) -> Option<Lobby> {
        self.directory.borrow().current().cloned()
    }

    /// Advisory check for greying out a join button. The peer decides.
    pub fn check_join(&self, lobby_id: &LobbyId, role: Role) -> JoinCheck {
        self.directory.borrow().check_join(lobby_id, role)
    }

    /// Chat messages delivered from now on, across every lobby.
    pub fn chat_feed(&self) -> broadcast::Receiver<ChatMessage> {
        self.chat.subscribe()
    }

    /// Retained chat for `lobby_id`, oldest first.
    pub fn scrollback(&self, lobby_id: &LobbyId) -> Vec<ChatMessage> {
        self.scrollback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(lobby_id)
            .map(|lines| lines.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn match_feed(&self) -> broadcast::Receiver<MatchNotice> {
        self.matches.subscribe()
    }

    /// Rejections the peer sent back, plus lobby frames from the peer that
    /// broke the lobby rules and were not applied.
    pub fn error_feed(&self) -> broadcast::Receiver<ErrorNotice> {
        self.errors.subscribe()
    }

    /// The dispatcher inbound messages fan out through, for listeners
    /// beyond the built-in ones.
    pub fn dispatcher(&self) -> &Dispatcher {
        self.manager.dispatcher()
    }

    // -----------------------------------------------------------------------
    // Actions
    // -----------------------------------------------------------------------

    /// Opens the connection now instead of on the first action.
    pub async fn connect(&self) -> Result<(), SessionError> {
        self.manager.connect().await
    }

    pub async fn disconnect(&self) {
        self.manager.disconnect().await;
    }

    /// Asks the peer for a new lobby with the local participant as host.
    ///
    /// # Errors
    /// `InvalidRequest` if `name` is blank or `max_commanders` is zero
    /// (the host needs a commander seat). Nothing is sent in that case.
    pub async fn create_lobby(
        &self,
        name: &str,
        max_commanders: usize,
        max_pawns: usize,
    ) -> Result<(), SessionError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SessionError::InvalidRequest("lobby name is empty".into()));
        }
        if max_commanders == 0 {
            return Err(SessionError::InvalidRequest(
                "a lobby needs at least one commander seat".into(),
            ));
        }
        self.send(LobbyFrame::Create {
            name: name.to_owned(),
            max_commanders,
            max_pawns,
            host_name: self.display_name.clone(),
        })
        .await
    }

    /// Asks to be seated in `lobby_id` as `role`.
    pub async fn join_lobby(&self, lobby_id: &LobbyId, role: Role) -> Result<(), SessionError> {
        require_lobby_id(lobby_id)?;
        self.send(LobbyFrame::Join {
            lobby_id: lobby_id.clone(),
            role,
            name: self.display_name.clone(),
        })
        .await
    }

    pub async fn leave_lobby(&self, lobby_id: &LobbyId) -> Result<(), SessionError> {
        require_lobby_id(lobby_id)?;
        self.send(LobbyFrame::Leave {
            lobby_id: lobby_id.clone(),
        })
        .await
    }

    /// Asks for a full snapshot; the reply replaces the directory.
    pub async fn request_lobby_list(&self) -> Result<(), SessionError> {
        self.send(LobbyFrame::List { lobbies: None }).await
    }

    /// Sends `text` to everyone in `lobby_id`, the sender included.
    pub async fn send_chat(&self, lobby_id: &LobbyId, text: &str) -> Result<(), SessionError> {
        require_lobby_id(lobby_id)?;
        if text.trim().is_empty() {
            return Err(SessionError::InvalidRequest("chat message is empty".into()));
        }
        self.send(ChatMessage {
            lobby_id: lobby_id.clone(),
            sender_id: self.participant_id().clone(),
            text: text.to_owned(),
        })
        .await
    }

    /// Queues for a match. A `match` notice arrives on
    /// [`match_feed`](Self::match_feed) once enough participants wait.
    pub async fn join_matchmaking(&self) -> Result<(), SessionError> {
        self.send(MatchmakingRequest {
            action: MatchmakingAction::Join,
        })
        .await
    }

    pub async fn leave_matchmaking(&self) -> Result<(), SessionError> {
        self.send(MatchmakingRequest {
            action: MatchmakingAction::Leave,
        })
        .await
    }

    async fn send(&self, message: impl Into<Message>) -> Result<(), SessionError> {
        let message = message.into();
        tracing::debug!(participant = %self.participant_id(), kind = %message.kind(), "sending request");
        self.manager.send(&message).await
    }
}

/// Drops retained chat for lobbies the participant no longer sees or
/// sits in.
fn prune_scrollback(scrollback: &Scrollback, directory: &LobbyDirectory, event: &DirectoryEvent) {
    let mut scrollback = scrollback.lock().unwrap_or_else(PoisonError::into_inner);
    match event {
        DirectoryEvent::Removed { lobby_id } => {
            scrollback.remove(lobby_id);
        }
        DirectoryEvent::Replaced { .. } => {
            scrollback.retain(|lobby_id, _| directory.get(lobby_id).is_some());
        }
        DirectoryEvent::Upserted { lobby_id } => {
            if directory.current_id() != Some(lobby_id) {
                scrollback.remove(lobby_id);
            }
        }
    }
}

fn violation_notice(error: &LobbyError) -> ErrorNotice {
    ErrorNotice {
        message: format!("ignored lobby frame from peer: {error}"),
    }
}

fn require_lobby_id(lobby_id: &LobbyId) -> Result<(), SessionError> {
    if lobby_id.as_str().trim().is_empty() {
        return Err(SessionError::InvalidRequest("lobby id is empty".into()));
    }
    Ok(())
}

impl<C: Connector> fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("participant", self.participant_id())
            .field("state", &self.connection_state())
            .field("current_lobby", &self.directory.borrow().current_id())
            .finish()
    }
}

impl<C: Connector> Drop for Session<C> {
    fn drop(&mut self) {
        let dispatcher = self.manager.dispatcher();
        for (kind, id) in self.listeners.drain(..) {
            dispatcher.unsubscribe(kind, id);
        }

        // The reader task keeps the connection alive on its own, so it has
        // to be told. Outside a runtime there is nothing left to stop.
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let manager = self.manager.clone();
            runtime.spawn(async move {
                manager.disconnect().await;
            });
        }
    }
}
