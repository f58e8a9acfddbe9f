//! `RallyServer` builder and accept loop: the authoritative peer.
//!
//! The server owns the true lobby state ([`LobbyRegistry`]) and the
//! matchmaking queue. Participants connect at `/ws/{participant_id}`; each
//! connection gets its own Tokio task (see `handler`) plus an outbox other
//! tasks push messages into.

use std::collections::HashMap;
use std::sync::Arc;

use rally_lobby::LobbyRegistry;
use rally_protocol::{JsonCodec, Lobby, LobbyFrame, LobbyId, Message, ParticipantId};
use rally_transport::{ConnectionId, Transport, WebSocketTransport};
use tokio::sync::{Mutex, mpsc};

use crate::RallyError;
use crate::handler::handle_connection;
use crate::matchmaking::MatchmakingQueue;

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

/// Configuration for the authoritative peer.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Participants per match. Default: 2.
    pub match_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { match_size: 2 }
    }
}

impl ServerConfig {
    /// Clamp out-of-range values so the config is safe to use.
    ///
    /// A match needs at least two participants.
    pub fn validated(mut self) -> Self {
        if self.match_size < 2 {
            tracing::warn!(match_size = self.match_size, "match_size below 2, using 2");
            self.match_size = 2;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Where a connected participant's outbound messages go.
pub(crate) struct Outbox {
    pub(crate) conn_id: ConnectionId,
    pub(crate) tx: mpsc::UnboundedSender<Message>,
}

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState {
    pub(crate) lobbies: Mutex<LobbyRegistry>,
    pub(crate) matchmaking: Mutex<MatchmakingQueue>,
    pub(crate) outboxes: Mutex<HashMap<ParticipantId, Outbox>>,
    pub(crate) codec: JsonCodec,
}

impl ServerState {
    fn new(config: &ServerConfig) -> Self {
        Self {
            lobbies: Mutex::new(LobbyRegistry::new()),
            matchmaking: Mutex::new(MatchmakingQueue::new(config.match_size)),
            outboxes: Mutex::new(HashMap::new()),
            codec: JsonCodec,
        }
    }

    /// Queues each message on its recipient's outbox. Recipients that are
    /// no longer connected are skipped.
    pub(crate) async fn deliver(&self, deliveries: Vec<(ParticipantId, Message)>) {
        if deliveries.is_empty() {
            return;
        }
        let outboxes = self.outboxes.lock().await;
        for (recipient, message) in deliveries {
            match outboxes.get(&recipient) {
                Some(outbox) => {
                    let _ = outbox.tx.send(message);
                }
                None => tracing::debug!(%recipient, kind = %message.kind(), "recipient gone, dropping"),
            }
        }
    }
}

/// One `update` per seated member of `lobby`.
pub(crate) fn update_for_members(lobby: &Lobby) -> Vec<(ParticipantId, Message)> {
    let message = Message::Lobby(LobbyFrame::Update {
        lobby: Some(lobby.clone()),
        lobby_id: None,
    });
    lobby
        .commanders
        .iter()
        .chain(&lobby.pawns)
        .map(|member| (member.clone(), message.clone()))
        .collect()
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for configuring and starting a Rally server.
///
/// # Example
///
/// ```rust,no_run
/// use rally::prelude::*;
///
/// # async fn start() -> Result<(), RallyError> {
/// let server = RallyServer::builder()
///     .bind("0.0.0.0:8000")
///     .config(ServerConfig { match_size: 4 })
///     .build()
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct RallyServerBuilder {
    bind_addr: String,
    config: ServerConfig,
}

impl RallyServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_owned(),
            config: ServerConfig::default(),
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_owned();
        self
    }

    /// Sets the server configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Binds the listener. Connections are not accepted until
    /// [`RallyServer::run`].
    pub async fn build(self) -> Result<RallyServer, RallyError> {
        let transport = WebSocketTransport::bind(&self.bind_addr).await?;
        let config = self.config.validated();
        Ok(RallyServer {
            transport,
            state: Arc::new(ServerState::new(&config)),
        })
    }
}

impl Default for RallyServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// A bound Rally server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct RallyServer {
    transport: WebSocketTransport,
    state: Arc<ServerState>,
}

impl RallyServer {
    /// Creates a new builder.
    pub fn builder() -> RallyServerBuilder {
        RallyServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// A handle for inspecting and driving lobby state from outside the
    /// accept loop. Stays valid after `run()` takes the server.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            state: Arc::clone(&self.state),
        }
    }

    /// Runs the accept loop until the process is terminated.
    pub async fn run(mut self) -> Result<(), RallyError> {
        tracing::info!(addr = ?self.transport.local_addr().ok(), "Rally server running");

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, state).await {
                            tracing::debug!(error = %e, "connection ended with error");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ServerHandle
// ---------------------------------------------------------------------------

/// Cloneable handle onto a server's shared state.
#[derive(Clone)]
pub struct ServerHandle {
    state: Arc<ServerState>,
}

impl ServerHandle {
    /// Snapshot of every lobby, oldest first.
    pub async fn lobbies(&self) -> Vec<Lobby> {
        self.state.lobbies.lock().await.list()
    }

    /// Number of participants currently connected.
    pub async fn connected(&self) -> usize {
        self.state.outboxes.lock().await.len()
    }

    /// Moves a lobby one status step forward (`waiting → in_progress →
    /// completed`) and tells its members.
    pub async fn advance_lobby(&self, lobby_id: &LobbyId) -> Result<Lobby, RallyError> {
        let lobby = self.state.lobbies.lock().await.advance(lobby_id)?.clone();
        self.state.deliver(update_for_members(&lobby)).await;
        Ok(lobby)
    }
}
