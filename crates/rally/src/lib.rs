//! # Rally
//!
//! Lobby and matchmaking synchronization for multiplayer clients.
//!
//! Two halves share one wire format:
//!
//! - [`Session`]: a participant's side. One lazily opened connection,
//!   a local [`LobbyDirectory`](rally_lobby::LobbyDirectory) kept in step
//!   with the peer, chat and match feeds, and fire-and-forget actions.
//! - [`RallyServer`]: the authoritative peer. Owns the real lobbies and
//!   the matchmaking queue and tells participants what changed.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rally::prelude::*;
//!
//! # async fn demo() -> Result<(), RallyError> {
//! let server = RallyServer::builder().bind("127.0.0.1:8000").build().await?;
//! tokio::spawn(server.run());
//!
//! let host = Session::new(SessionConfig::with_url("ws://127.0.0.1:8000"));
//! host.create_lobby("Friday night", 2, 4).await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod handler;
mod matchmaking;
mod server;
mod session;

pub use error::RallyError;
pub use server::{RallyServer, RallyServerBuilder, ServerConfig, ServerHandle};
pub use session::Session;

pub use rally_lobby as lobby;
pub use rally_protocol as protocol;
pub use rally_transport as transport;

pub mod prelude {
    pub use crate::{
        RallyError, RallyServer, RallyServerBuilder, ServerConfig, ServerHandle, Session,
    };
    pub use rally_lobby::{DirectoryEvent, JoinCheck, LobbyDirectory, LobbyError};
    pub use rally_protocol::{
        ChatMessage, ErrorNotice, Lobby, LobbyFrame, LobbyId, LobbyStatus, MatchNotice, Message,
        MessageKind, ParticipantId, ProtocolError, Role,
    };
    pub use rally_session::{
        ConnectionState, Dispatcher, ListenerId, ListenerResult, ReconnectPolicy, SessionConfig,
        SessionError,
    };
    pub use rally_transport::TransportError;
}
