//! The closed message vocabulary exchanged over a participant's connection.
//!
//! Every frame is one [`Message`]. On the wire it is a JSON object whose
//! `type` field names the [`MessageKind`]; lobby frames carry a second
//! discriminator, `action`, selecting the [`LobbyFrame`] variant:
//!
//! ```text
//! {"type":"lobby","action":"join","lobby_id":"L1","role":"pawn","name":"Bob"}
//! {"type":"chat","lobby_id":"L1","sender":"A","message":"gl hf"}
//! {"type":"match","players":["A","B"],"timestamp":"1718000000000"}
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Lobby, LobbyId, ParticipantId, ProtocolError, Role};

// ---------------------------------------------------------------------------
// MessageKind
// ---------------------------------------------------------------------------

/// The discriminator of a [`Message`]; also the key listeners subscribe on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKind {
    Chat,
    Matchmaking,
    Match,
    Lobby,
    Error,
}

impl MessageKind {
    /// Every kind, in declaration order.
    pub const ALL: [MessageKind; 5] = [
        Self::Chat,
        Self::Matchmaking,
        Self::Match,
        Self::Lobby,
        Self::Error,
    ];

    /// The wire spelling of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Matchmaking => "matchmaking",
            Self::Match => "match",
            Self::Lobby => "lobby",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownKind(s.to_owned()))
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// A chat line scoped to one lobby. Outbound it is a request to broadcast;
/// inbound it is the broadcast itself (including the echo of our own line).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub lobby_id: LobbyId,
    #[serde(rename = "sender")]
    pub sender_id: ParticipantId,
    #[serde(rename = "message")]
    pub text: String,
}

/// Whether a participant wants in or out of the matchmaking queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchmakingAction {
    Join,
    Leave,
}

/// Client → peer: enter or exit the matchmaking queue. No other payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchmakingRequest {
    pub action: MatchmakingAction,
}

/// Peer → client, unsolicited: a pairing was found.
///
/// `timestamp` doubles as the match identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchNotice {
    pub players: Vec<ParticipantId>,
    pub timestamp: String,
}

impl MatchNotice {
    /// Returns `true` if `participant` is one of the matched players.
    pub fn includes(&self, participant: &ParticipantId) -> bool {
        self.players.contains(participant)
    }
}

/// Peer → client: a request was rejected or could not be understood.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub message: String,
}

/// The `lobby` message family, discriminated by `action`.
///
/// `Create`, `Join`, `Leave` and a bare `List` are requests; `Update` and a
/// `List` carrying `lobbies` come back from the peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum LobbyFrame {
    /// Open a new lobby; the sender becomes its host.
    Create {
        name: String,
        #[serde(rename = "maxCommanders")]
        max_commanders: usize,
        #[serde(rename = "maxPawns")]
        max_pawns: usize,
        #[serde(
            rename = "hostName",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        host_name: Option<String>,
    },

    /// Take a seat in an existing lobby.
    Join {
        lobby_id: LobbyId,
        role: Role,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },

    /// Give up the seat held in a lobby.
    Leave { lobby_id: LobbyId },

    /// One lobby changed (`lobby` set), or the receiver was removed from
    /// one (`lobby_id` set, `lobby` absent).
    Update {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lobby: Option<Lobby>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lobby_id: Option<LobbyId>,
    },

    /// Request (`lobbies` absent) or full snapshot of all open lobbies.
    List {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lobbies: Option<Vec<Lobby>>,
    },
}

impl LobbyFrame {
    /// The wire spelling of the frame's action.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Join { .. } => "join",
            Self::Leave { .. } => "leave",
            Self::Update { .. } => "update",
            Self::List { .. } => "list",
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// One frame's worth of meaning. The set of variants is closed: anything
/// else on the wire is a decode error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    Chat(ChatMessage),
    Matchmaking(MatchmakingRequest),
    Match(MatchNotice),
    Lobby(LobbyFrame),
    Error(ErrorNotice),
}

impl Message {
    /// The discriminator of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Chat(_) => MessageKind::Chat,
            Self::Matchmaking(_) => MessageKind::Matchmaking,
            Self::Match(_) => MessageKind::Match,
            Self::Lobby(_) => MessageKind::Lobby,
            Self::Error(_) => MessageKind::Error,
        }
    }

    /// Borrows the payload as `T` if this message is of `T`'s kind.
    pub fn payload<T: Kinded>(&self) -> Option<&T> {
        T::project(self)
    }
}

/// A payload type that belongs to exactly one [`MessageKind`].
///
/// Lets listeners subscribe to a payload type and receive it already
/// narrowed, instead of matching on [`Message`] themselves.
pub trait Kinded: Sized + Send + Sync + 'static {
    /// The kind whose messages carry this payload.
    const KIND: MessageKind;

    /// Borrows the payload out of `message`, or `None` for other kinds.
    fn project(message: &Message) -> Option<&Self>;
}

macro_rules! kinded {
    ($payload:ty, $variant:ident) => {
        impl Kinded for $payload {
            const KIND: MessageKind = MessageKind::$variant;

            fn project(message: &Message) -> Option<&Self> {
                match message {
                    Message::$variant(payload) => Some(payload),
                    _ => None,
                }
            }
        }

        impl From<$payload> for Message {
            fn from(payload: $payload) -> Self {
                Message::$variant(payload)
            }
        }
    };
}

kinded!(ChatMessage, Chat);
kinded!(MatchmakingRequest, Matchmaking);
kinded!(MatchNotice, Match);
kinded!(LobbyFrame, Lobby);
kinded!(ErrorNotice, Error);

// =========================================================================
// Tests
// =========================================================================
