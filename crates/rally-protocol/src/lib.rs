//! Wire protocol for Rally.
//!
//! This crate defines the "language" participants and the authoritative
//! peer speak:
//!
//! - **Data model** ([`Lobby`], [`ParticipantId`], [`Role`], ...): what a
//!   lobby is and who sits in it.
//! - **Messages** ([`Message`], [`LobbyFrame`], [`MessageKind`]): the
//!   closed, tagged vocabulary of frames.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how messages become text
//!   frames and back.
//! - **Errors** ([`ProtocolError`]): what can go wrong doing so.
//!
//! # Architecture
//!
//! ```text
//! Transport (text frames) → Protocol (Message) → Session (dispatch, directory)
//! ```

mod codec;
mod error;
mod message;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use message::{
    ChatMessage, ErrorNotice, Kinded, LobbyFrame, MatchNotice,
    MatchmakingAction, MatchmakingRequest, Message, MessageKind,
};
pub use types::{Lobby, LobbyId, LobbyStatus, ParticipantId, Role};
