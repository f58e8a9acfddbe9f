//! Lobby state for Rally, from both ends of the connection.
//!
//! # Key types
//!
//! - [`LobbyDirectory`]: the participant's projection of the open lobbies
//!   and of the lobby it currently sits in, patched only by inbound frames
//! - [`JoinCheck`]: advisory join preconditions for UI affordances
//! - [`LobbyRegistry`]: the authoritative peer's lobby state and the one
//!   place the lobby rules are enforced
//! - [`LobbyError`]: rejections and protocol violations

mod directory;
mod error;
mod registry;

pub use directory::{DirectoryEvent, JoinCheck, LobbyDirectory};
pub use error::LobbyError;
pub use registry::{Departure, LobbyRegistry};
