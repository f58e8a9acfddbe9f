//! Participant-side connection management for Rally.
//!
//! This crate owns everything between the transport and the application:
//!
//! 1. **Connection lifecycle**: one logical transport per participant,
//!    opened lazily and shared by concurrent callers ([`ConnectionManager`])
//! 2. **Inbound dispatch**: decoded messages fanned out to listeners keyed
//!    by message kind ([`Dispatcher`])
//! 3. **Configuration**: endpoint, scrollback and an optional
//!    [`ReconnectPolicy`] ([`SessionConfig`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Session facade (rally)        ← lobby state, chat, actions
//!     ↕
//! Session layer (this crate)    ← connection state, dispatch
//!     ↕
//! Protocol / Transport (below)  ← messages, frames, sockets
//! ```

mod config;
mod connection;
mod dispatch;
mod error;

pub use config::{ReconnectPolicy, SessionConfig};
pub use connection::{ConnectionManager, ConnectionState};
pub use dispatch::{Dispatcher, ListenerError, ListenerId, ListenerResult};
pub use error::SessionError;
