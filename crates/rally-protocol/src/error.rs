//! Error types for the protocol layer.
//!
//! Decoding failures come in three flavours so the connection layer can log
//! them precisely before discarding the frame: the frame is not JSON of the
//! right shape ([`ProtocolError::Decode`]), it has no `type` discriminator
//! ([`ProtocolError::MissingKind`]), or the discriminator names a kind this
//! client does not speak ([`ProtocolError::UnknownKind`]).

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a message into a frame).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed: malformed JSON, missing required fields, or
    /// wrong data types.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The frame is a JSON object without a string `type` field.
    #[error("frame has no message kind")]
    MissingKind,

    /// The frame's `type` is not part of the message vocabulary.
    #[error("unknown message kind `{0}`")]
    UnknownKind(String),

    /// The message decoded but violates a protocol rule, e.g. a lobby
    /// holding more commanders than its capacity.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

impl ProtocolError {
    /// Returns `true` for failures that mean "this frame could not be
    /// understood" as opposed to "this frame is understood but wrong".
    pub fn is_decode_error(&self) -> bool {
        match self {
            Self::MissingKind | Self::UnknownKind(_) => true,
            #[cfg(feature = "json")]
            Self::Decode(_) => true,
            _ => false,
        }
    }
}
