//! Codec trait and implementations for turning [`Message`]s into frames.
//!
//! The connection layer never touches JSON directly: it hands messages to a
//! [`Codec`] and gets text frames back, and vice versa. Swapping the codec
//! changes the wire format without touching any other layer.

use crate::{Message, ProtocolError};

/// Converts between [`Message`]s and text frames.
///
/// `Send + Sync + 'static` because the codec is shared with the reader task
/// that decodes inbound frames.
pub trait Codec: Send + Sync + 'static {
    /// Serializes a message into one frame.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if serialization fails.
    fn encode(&self, message: &Message) -> Result<String, ProtocolError>;

    /// Parses one frame.
    ///
    /// # Errors
    /// Returns a decode-class [`ProtocolError`] if the frame is malformed,
    /// lacks a kind, or names a kind outside the vocabulary.
    fn decode(&self, frame: &str) -> Result<Message, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that speaks the JSON wire format.
///
/// Decoding happens in two steps so failures are classified precisely:
/// first the frame is parsed as a JSON value and its `type` checked against
/// [`MessageKind`](crate::MessageKind), then the value is deserialized into
/// the typed [`Message`].
///
/// ## Example
///
/// ```rust
/// use rally_protocol::{Codec, JsonCodec, LobbyFrame, Message};
///
/// let codec = JsonCodec;
/// let frame = codec
///     .encode(&Message::Lobby(LobbyFrame::List { lobbies: None }))
///     .unwrap();
/// assert_eq!(frame, r#"{"type":"lobby","action":"list"}"#);
///
/// let decoded = codec.decode(&frame).unwrap();
/// assert_eq!(decoded, Message::Lobby(LobbyFrame::List { lobbies: None }));
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl Codec for JsonCodec {
    fn encode(&self, message: &Message) -> Result<String, ProtocolError> {
        serde_json::to_string(message).map_err(ProtocolError::Encode)
    }

    fn decode(&self, frame: &str) -> Result<Message, ProtocolError> {
        let value: serde_json::Value =
            serde_json::from_str(frame).map_err(ProtocolError::Decode)?;

        let kind = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .ok_or(ProtocolError::MissingKind)?;
        // Surfaces UnknownKind before serde reports a generic variant error.
        kind.parse::<crate::MessageKind>()?;

        serde_json::from_value(value).map_err(ProtocolError::Decode)
    }
}

#[cfg(all(test, feature = "json"))]
mod tests {
    use super::*;
    use crate::{ChatMessage, LobbyFrame, MessageKind, Role};

    #[test]
    fn test_encode_chat_frame_is_flat_json() {
        let frame = JsonCodec
            .encode(&Message::Chat(ChatMessage {
                lobby_id: "L1".into(),
                sender_id: "A".into(),
                text: "hi".into(),
            }))
            .unwrap();
        assert_eq!(
            frame,
            r#"{"type":"chat","lobby_id":"L1","sender":"A","message":"hi"}"#
        );
    }

    #[test]
    fn test_decode_join_frame() {
        let frame = r#"{"type":"lobby","action":"join","lobby_id":"L1","role":"commander"}"#;
        let msg = JsonCodec.decode(frame).unwrap();
        assert_eq!(msg.kind(), MessageKind::Lobby);
        assert_eq!(
            msg,
            Message::Lobby(LobbyFrame::Join {
                lobby_id: "L1".into(),
                role: Role::Commander,
                name: None,
            })
        );
    }

    #[test]
    fn test_decode_garbage_is_decode_error() {
        let err = JsonCodec.decode("not json at all").unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
        assert!(err.is_decode_error());
    }

    #[test]
    fn test_decode_without_type_is_missing_kind() {
        let err = JsonCodec.decode(r#"{"action":"list"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::MissingKind));
    }

    #[test]
    fn test_decode_unknown_type_is_unknown_kind() {
        let err = JsonCodec.decode(r#"{"type":"fly_to_moon"}"#).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownKind(ref k) if k == "fly_to_moon"));
        assert!(err.is_decode_error());
    }

    #[test]
    fn test_decode_known_type_missing_fields_is_decode_error() {
        // The peer's chat receipt has no lobby/sender/message fields.
        let err = JsonCodec
            .decode(r#"{"type":"chat","status":"sent"}"#)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
    }

    #[test]
    fn test_invalid_message_is_not_a_decode_error() {
        let err = ProtocolError::InvalidMessage("too many pawns".into());
        assert!(!err.is_decode_error());
    }
}
