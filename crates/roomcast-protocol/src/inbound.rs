//! Client -> server frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::ids::RoomId;

/// Errors produced while decoding a single inbound frame.
///
/// None of these are fatal for the connection; the server answers with an
/// error event and keeps reading.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Payload is not valid JSON or does not match the frame shape.
    #[error("invalid message format: {0}")]
    Malformed(#[source] serde_json::Error),

    /// Payload has no string `type` field.
    #[error("missing message type")]
    MissingType,

    /// Payload carries a `type` this server does not understand.
    #[error("unknown message type: {0}")]
    UnknownType(String),
}

/// A decoded inbound frame. One wire frame maps to exactly one value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// User-authored text for the room.
    Message(InboundMessage),

    /// The user is typing.
    Typing {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
    },

    /// Application-level keepalive; answered with a `pong` event.
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
    },
}

/// Payload of a `message` frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachment_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl InboundFrame {
    const KNOWN_TYPES: [&'static str; 3] = ["message", "typing", "ping"];

    /// Decode one text payload.
    ///
    /// The `type` tag is checked before the body so that an unrecognized
    /// type is reported as such rather than as a shape mismatch.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(text).map_err(DecodeError::Malformed)?;

        match value.get("type").and_then(Value::as_str) {
            None => return Err(DecodeError::MissingType),
            Some(kind) if !Self::KNOWN_TYPES.contains(&kind) => {
                return Err(DecodeError::UnknownType(kind.to_string()));
            }
            Some(_) => {}
        }

        serde_json::from_value(value).map_err(DecodeError::Malformed)
    }

    /// Room the client addressed, if any.
    pub fn room_id(&self) -> Option<&RoomId> {
        match self {
            InboundFrame::Message(message) => message.room_id.as_ref(),
            InboundFrame::Typing { room_id } | InboundFrame::Ping { room_id } => room_id.as_ref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_message_frame() {
        let frame = InboundFrame::decode(
            r#"{"type":"message","room_id":"r1","content":"hello","attachment_ids":["a1"]}"#,
        )
        .unwrap();

        match frame {
            InboundFrame::Message(message) => {
                assert_eq!(message.room_id, Some(RoomId::new("r1")));
                assert_eq!(message.content, "hello");
                assert_eq!(message.attachment_ids, vec!["a1".to_string()]);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn test_decode_typing_and_ping_without_room() {
        let typing = InboundFrame::decode(r#"{"type":"typing"}"#).unwrap();
        assert_eq!(typing, InboundFrame::Typing { room_id: None });

        let ping = InboundFrame::decode(r#"{"type":"ping","room_id":null}"#).unwrap();
        assert_eq!(ping.room_id(), None);
    }

    #[test]
    fn test_decode_unknown_type() {
        let err = InboundFrame::decode(r#"{"type":"subscribe","room_id":"r1"}"#).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownType(ref kind) if kind == "subscribe"));
        assert_eq!(err.to_string(), "unknown message type: subscribe");
    }

    #[test]
    fn test_decode_missing_type() {
        assert!(matches!(
            InboundFrame::decode(r#"{"content":"hi"}"#),
            Err(DecodeError::MissingType)
        ));
        assert!(matches!(
            InboundFrame::decode("[1,2,3]"),
            Err(DecodeError::MissingType)
        ));
    }

    #[test]
    fn test_decode_malformed_json() {
        assert!(matches!(
            InboundFrame::decode("{not json"),
            Err(DecodeError::Malformed(_))
        ));
        // Known type, wrong field shape.
        assert!(matches!(
            InboundFrame::decode(r#"{"type":"message","content":42}"#),
            Err(DecodeError::Malformed(_))
        ));
    }
}
