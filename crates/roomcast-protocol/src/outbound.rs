//! Server -> client events.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{IdentityId, RoomId};

/// Author role of a streamed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// Payload of a `typing` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingMetadata {
    pub user_id: IdentityId,
    pub is_typing: bool,
}

// ============================================================================
// Events
// ============================================================================

/// Events delivered to clients.
///
/// Every event is scoped to a room (omitted for identity-only delivery) and
/// most carry the id of the message they belong to. Events are immutable
/// once built; the hub serializes each one exactly once per broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    /// A streamed message begins.
    StreamStart {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
        message_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<Role>,
    },

    /// Incremental text for a streamed message.
    ContentDelta {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
        message_id: String,
        delta: String,
    },

    /// A message is complete; `content` holds the full text.
    StreamComplete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
        message_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<Role>,
        #[serde(default)]
        content: String,
    },

    /// Another participant is typing.
    Typing {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
        metadata: TypingMetadata,
    },

    /// Progress of a long-running job (e.g. a render) tied to the room.
    VideoProgress {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<Value>,
    },

    /// Recoverable error addressed to one connection.
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
        error: String,
    },

    /// Reply to an application-level `ping`.
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
    },
}

/// Discriminant of an [`OutboundEvent`], matching its wire `type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StreamStart,
    ContentDelta,
    StreamComplete,
    Typing,
    VideoProgress,
    Error,
    Pong,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::StreamStart => "stream_start",
            EventKind::ContentDelta => "content_delta",
            EventKind::StreamComplete => "stream_complete",
            EventKind::Typing => "typing",
            EventKind::VideoProgress => "video_progress",
            EventKind::Error => "error",
            EventKind::Pong => "pong",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl OutboundEvent {
    pub fn stream_start(room_id: Option<RoomId>, message_id: impl Into<String>, role: Role) -> Self {
        OutboundEvent::StreamStart {
            room_id,
            message_id: message_id.into(),
            role: Some(role),
        }
    }

    pub fn content_delta(
        room_id: Option<RoomId>,
        message_id: impl Into<String>,
        delta: impl Into<String>,
    ) -> Self {
        OutboundEvent::ContentDelta {
            room_id,
            message_id: message_id.into(),
            delta: delta.into(),
        }
    }

    pub fn stream_complete(
        room_id: Option<RoomId>,
        message_id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
    ) -> Self {
        OutboundEvent::StreamComplete {
            room_id,
            message_id: message_id.into(),
            role: Some(role),
            content: content.into(),
        }
    }

    pub fn typing(room_id: Option<RoomId>, user_id: IdentityId, is_typing: bool) -> Self {
        OutboundEvent::Typing {
            room_id,
            metadata: TypingMetadata { user_id, is_typing },
        }
    }

    pub fn progress(room_id: Option<RoomId>, message_id: Option<String>, metadata: Value) -> Self {
        OutboundEvent::VideoProgress {
            room_id,
            message_id,
            metadata: Some(metadata),
        }
    }

    pub fn error(room_id: Option<RoomId>, error: impl Into<String>) -> Self {
        OutboundEvent::Error {
            room_id,
            message_id: None,
            error: error.into(),
        }
    }

    pub fn pong(room_id: Option<RoomId>) -> Self {
        OutboundEvent::Pong { room_id }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            OutboundEvent::StreamStart { .. } => EventKind::StreamStart,
            OutboundEvent::ContentDelta { .. } => EventKind::ContentDelta,
            OutboundEvent::StreamComplete { .. } => EventKind::StreamComplete,
            OutboundEvent::Typing { .. } => EventKind::Typing,
            OutboundEvent::VideoProgress { .. } => EventKind::VideoProgress,
            OutboundEvent::Error { .. } => EventKind::Error,
            OutboundEvent::Pong { .. } => EventKind::Pong,
        }
    }

    pub fn room_id(&self) -> Option<&RoomId> {
        match self {
            OutboundEvent::StreamStart { room_id, .. }
            | OutboundEvent::ContentDelta { room_id, .. }
            | OutboundEvent::StreamComplete { room_id, .. }
            | OutboundEvent::Typing { room_id, .. }
            | OutboundEvent::VideoProgress { room_id, .. }
            | OutboundEvent::Error { room_id, .. }
            | OutboundEvent::Pong { room_id } => room_id.as_ref(),
        }
    }

    /// Correlation id of the message this event belongs to.
    pub fn message_id(&self) -> Option<&str> {
        match self {
            OutboundEvent::StreamStart { message_id, .. }
            | OutboundEvent::ContentDelta { message_id, .. }
            | OutboundEvent::StreamComplete { message_id, .. } => Some(message_id),
            OutboundEvent::VideoProgress { message_id, .. }
            | OutboundEvent::Error { message_id, .. } => message_id.as_deref(),
            OutboundEvent::Typing { .. } | OutboundEvent::Pong { .. } => None,
        }
    }
}
