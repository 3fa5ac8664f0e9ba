//! Canonical wire types for roomcast.
//!
//! Frames flow in two directions over a single persistent connection:
//!
//! - [`InboundFrame`]: client -> server, one decoded event per wire frame.
//! - [`OutboundEvent`]: server -> client, tagged by a `type` field and
//!   scoped to a room.
//!
//! Identifiers are opaque to the transport layer; the server never
//! interprets identity or room ids beyond equality.

pub mod ids;
pub mod inbound;
pub mod outbound;

pub use ids::{ConnectionId, IdentityId, RoomId};
pub use inbound::{DecodeError, InboundFrame, InboundMessage};
pub use outbound::{EventKind, OutboundEvent, Role, TypingMetadata};
