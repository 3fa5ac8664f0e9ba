//! Transport-neutral frame type the pumps speak.

/// A single frame on a persistent connection.
///
/// Concrete transports (the axum WebSocket in `api::ws`) convert to and
/// from this type at the edge, which keeps the pumps testable over plain
/// channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

impl Frame {
    /// Payload size in bytes, used for the inbound frame limit.
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(data) | Frame::Ping(data) | Frame::Pong(data) => data.len(),
            Frame::Close => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
