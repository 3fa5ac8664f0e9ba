//! Error types shared across the hub and connection pumps.

use thiserror::Error;

/// Invalid configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Failure to place a payload on a connection's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnqueueError {
    /// The queue is at capacity; the consumer is not keeping up.
    #[error("outbound queue full")]
    Full,

    /// The queue was closed by unregistration or shutdown.
    #[error("outbound queue closed")]
    Closed,

    /// The event could not be serialized.
    #[error("event could not be serialized")]
    Encode,
}

/// Why a pump stopped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExitReason {
    /// Peer sent a close frame or the stream ended.
    #[error("peer closed the connection")]
    PeerClosed,

    /// No frame (including pongs) arrived within the read deadline.
    #[error("liveness deadline expired")]
    DeadlineExpired,

    /// Inbound frame exceeded the configured size limit.
    #[error("frame of {size} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge { size: usize, limit: usize },

    /// Transport-level read or write failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// A write did not complete within the write timeout.
    #[error("write timed out")]
    WriteTimeout,

    /// The outbound queue was closed and drained.
    #[error("outbound queue closed")]
    QueueClosed,

    /// A reply to the peer could not be queued because its queue is full.
    #[error("outbound queue full")]
    SlowConsumer,

    /// The connection's cancellation scope fired.
    #[error("connection cancelled")]
    Cancelled,
}

impl ExitReason {
    /// Whether this exit is an ordinary end of life rather than a fault.
    pub fn is_clean(&self) -> bool {
        matches!(
            self,
            ExitReason::PeerClosed | ExitReason::QueueClosed | ExitReason::Cancelled
        )
    }
}
