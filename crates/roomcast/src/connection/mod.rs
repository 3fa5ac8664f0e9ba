//! One network connection: identity, room, outbound queue and lifecycle.
//!
//! A [`Connection`] is shared (`Arc`) between its two pumps and the hub.
//! The hub is the only producer that fans out to it; the write pump is the
//! only consumer of its outbound queue.

mod frame;
mod pump;

pub use frame::Frame;
pub use pump::{read_pump, serve, write_pump};

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use log::error;
use roomcast_protocol::{ConnectionId, IdentityId, OutboundEvent, RoomId};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::error::EnqueueError;

/// Pre-serialized outbound payload. Serialized once per broadcast and
/// shared read-only between recipients.
pub type Payload = Arc<str>;

/// Consumer side of a connection's outbound queue, owned by the write pump.
pub type OutboundReceiver = mpsc::Receiver<Payload>;

/// Lifecycle of a connection. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Registered = 1,
    Active = 2,
    Idle = 3,
    Unregistering = 4,
    Closed = 5,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Registered,
            2 => ConnectionState::Active,
            3 => ConnectionState::Idle,
            4 => ConnectionState::Unregistering,
            _ => ConnectionState::Closed,
        }
    }

    /// Whether the connection is on its way out (or gone).
    pub fn is_terminating(&self) -> bool {
        *self >= ConnectionState::Unregistering
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Registered => write!(f, "registered"),
            ConnectionState::Active => write!(f, "active"),
            ConnectionState::Idle => write!(f, "idle"),
            ConnectionState::Unregistering => write!(f, "unregistering"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    identity: IdentityId,
    room: Option<RoomId>,
    /// Producer side of the outbound queue. `None` once closed.
    outbound: RwLock<Option<mpsc::Sender<Payload>>>,
    last_activity: RwLock<Instant>,
    state: AtomicU8,
    cancel: CancellationToken,
}

impl Connection {
    /// Create a connection with an outbound queue of `capacity` payloads.
    ///
    /// An empty room id is treated as no room (identity-only delivery).
    pub fn new(
        identity: IdentityId,
        room: Option<RoomId>,
        capacity: usize,
    ) -> (Arc<Self>, OutboundReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let conn = Self {
            id: ConnectionId::new(),
            identity,
            room: room.filter(|room| !room.as_str().is_empty()),
            outbound: RwLock::new(Some(tx)),
            last_activity: RwLock::new(Instant::now()),
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            cancel: CancellationToken::new(),
        };
        (Arc::new(conn), rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn identity(&self) -> &IdentityId {
        &self.identity
    }

    pub fn room(&self) -> Option<&RoomId> {
        self.room.as_ref()
    }

    // ========== Outbound queue ==========

    /// Non-blocking enqueue of an already serialized payload.
    pub fn try_enqueue(&self, payload: Payload) -> Result<(), EnqueueError> {
        let guard = self.outbound.read().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = guard.as_ref() else {
            return Err(EnqueueError::Closed);
        };
        tx.try_send(payload).map_err(|err| match err {
            TrySendError::Full(_) => EnqueueError::Full,
            TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Serialize `event` and enqueue it for this connection only.
    pub fn send_event(&self, event: &OutboundEvent) -> Result<(), EnqueueError> {
        let json = serde_json::to_string(event).map_err(|e| {
            error!("Failed to serialize {} event for {}: {}", event.kind(), self.id, e);
            EnqueueError::Encode
        })?;
        self.try_enqueue(Payload::from(json))
    }

    /// Drop the producer side so the write pump drains what is queued and
    /// exits. Returns `true` only for the call that actually closed it.
    pub fn close_outbound(&self) -> bool {
        self.outbound
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
    }

    pub fn is_outbound_closed(&self) -> bool {
        self.outbound
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    // ========== Liveness ==========

    /// Record inbound activity (any frame, pongs included).
    pub fn touch(&self) {
        *self
            .last_activity
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    pub fn last_activity(&self) -> Instant {
        *self
            .last_activity
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity())
    }

    #[cfg(test)]
    pub(crate) fn backdate_activity(&self, by: Duration) {
        let mut last = self
            .last_activity
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(earlier) = last.checked_sub(by) {
            *last = earlier;
        }
    }

    // ========== Lifecycle ==========

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Connecting -> Registered. Fails for any other starting state.
    pub(crate) fn mark_registered(&self) -> bool {
        self.transition(ConnectionState::Connecting, ConnectionState::Registered)
    }

    /// Registered/Idle -> Active on inbound traffic.
    pub(crate) fn mark_active(&self) {
        if !self.transition(ConnectionState::Idle, ConnectionState::Active) {
            self.transition(ConnectionState::Registered, ConnectionState::Active);
        }
    }

    /// Active -> Idle when nothing has arrived for `quiet`.
    pub(crate) fn mark_idle_if_quiet(&self, quiet: Duration) {
        if self.idle_for(Instant::now()) >= quiet {
            self.transition(ConnectionState::Active, ConnectionState::Idle);
        }
    }

    /// Enter `Unregistering`. Only the first trigger gets `true`; later
    /// triggers (other pump, sweep, shutdown) are no-ops.
    pub fn begin_unregister(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if ConnectionState::from_u8(current).is_terminating() {
                return false;
            }
            match self.state.compare_exchange(
                current,
                ConnectionState::Unregistering as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    pub(crate) fn mark_closed(&self) {
        self.state
            .store(ConnectionState::Closed as u8, Ordering::Release);
    }

    // ========== Cancellation ==========

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Forced teardown: stop both pumps now and refuse further payloads.
    pub fn close(&self) {
        self.begin_unregister();
        self.cancel();
        self.close_outbound();
        self.mark_closed();
    }
}
