//! The hub: single owner of connection membership.
//!
//! All membership mutation and every fan-out happens on one task that
//! processes [`HubCommand`]s serially. Callers hold a cheap, cloneable
//! [`Hub`] handle that only sends commands, so the tables need no locks
//! and per-room delivery order equals command order.

mod membership;
mod stats;

pub use membership::MembershipSnapshot;
pub use stats::HubStats;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, error, info, warn};
use roomcast_protocol::{ConnectionId, IdentityId, OutboundEvent, RoomId};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;

use crate::config::HubConfig;
use crate::connection::{Connection, Payload};
use crate::error::EnqueueError;
use membership::Membership;
use stats::SharedStats;

/// Requests processed by the hub loop, in arrival order.
#[derive(Debug)]
enum HubCommand {
    Register(Arc<Connection>),
    Unregister(Arc<Connection>),
    Broadcast {
        room: RoomId,
        event: OutboundEvent,
        exclude: Option<ConnectionId>,
    },
    Direct {
        identity: IdentityId,
        event: OutboundEvent,
    },
    Sweep {
        threshold: Duration,
        reply: oneshot::Sender<usize>,
    },
    Snapshot(oneshot::Sender<MembershipSnapshot>),
}

struct HubInner {
    commands: mpsc::Sender<HubCommand>,
    stats: Arc<SharedStats>,
    config: Arc<HubConfig>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a running hub.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("running", &!self.inner.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Hub {
    /// Spawn the command loop on the current tokio runtime.
    pub fn start(config: HubConfig) -> Self {
        if let Err(e) = config.validate() {
            warn!("Hub settings out of range, tickers clamped to 1s: {e}");
        }
        let config = Arc::new(config);
        let (tx, rx) = mpsc::channel(config.command_capacity.max(1));
        let stats = Arc::new(SharedStats::default());
        let shutdown = CancellationToken::new();

        let hub_loop = HubLoop {
            commands: rx,
            membership: Membership::default(),
            stats: Arc::clone(&stats),
            config: Arc::clone(&config),
            shutdown: shutdown.clone(),
        };
        let task = tokio::spawn(hub_loop.run());

        Self {
            inner: Arc::new(HubInner {
                commands: tx,
                stats,
                config,
                shutdown,
                task: Mutex::new(Some(task)),
            }),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    async fn send(&self, command: HubCommand) -> bool {
        if self.is_shut_down() {
            return false;
        }
        self.inner.commands.send(command).await.is_ok()
    }

    /// Add a connection to the membership tables.
    ///
    /// After shutdown the connection is closed immediately instead.
    pub async fn register(&self, conn: Arc<Connection>) {
        if !self.send(HubCommand::Register(Arc::clone(&conn))).await {
            debug!("Hub not running, closing connection {}", conn.id());
            conn.close();
        }
    }

    /// Remove a connection and close its outbound queue. Idempotent.
    pub async fn unregister(&self, conn: Arc<Connection>) {
        if !self.send(HubCommand::Unregister(Arc::clone(&conn))).await {
            conn.close();
        }
    }

    /// Deliver `event` to every connection in `room`, except `exclude`.
    pub async fn broadcast(
        &self,
        room: &RoomId,
        event: OutboundEvent,
        exclude: Option<ConnectionId>,
    ) {
        let command = HubCommand::Broadcast {
            room: room.clone(),
            event,
            exclude,
        };
        if !self.send(command).await {
            debug!("Hub not running, dropping broadcast to room {}", room);
        }
    }

    /// Deliver `event` to every connection of `identity`, across rooms.
    pub async fn direct(&self, identity: &IdentityId, event: OutboundEvent) {
        let command = HubCommand::Direct {
            identity: identity.clone(),
            event,
        };
        if !self.send(command).await {
            debug!("Hub not running, dropping direct message to {}", identity);
        }
    }

    /// Evict every connection idle for longer than `threshold`.
    /// Returns how many were evicted.
    pub async fn sweep(&self, threshold: Duration) -> usize {
        let (reply, rx) = oneshot::channel();
        if !self.send(HubCommand::Sweep { threshold, reply }).await {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Copy of the membership tables as seen by the loop, after every
    /// command sent before this call.
    pub async fn snapshot(&self) -> MembershipSnapshot {
        let (reply, rx) = oneshot::channel();
        if !self.send(HubCommand::Snapshot(reply)).await {
            return MembershipSnapshot::default();
        }
        rx.await.unwrap_or_default()
    }

    pub fn stats(&self) -> HubStats {
        self.inner.stats.snapshot()
    }

    pub fn room_connection_count(&self, room: &RoomId) -> usize {
        self.inner.stats.room_count(room)
    }

    pub fn is_identity_connected(&self, identity: &IdentityId) -> bool {
        self.inner.stats.identity_connected(identity)
    }

    /// Stop the loop, close every outbound queue and cancel every
    /// connection. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let task = self
            .inner
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            error!("Hub loop terminated abnormally: {}", e);
        }
    }
}

// ============================================================================
// Command loop
// ============================================================================

struct HubLoop {
    commands: mpsc::Receiver<HubCommand>,
    membership: Membership,
    stats: Arc<SharedStats>,
    config: Arc<HubConfig>,
    shutdown: CancellationToken,
}

impl HubLoop {
    async fn run(mut self) {
        let sweep_every = self.config.sweep_interval();
        let stats_every = self.config.stats_interval();
        let mut sweep_tick = interval_at(Instant::now() + sweep_every, sweep_every);
        let mut stats_tick = interval_at(Instant::now() + stats_every, stats_every);

        info!("Hub started");
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!("Hub shutdown requested");
                    break;
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => {
                        info!("All hub handles dropped, stopping");
                        break;
                    }
                },
                _ = sweep_tick.tick() => {
                    let threshold = self.config.stale_after();
                    self.sweep(threshold);
                }
                _ = stats_tick.tick() => self.log_statistics(),
            }
        }
        self.teardown();
    }

    fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register(conn) => self.register(conn),
            HubCommand::Unregister(conn) => {
                self.unregister(&conn, false);
            }
            HubCommand::Broadcast {
                room,
                event,
                exclude,
            } => self.broadcast(&room, &event, exclude),
            HubCommand::Direct { identity, event } => self.direct(&identity, &event),
            HubCommand::Sweep { threshold, reply } => {
                let evicted = self.sweep(threshold);
                let _ = reply.send(evicted);
            }
            HubCommand::Snapshot(reply) => {
                let _ = reply.send(self.membership.snapshot());
            }
        }
    }

    fn register(&mut self, conn: Arc<Connection>) {
        if !conn.mark_registered() {
            debug!(
                "Ignoring register for connection {} in state {}",
                conn.id(),
                conn.state()
            );
            return;
        }
        if !self.membership.insert(&conn) {
            warn!("Connection {} registered twice", conn.id());
            return;
        }
        self.stats.joined(conn.identity(), conn.room());
        info!(
            "Registered connection {} for {} in room {} ({} total)",
            conn.id(),
            conn.identity(),
            room_label(conn.room()),
            self.membership.connection_count()
        );
    }

    /// Remove `conn` and close its queue. `forced` also cancels it so both
    /// pumps stop without draining. Returns whether it was registered.
    fn unregister(&mut self, conn: &Arc<Connection>, forced: bool) -> bool {
        conn.begin_unregister();
        let removed = self.membership.remove(conn);
        if forced {
            conn.cancel();
        }
        conn.close_outbound();
        conn.mark_closed();

        if removed {
            self.stats.left(conn.identity(), conn.room());
            info!(
                "Unregistered connection {} for {} ({} total)",
                conn.id(),
                conn.identity(),
                self.membership.connection_count()
            );
        }
        removed
    }

    fn evict(&mut self, conn: &Arc<Connection>, reason: &str) {
        warn!(
            "Evicting connection {} for {}: {}",
            conn.id(),
            conn.identity(),
            reason
        );
        if self.unregister(conn, true) {
            self.stats.record_eviction();
        }
    }

    fn encode(event: &OutboundEvent) -> Option<Payload> {
        match serde_json::to_string(event) {
            Ok(json) => Some(Payload::from(json)),
            Err(e) => {
                error!("Failed to serialize {} event: {}", event.kind(), e);
                None
            }
        }
    }

    /// Enqueue `payload` on each target; evict those that cannot take it
    /// once the fan-out is done.
    fn deliver<'a>(
        targets: impl Iterator<Item = &'a Arc<Connection>>,
        payload: &Payload,
    ) -> Vec<(Arc<Connection>, EnqueueError)> {
        targets
            .filter_map(|conn| {
                conn.try_enqueue(Arc::clone(payload))
                    .err()
                    .map(|e| (Arc::clone(conn), e))
            })
            .collect()
    }

    fn broadcast(&mut self, room: &RoomId, event: &OutboundEvent, exclude: Option<ConnectionId>) {
        self.stats.record_broadcast();
        let Some(payload) = Self::encode(event) else {
            return;
        };

        let members: Vec<_> = self
            .membership
            .room_members(room)
            .filter(|conn| Some(conn.id()) != exclude)
            .cloned()
            .collect();
        if members.is_empty() {
            debug!("No recipients for {} in room {}", event.kind(), room);
            return;
        }

        let failed = Self::deliver(members.iter(), &payload);
        for (conn, e) in failed {
            self.evict(&conn, &e.to_string());
        }
    }

    fn direct(&mut self, identity: &IdentityId, event: &OutboundEvent) {
        let Some(payload) = Self::encode(event) else {
            return;
        };

        let targets: Vec<_> = self
            .membership
            .identity_connections(identity)
            .cloned()
            .collect();
        if targets.is_empty() {
            debug!("No connections for {} to receive {}", identity, event.kind());
            return;
        }

        let failed = Self::deliver(targets.iter(), &payload);
        for (conn, e) in failed {
            self.evict(&conn, &e.to_string());
        }
    }

    fn sweep(&mut self, threshold: Duration) -> usize {
        let now = Instant::now();
        let stale: Vec<_> = self
            .membership
            .connections()
            .filter(|conn| conn.idle_for(now) > threshold)
            .cloned()
            .collect();

        if !stale.is_empty() {
            info!("Sweeping {} stale connection(s)", stale.len());
        }
        for conn in &stale {
            self.evict(conn, "stale");
        }
        stale.len()
    }

    fn log_statistics(&self) {
        info!(
            "Hub statistics: {} connections, {} identities, {} rooms",
            self.membership.connection_count(),
            self.membership.identity_count(),
            self.membership.room_count()
        );
    }

    fn teardown(&mut self) {
        self.shutdown.cancel();
        self.commands.close();

        // Honour unregisters that were already queued; refuse the rest.
        while let Ok(command) = self.commands.try_recv() {
            match command {
                HubCommand::Unregister(conn) => {
                    self.unregister(&conn, false);
                }
                HubCommand::Register(conn) => conn.close(),
                HubCommand::Sweep { reply, .. } => {
                    let _ = reply.send(0);
                }
                HubCommand::Snapshot(reply) => {
                    let _ = reply.send(self.membership.snapshot());
                }
                HubCommand::Broadcast { .. } | HubCommand::Direct { .. } => {}
            }
        }

        let remaining = self.membership.drain();
        for conn in &remaining {
            conn.begin_unregister();
            conn.close_outbound();
            conn.cancel();
            conn.mark_closed();
        }
        self.stats.stopped();
        info!("Hub stopped, closed {} connection(s)", remaining.len());
    }
}

fn room_label(room: Option<&RoomId>) -> &str {
    room.map(RoomId::as_str).unwrap_or("-")
}
