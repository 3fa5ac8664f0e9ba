//! Hub statistics, published by the command loop and read lock-free of it.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use roomcast_protocol::{IdentityId, RoomId};
use serde::Serialize;

/// Point-in-time view of the hub, served by `GET /stats`.
#[derive(Debug, Clone, Serialize)]
pub struct HubStats {
    pub total_connections: usize,
    pub unique_identities: usize,
    pub active_rooms: usize,
    /// Connections per room.
    pub rooms: BTreeMap<RoomId, usize>,
    pub broadcasts_total: u64,
    pub evictions_total: u64,
    pub running: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Counts {
    total: usize,
    identities: HashMap<IdentityId, usize>,
    rooms: HashMap<RoomId, usize>,
}

fn increment<K: std::hash::Hash + Eq + Clone>(map: &mut HashMap<K, usize>, key: &K) {
    *map.entry(key.clone()).or_default() += 1;
}

fn decrement<K: std::hash::Hash + Eq>(map: &mut HashMap<K, usize>, key: &K) {
    if let Some(count) = map.get_mut(key) {
        *count = count.saturating_sub(1);
        if *count == 0 {
            map.remove(key);
        }
    }
}

/// Counters shared between the hub loop (writer) and hub handles (readers).
#[derive(Debug)]
pub(crate) struct SharedStats {
    counts: RwLock<Counts>,
    broadcasts: AtomicU64,
    evictions: AtomicU64,
    running: AtomicBool,
}

impl Default for SharedStats {
    fn default() -> Self {
        Self {
            counts: RwLock::new(Counts::default()),
            broadcasts: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            running: AtomicBool::new(true),
        }
    }
}

impl SharedStats {
    pub fn joined(&self, identity: &IdentityId, room: Option<&RoomId>) {
        let mut counts = self.counts.write().unwrap_or_else(PoisonError::into_inner);
        counts.total += 1;
        increment(&mut counts.identities, identity);
        if let Some(room) = room {
            increment(&mut counts.rooms, room);
        }
    }

    pub fn left(&self, identity: &IdentityId, room: Option<&RoomId>) {
        let mut counts = self.counts.write().unwrap_or_else(PoisonError::into_inner);
        counts.total = counts.total.saturating_sub(1);
        decrement(&mut counts.identities, identity);
        if let Some(room) = room {
            decrement(&mut counts.rooms, room);
        }
    }

    pub fn record_broadcast(&self) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark the hub stopped and zero the membership counts.
    pub fn stopped(&self) {
        self.running.store(false, Ordering::Release);
        *self.counts.write().unwrap_or_else(PoisonError::into_inner) = Counts::default();
    }

    pub fn room_count(&self, room: &RoomId) -> usize {
        self.counts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .rooms
            .get(room)
            .copied()
            .unwrap_or(0)
    }

    pub fn identity_connected(&self, identity: &IdentityId) -> bool {
        self.counts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .identities
            .contains_key(identity)
    }

    pub fn snapshot(&self) -> HubStats {
        let counts = self.counts.read().unwrap_or_else(PoisonError::into_inner);
        HubStats {
            total_connections: counts.total,
            unique_identities: counts.identities.len(),
            active_rooms: counts.rooms.len(),
            rooms: counts
                .rooms
                .iter()
                .map(|(room, count)| (room.clone(), *count))
                .collect(),
            broadcasts_total: self.broadcasts.load(Ordering::Relaxed),
            evictions_total: self.evictions.load(Ordering::Relaxed),
            running: self.running.load(Ordering::Acquire),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_follow_joins_and_leaves() {
        let stats = SharedStats::default();
        let alice = IdentityId::new("alice");
        let bob = IdentityId::new("bob");
        let room = RoomId::new("r1");

        stats.joined(&alice, Some(&room));
        stats.joined(&alice, None);
        stats.joined(&bob, Some(&room));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_connections, 3);
        assert_eq!(snapshot.unique_identities, 2);
        assert_eq!(snapshot.active_rooms, 1);
        assert_eq!(stats.room_count(&room), 2);

        stats.left(&alice, Some(&room));
        assert!(stats.identity_connected(&alice));
        stats.left(&alice, None);
        assert!(!stats.identity_connected(&alice));
        assert_eq!(stats.room_count(&room), 1);

        stats.left(&bob, Some(&room));
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_connections, 0);
        assert!(snapshot.rooms.is_empty());
    }

    #[test]
    fn test_stats_serialize_rooms_as_object() {
        let stats = SharedStats::default();
        stats.joined(&IdentityId::new("alice"), Some(&RoomId::new("r1")));
        stats.record_broadcast();

        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["rooms"]["r1"], 1);
        assert_eq!(json["broadcasts_total"], 1);
        assert_eq!(json["running"], true);
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_stopped_clears_counts() {
        let stats = SharedStats::default();
        stats.joined(&IdentityId::new("alice"), None);
        stats.stopped();
        let snapshot = stats.snapshot();
        assert!(!snapshot.running);
        assert_eq!(snapshot.total_connections, 0);
    }
}
