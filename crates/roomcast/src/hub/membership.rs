//! Membership tables owned by the hub's command loop.
//!
//! Invariants:
//! - a connection is in `by_identity` iff it is registered;
//! - it is in `by_room` iff it is registered and has a room;
//! - no empty set survives a removal.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use roomcast_protocol::{ConnectionId, IdentityId, RoomId};
use serde::Serialize;

use crate::connection::Connection;

type Members = HashMap<ConnectionId, Arc<Connection>>;

#[derive(Debug, Default)]
pub(crate) struct Membership {
    by_identity: HashMap<IdentityId, Members>,
    by_room: HashMap<RoomId, Members>,
}

impl Membership {
    /// Add a connection. Returns `false` if it was already present.
    pub fn insert(&mut self, conn: &Arc<Connection>) -> bool {
        let members = self.by_identity.entry(conn.identity().clone()).or_default();
        if members.contains_key(&conn.id()) {
            return false;
        }
        members.insert(conn.id(), Arc::clone(conn));

        if let Some(room) = conn.room() {
            self.by_room
                .entry(room.clone())
                .or_default()
                .insert(conn.id(), Arc::clone(conn));
        }
        true
    }

    /// Remove a connection. Returns `false` if it was not registered.
    pub fn remove(&mut self, conn: &Connection) -> bool {
        let removed = match self.by_identity.get_mut(conn.identity()) {
            Some(members) => {
                let removed = members.remove(&conn.id()).is_some();
                if members.is_empty() {
                    self.by_identity.remove(conn.identity());
                }
                removed
            }
            None => false,
        };

        if let Some(room) = conn.room()
            && let Some(members) = self.by_room.get_mut(room)
        {
            members.remove(&conn.id());
            if members.is_empty() {
                self.by_room.remove(room);
            }
        }

        removed
    }

    pub fn room_members(&self, room: &RoomId) -> impl Iterator<Item = &Arc<Connection>> + '_ {
        self.by_room.get(room).into_iter().flat_map(|m| m.values())
    }

    pub fn identity_connections(
        &self,
        identity: &IdentityId,
    ) -> impl Iterator<Item = &Arc<Connection>> + '_ {
        self.by_identity.get(identity).into_iter().flat_map(|m| m.values())
    }

    /// Every registered connection, once each.
    pub fn connections(&self) -> impl Iterator<Item = &Arc<Connection>> + '_ {
        self.by_identity.values().flat_map(|m| m.values())
    }

    pub fn connection_count(&self) -> usize {
        self.by_identity.values().map(HashMap::len).sum()
    }

    pub fn identity_count(&self) -> usize {
        self.by_identity.len()
    }

    pub fn room_count(&self) -> usize {
        self.by_room.len()
    }

    /// Empty both tables, handing back every connection that was registered.
    pub fn drain(&mut self) -> Vec<Arc<Connection>> {
        self.by_room.clear();
        self.by_identity
            .drain()
            .flat_map(|(_, members)| members.into_values())
            .collect()
    }

    pub fn snapshot(&self) -> MembershipSnapshot {
        fn ids(members: &Members) -> BTreeSet<ConnectionId> {
            members.keys().copied().collect()
        }

        MembershipSnapshot {
            by_identity: self
                .by_identity
                .iter()
                .map(|(identity, members)| (identity.clone(), ids(members)))
                .collect(),
            by_room: self
                .by_room
                .iter()
                .map(|(room, members)| (room.clone(), ids(members)))
                .collect(),
        }
    }

    #[cfg(test)]
    pub fn assert_invariants(&self) {
        for (identity, members) in &self.by_identity {
            assert!(!members.is_empty(), "empty identity set for {identity}");
            for conn in members.values() {
                assert_eq!(conn.identity(), identity);
            }
        }
        for (room, members) in &self.by_room {
            assert!(!members.is_empty(), "empty room set for {room}");
            for conn in members.values() {
                assert_eq!(conn.room(), Some(room));
                let registered = self
                    .by_identity
                    .get(conn.identity())
                    .is_some_and(|m| m.contains_key(&conn.id()));
                assert!(registered, "room member {} missing from identity table", conn.id());
            }
        }
    }
}

/// Point-in-time copy of the membership tables, by connection id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MembershipSnapshot {
    pub by_identity: BTreeMap<IdentityId, BTreeSet<ConnectionId>>,
    pub by_room: BTreeMap<RoomId, BTreeSet<ConnectionId>>,
}

impl MembershipSnapshot {
    pub fn room(&self, room: &RoomId) -> Option<&BTreeSet<ConnectionId>> {
        self.by_room.get(room)
    }

    pub fn identity(&self, identity: &IdentityId) -> Option<&BTreeSet<ConnectionId>> {
        self.by_identity.get(identity)
    }

    pub fn connection_count(&self) -> usize {
        self.by_identity.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_identity.is_empty() && self.by_room.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(identity: &str, room: Option<&str>) -> Arc<Connection> {
        Connection::new(IdentityId::new(identity), room.map(RoomId::new), 4).0
    }

    #[test]
    fn test_insert_and_remove_keep_tables_tidy() {
        let mut membership = Membership::default();
        let a = conn("alice", Some("r1"));
        let b = conn("bob", Some("r1"));
        let a2 = conn("alice", None);

        assert!(membership.insert(&a));
        assert!(membership.insert(&b));
        assert!(membership.insert(&a2));
        assert!(!membership.insert(&a));
        membership.assert_invariants();

        assert_eq!(membership.connection_count(), 3);
        assert_eq!(membership.identity_count(), 2);
        assert_eq!(membership.room_count(), 1);
        assert_eq!(membership.room_members(&RoomId::new("r1")).count(), 2);

        assert!(membership.remove(&a));
        assert!(!membership.remove(&a));
        membership.assert_invariants();
        // alice still has her room-less connection.
        assert_eq!(
            membership
                .identity_connections(&IdentityId::new("alice"))
                .count(),
            1
        );

        assert!(membership.remove(&b));
        membership.assert_invariants();
        assert_eq!(membership.room_count(), 0);
        assert!(membership.snapshot().room(&RoomId::new("r1")).is_none());

        assert!(membership.remove(&a2));
        assert!(membership.snapshot().is_empty());
    }

    #[test]
    fn test_invariants_hold_over_interleaved_sequence() {
        let mut membership = Membership::default();
        let conns: Vec<_> = (0..12)
            .map(|i| {
                let room = match i % 3 {
                    0 => None,
                    1 => Some("r1"),
                    _ => Some("r2"),
                };
                conn(&format!("user-{}", i % 4), room)
            })
            .collect();

        for (step, c) in conns.iter().enumerate() {
            membership.insert(c);
            if step % 2 == 1 {
                membership.remove(&conns[step / 2]);
            }
            membership.assert_invariants();
        }
        for c in &conns {
            membership.remove(c);
            membership.assert_invariants();
        }
        assert_eq!(membership.connection_count(), 0);
        assert!(membership.snapshot().is_empty());
    }

    #[test]
    fn test_drain_returns_every_connection() {
        let mut membership = Membership::default();
        for i in 0..5 {
            membership.insert(&conn(&format!("u{i}"), Some("r1")));
        }
        let drained = membership.drain();
        assert_eq!(drained.len(), 5);
        assert_eq!(membership.connection_count(), 0);
        assert_eq!(membership.room_count(), 0);
    }
}
