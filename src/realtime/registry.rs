//! Connection registry: admission, room membership and cleanup.
//!
//! Two indexes are kept in step under one lock: room → connections and
//! connection → rooms. The lock is never held across an `.await`, so every
//! operation is a single atomic step from the caller's point of view and
//! membership reads are point-in-time snapshots.

use super::transport::Transport;
use crate::auth::Principal;
use crate::error::RegistryError;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Longest accepted room name, in characters.
pub const MAX_ROOM_NAME_LEN: usize = 128;

/// Unique identifier of a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generates a fresh identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Admission and membership limits.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryPolicy {
    /// Maximum rooms per connection; `None` is unlimited.
    pub max_rooms_per_connection: Option<usize>,
    /// Evict a principal's older connections when it connects again.
    pub single_session_per_principal: bool,
}

/// A room member as seen by the broadcaster.
#[derive(Clone)]
pub struct Member {
    /// Connection identifier.
    pub id: ConnectionId,
    /// Outbound handle.
    pub transport: Arc<dyn Transport>,
}

/// Result of admitting a connection.
#[derive(Clone)]
pub struct Admission {
    /// Identifier of the new connection.
    pub id: ConnectionId,
    /// Connections removed by the single-session policy.
    pub evicted: Vec<Member>,
}

impl Admission {
    /// Closes every evicted connection with `reason` and returns how many
    /// there were.
    pub fn close_evicted(&self, reason: &str) -> usize {
        for member in &self.evicted {
            member.transport.close(reason);
        }
        self.evicted.len()
    }
}

/// A connection removed from the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departed {
    /// The principal it belonged to.
    pub user_id: String,
    /// Rooms it was a member of.
    pub rooms: Vec<String>,
}

/// Snapshot of registry sizes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegistryStats {
    /// Live connections.
    pub connections: usize,
    /// Non-empty rooms and their member counts, sorted by room name.
    pub rooms: BTreeMap<String, usize>,
}

struct ConnectionEntry {
    principal: Principal,
    transport: Arc<dyn Transport>,
    rooms: HashSet<String>,
}

#[derive(Default)]
struct Indexes {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    rooms: HashMap<String, HashSet<ConnectionId>>,
}

impl Indexes {
    fn remove_connection(&mut self, id: ConnectionId) -> Option<ConnectionEntry> {
        let entry = self.connections.remove(&id)?;
        for room in &entry.rooms {
            if let Some(members) = self.rooms.get_mut(room) {
                members.remove(&id);
                if members.is_empty() {
                    self.rooms.remove(room);
                }
            }
        }
        Some(entry)
    }
}

/// Registry of live, authenticated connections and their rooms.
pub struct ConnectionRegistry {
    indexes: Mutex<Indexes>,
    policy: RegistryPolicy,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(policy: RegistryPolicy) -> Self {
        Self {
            indexes: Mutex::new(Indexes::default()),
            policy,
        }
    }

    /// Registers an authenticated connection with no rooms.
    ///
    /// Under the single-session policy, the principal's existing connections
    /// are removed from every room and returned so the caller can close them.
    pub fn admit(&self, principal: Principal, transport: Arc<dyn Transport>) -> Admission {
        let id = ConnectionId::new();
        let mut indexes = self.indexes.lock();

        let mut evicted = Vec::new();
        if self.policy.single_session_per_principal {
            let stale: Vec<ConnectionId> = indexes
                .connections
                .iter()
                .filter(|(_, entry)| entry.principal.user_id == principal.user_id)
                .map(|(id, _)| *id)
                .collect();
            for stale_id in stale {
                if let Some(entry) = indexes.remove_connection(stale_id) {
                    evicted.push(Member {
                        id: stale_id,
                        transport: entry.transport,
                    });
                }
            }
        }

        indexes.connections.insert(
            id,
            ConnectionEntry {
                principal,
                transport,
                rooms: HashSet::new(),
            },
        );

        Admission { id, evicted }
    }

    /// Adds a connection to a room.
    ///
    /// Returns `true` if the connection was not yet a member. Joining a room
    /// already joined is a no-op and does not count against the room limit.
    ///
    /// # Errors
    /// Fails for unknown connections, invalid room names, or when the
    /// connection's room limit is reached.
    pub fn join(&self, id: ConnectionId, room: &str) -> Result<bool, RegistryError> {
        validate_room(room)?;

        let mut indexes = self.indexes.lock();
        let entry = indexes
            .connections
            .get_mut(&id)
            .ok_or(RegistryError::UnknownConnection)?;

        if entry.rooms.contains(room) {
            return Ok(false);
        }
        if let Some(limit) = self.policy.max_rooms_per_connection
            && entry.rooms.len() >= limit
        {
            return Err(RegistryError::RoomLimitExceeded(limit));
        }

        entry.rooms.insert(room.to_string());
        indexes
            .rooms
            .entry(room.to_string())
            .or_default()
            .insert(id);
        Ok(true)
    }

    /// Removes a connection from a room.
    ///
    /// Returns `true` if the connection was a member; leaving a room not
    /// joined, or leaving from an unknown connection, is a no-op.
    pub fn leave(&self, id: ConnectionId, room: &str) -> bool {
        let mut indexes = self.indexes.lock();
        let Some(entry) = indexes.connections.get_mut(&id) else {
            return false;
        };
        if !entry.rooms.remove(room) {
            return false;
        }

        if let Some(members) = indexes.rooms.get_mut(room) {
            members.remove(&id);
            if members.is_empty() {
                indexes.rooms.remove(room);
            }
        }
        true
    }

    /// Removes a connection and all of its memberships.
    ///
    /// Safe to call any number of times; only the first call finds an entry.
    pub fn on_disconnect(&self, id: ConnectionId) -> Option<Departed> {
        let entry = self.indexes.lock().remove_connection(id)?;
        let mut rooms: Vec<String> = entry.rooms.into_iter().collect();
        rooms.sort();
        Some(Departed {
            user_id: entry.principal.user_id,
            rooms,
        })
    }

    /// Returns the current members of a room.
    #[must_use]
    pub fn members(&self, room: &str) -> Vec<Member> {
        let indexes = self.indexes.lock();
        let Some(ids) = indexes.rooms.get(room) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| {
                indexes.connections.get(id).map(|entry| Member {
                    id: *id,
                    transport: Arc::clone(&entry.transport),
                })
            })
            .collect()
    }

    /// Returns the rooms a connection has joined, sorted.
    #[must_use]
    pub fn rooms_of(&self, id: ConnectionId) -> Vec<String> {
        let indexes = self.indexes.lock();
        let mut rooms: Vec<String> = indexes
            .connections
            .get(&id)
            .map(|entry| entry.rooms.iter().cloned().collect())
            .unwrap_or_default();
        rooms.sort();
        rooms
    }

    /// Returns whether a connection is a member of a room.
    #[must_use]
    pub fn is_member(&self, id: ConnectionId, room: &str) -> bool {
        self.indexes
            .lock()
            .rooms
            .get(room)
            .is_some_and(|members| members.contains(&id))
    }

    /// Returns whether a connection is registered.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.indexes.lock().connections.contains_key(&id)
    }

    /// Returns the principal bound to a connection.
    #[must_use]
    pub fn principal_of(&self, id: ConnectionId) -> Option<Principal> {
        self.indexes
            .lock()
            .connections
            .get(&id)
            .map(|entry| entry.principal.clone())
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.indexes.lock().connections.len()
    }

    /// Number of members of a room.
    #[must_use]
    pub fn member_count(&self, room: &str) -> usize {
        self.indexes.lock().rooms.get(room).map_or(0, HashSet::len)
    }

    /// Returns a snapshot of connection and room sizes.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let indexes = self.indexes.lock();
        RegistryStats {
            connections: indexes.connections.len(),
            rooms: indexes
                .rooms
                .iter()
                .map(|(room, members)| (room.clone(), members.len()))
                .collect(),
        }
    }
}

fn validate_room(room: &str) -> Result<(), RegistryError> {
    if room.trim().is_empty() || room.chars().count() > MAX_ROOM_NAME_LEN {
        return Err(RegistryError::InvalidRoom(room.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::test_support::{RecordingTransport, principal};

    fn registry() -> ConnectionRegistry {
        ConnectionRegistry::new(RegistryPolicy::default())
    }

    fn admit(registry: &ConnectionRegistry, user: &str) -> ConnectionId {
        registry
            .admit(principal(user), Arc::new(RecordingTransport::default()))
            .id
    }

    #[test]
    fn test_join_and_members() {
        let registry = registry();
        let a = admit(&registry, "alice");
        let b = admit(&registry, "bob");

        assert!(registry.join(a, "instrument-price:AAPL").unwrap());
        assert!(registry.join(b, "instrument-price:AAPL").unwrap());
        assert!(registry.join(b, "instrument-price:TSLA").unwrap());

        let mut ids: Vec<_> = registry
            .members("instrument-price:AAPL")
            .into_iter()
            .map(|m| m.id)
            .collect();
        ids.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(ids, expected);
        assert_eq!(
            registry.rooms_of(b),
            vec!["instrument-price:AAPL", "instrument-price:TSLA"]
        );
    }

    #[test]
    fn test_join_is_idempotent() {
        let registry = registry();
        let a = admit(&registry, "alice");

        assert!(registry.join(a, "room").unwrap());
        assert!(!registry.join(a, "room").unwrap());
        assert_eq!(registry.member_count("room"), 1);
        assert_eq!(registry.rooms_of(a), vec!["room"]);
    }

    #[test]
    fn test_leave_is_idempotent() {
        let registry = registry();
        let a = admit(&registry, "alice");
        registry.join(a, "room").unwrap();

        assert!(registry.leave(a, "room"));
        assert!(!registry.leave(a, "room"));
        assert!(!registry.leave(a, "never-joined"));
        assert!(!registry.is_member(a, "room"));
        assert!(registry.stats().rooms.is_empty());
    }

    #[test]
    fn test_disconnect_removes_every_membership() {
        let registry = registry();
        let a = admit(&registry, "alice");
        let b = admit(&registry, "bob");
        for room in ["r1", "r2", "r3"] {
            registry.join(a, room).unwrap();
        }
        registry.join(b, "r1").unwrap();

        let departed = registry.on_disconnect(a).unwrap();
        assert_eq!(departed.user_id, "alice");
        assert_eq!(departed.rooms, vec!["r1", "r2", "r3"]);

        for room in ["r1", "r2", "r3"] {
            assert!(!registry.is_member(a, room));
        }
        assert!(!registry.contains(a));
        assert_eq!(registry.member_count("r1"), 1);
        assert_eq!(registry.member_count("r2"), 0);
        assert!(registry.on_disconnect(a).is_none());
    }

    #[test]
    fn test_join_after_disconnect_fails() {
        let registry = registry();
        let a = admit(&registry, "alice");
        registry.on_disconnect(a);
        assert_eq!(
            registry.join(a, "room"),
            Err(RegistryError::UnknownConnection)
        );
        assert_eq!(registry.member_count("room"), 0);
    }

    #[test]
    fn test_invalid_room_names() {
        let registry = registry();
        let a = admit(&registry, "alice");
        assert!(matches!(
            registry.join(a, ""),
            Err(RegistryError::InvalidRoom(_))
        ));
        assert!(matches!(
            registry.join(a, "   "),
            Err(RegistryError::InvalidRoom(_))
        ));
        let long = "x".repeat(MAX_ROOM_NAME_LEN + 1);
        assert!(matches!(
            registry.join(a, &long),
            Err(RegistryError::InvalidRoom(_))
        ));
        assert!(registry.join(a, &"x".repeat(MAX_ROOM_NAME_LEN)).unwrap());
    }

    #[test]
    fn test_room_limit() {
        let registry = ConnectionRegistry::new(RegistryPolicy {
            max_rooms_per_connection: Some(2),
            single_session_per_principal: false,
        });
        let a = admit(&registry, "alice");
        registry.join(a, "r1").unwrap();
        registry.join(a, "r2").unwrap();

        assert!(!registry.join(a, "r2").unwrap());
        assert_eq!(
            registry.join(a, "r3"),
            Err(RegistryError::RoomLimitExceeded(2))
        );

        registry.leave(a, "r1");
        assert!(registry.join(a, "r3").unwrap());
    }

    #[test]
    fn test_single_session_evicts_previous_connection() {
        let registry = ConnectionRegistry::new(RegistryPolicy {
            max_rooms_per_connection: None,
            single_session_per_principal: true,
        });
        let first_transport = Arc::new(RecordingTransport::default());
        let first = registry
            .admit(principal("alice"), first_transport.clone())
            .id;
        registry.join(first, "room").unwrap();
        let other = admit(&registry, "bob");

        let admission = registry.admit(principal("alice"), Arc::new(RecordingTransport::default()));
        let evicted: Vec<_> = admission.evicted.iter().map(|m| m.id).collect();
        assert_eq!(evicted, vec![first]);
        assert_eq!(first_transport.close_reason(), None);
        assert_eq!(admission.close_evicted("superseded"), 1);
        assert_eq!(first_transport.close_reason(), Some("superseded".to_string()));
        assert!(!registry.contains(first));
        assert!(!registry.is_member(first, "room"));
        assert!(registry.contains(other));
        assert!(registry.contains(admission.id));
        assert_eq!(registry.connection_count(), 2);
    }

    #[test]
    fn test_multiple_sessions_allowed_by_default() {
        let registry = registry();
        admit(&registry, "alice");
        let admission = registry.admit(principal("alice"), Arc::new(RecordingTransport::default()));
        assert!(admission.evicted.is_empty());
        assert_eq!(registry.connection_count(), 2);
    }

    #[test]
    fn test_stats_snapshot() {
        let registry = registry();
        let a = admit(&registry, "alice");
        let b = admit(&registry, "bob");
        registry.join(a, "instrument-price:AAPL").unwrap();
        registry.join(b, "instrument-price:AAPL").unwrap();
        registry.join(b, "instrument-price:MSFT").unwrap();

        let stats = registry.stats();
        assert_eq!(stats.connections, 2);
        assert_eq!(stats.rooms.get("instrument-price:AAPL"), Some(&2));
        assert_eq!(stats.rooms.get("instrument-price:MSFT"), Some(&1));
        assert_eq!(registry.principal_of(a).unwrap().user_id, "alice");
    }

    #[test]
    fn test_concurrent_joins_commute() {
        let registry = Arc::new(registry());
        let a = admit(&registry, "alice");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.join(a, "room").unwrap())
            })
            .collect();
        let newly_joined = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|joined| *joined)
            .count();

        assert_eq!(newly_joined, 1);
        assert_eq!(registry.member_count("room"), 1);
    }
}
