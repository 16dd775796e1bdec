//! Room addressing and the room membership table.
//!
//! Rooms have no identity beyond their key. They exist while they have at
//! least one member and are removed when the last member leaves.

use crate::error::RelayError;
use crate::registry::{ConnectionId, UserId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::debug;

/// Maximum length of a group or user identifier used for addressing.
pub const MAX_ROOM_ID_LENGTH: usize = 256;

/// Validate an identifier used to address a room.
///
/// # Errors
///
/// Returns an error message if the identifier is unusable.
pub fn validate_room_id(id: &str) -> Result<(), &'static str> {
    if id.is_empty() {
        return Err("room identifier cannot be empty");
    }
    if id.len() > MAX_ROOM_ID_LENGTH {
        return Err("room identifier too long");
    }
    if id.chars().any(char::is_control) {
        return Err("room identifier contains control characters");
    }
    Ok(())
}

/// Separator between the parts of a room's display key.
pub const ROOM_KEY_SEPARATOR: char = ':';

/// Validate a user identifier used to address a private room.
///
/// User ids appear verbatim in `private:<low>:<high>`, so they may not
/// contain the separator.
///
/// # Errors
///
/// Returns an error message if the identifier is unusable.
pub fn validate_user_id(id: &str) -> Result<(), &'static str> {
    validate_room_id(id)?;
    if id.contains(ROOM_KEY_SEPARATOR) {
        return Err("user identifier contains ':'");
    }
    Ok(())
}

/// The two room variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomKind {
    /// One-to-one chat between two users.
    Private,
    /// Group chat keyed by an externally created group ID.
    Group,
}

/// Canonical key of a room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RoomKey {
    /// Private room; `low <= high` always holds.
    Private {
        /// Lesser user of the pair.
        low: UserId,
        /// Greater user of the pair.
        high: UserId,
    },
    /// Group room.
    Group(String),
}

impl RoomKey {
    /// Private room key for two users, in either order.
    #[must_use]
    pub fn private(a: UserId, b: UserId) -> Self {
        if a <= b {
            RoomKey::Private { low: a, high: b }
        } else {
            RoomKey::Private { low: b, high: a }
        }
    }

    /// Group room key.
    #[must_use]
    pub fn group(id: impl Into<String>) -> Self {
        RoomKey::Group(id.into())
    }

    /// The room variant.
    #[must_use]
    pub fn kind(&self) -> RoomKind {
        match self {
            RoomKey::Private { .. } => RoomKind::Private,
            RoomKey::Group(_) => RoomKind::Group,
        }
    }

    /// Whether this is a private room.
    #[must_use]
    pub fn is_private(&self) -> bool {
        self.kind() == RoomKind::Private
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomKey::Private { low, high } => write!(f, "private:{}:{}", low, high),
            RoomKey::Group(id) => write!(f, "group:{}", id),
        }
    }
}

/// An unresolved room address carried by an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomTarget {
    /// Address a private room by its participants.
    Private {
        /// The user emitting the event.
        sender: UserId,
        /// The other participant.
        receiver: UserId,
    },
    /// Address a group room.
    Group {
        /// Externally created group ID.
        group_id: String,
    },
}

impl RoomTarget {
    /// Private target between `sender` and `receiver`.
    #[must_use]
    pub fn private(sender: UserId, receiver: UserId) -> Self {
        RoomTarget::Private { sender, receiver }
    }

    /// Group target.
    #[must_use]
    pub fn group(group_id: impl Into<String>) -> Self {
        RoomTarget::Group {
            group_id: group_id.into(),
        }
    }

    /// Build a target from a `recipient | group` pair where exactly one is set.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UnresolvedRoom`] if neither or both are present.
    pub fn from_parts(
        sender: &UserId,
        recipient: Option<&str>,
        group: Option<&str>,
    ) -> Result<Self, RelayError> {
        match (recipient, group) {
            (Some(recipient), None) => Ok(Self::private(sender.clone(), UserId::new(recipient))),
            (None, Some(group)) => Ok(Self::group(group)),
            (None, None) => Err(RelayError::UnresolvedRoom(
                "event carries neither a recipient nor a group",
            )),
            (Some(_), Some(_)) => Err(RelayError::UnresolvedRoom(
                "event carries both a recipient and a group",
            )),
        }
    }

    /// Resolve to the canonical room key.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UnresolvedRoom`] if an identifier is invalid.
    pub fn resolve(&self) -> Result<RoomKey, RelayError> {
        match self {
            RoomTarget::Private { sender, receiver } => {
                validate_user_id(sender.as_str()).map_err(RelayError::UnresolvedRoom)?;
                validate_user_id(receiver.as_str()).map_err(RelayError::UnresolvedRoom)?;
                Ok(RoomKey::private(sender.clone(), receiver.clone()))
            }
            RoomTarget::Group { group_id } => {
                validate_room_id(group_id).map_err(RelayError::UnresolvedRoom)?;
                Ok(RoomKey::group(group_id.clone()))
            }
        }
    }
}

/// Result of a join.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinOutcome {
    /// False if the connection was already a member.
    pub joined: bool,
    /// Private room the connection was evicted from, if any.
    pub evicted: Option<RoomKey>,
}

/// Storage for room membership.
///
/// The event router serializes every call, so implementations need no
/// internal locking.
pub trait RoomStore: Send {
    /// Add a connection to a room. Joining a private room first leaves any
    /// other private room the connection occupies.
    fn join(&mut self, connection: &ConnectionId, room: RoomKey) -> JoinOutcome;

    /// Remove a connection from a room. Returns `false` if it was not a member.
    fn leave(&mut self, connection: &ConnectionId, room: &RoomKey) -> bool;

    /// Snapshot of a room's members; empty for unknown rooms.
    fn members(&self, room: &RoomKey) -> Vec<ConnectionId>;

    /// Remove a connection from every room. Returns the rooms it left.
    fn evict_connection(&mut self, connection: &ConnectionId) -> Vec<RoomKey>;

    /// Rooms a connection currently belongs to.
    fn rooms_of(&self, connection: &ConnectionId) -> Vec<RoomKey>;

    /// Number of live rooms.
    fn room_count(&self) -> usize;

    /// Total number of memberships across all rooms.
    fn membership_count(&self) -> usize;
}

/// In-process room membership table.
#[derive(Debug, Default)]
pub struct MemoryRoomStore {
    rooms: HashMap<RoomKey, HashSet<ConnectionId>>,
    memberships: HashMap<ConnectionId, HashSet<RoomKey>>,
    membership_total: usize,
}

impl MemoryRoomStore {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn remove_member(&mut self, connection: &ConnectionId, room: &RoomKey) -> bool {
        let Some(members) = self.rooms.get_mut(room) else {
            return false;
        };
        let removed = members.remove(connection);
        if removed {
            self.membership_total -= 1;
        }
        if members.is_empty() {
            self.rooms.remove(room);
            debug!(room = %room, "Deleted empty room");
        }
        removed
    }
}

impl RoomStore for MemoryRoomStore {
    fn join(&mut self, connection: &ConnectionId, room: RoomKey) -> JoinOutcome {
        let mut outcome = JoinOutcome::default();

        if room.is_private() {
            let previous = self.memberships.get(connection).and_then(|rooms| {
                rooms
                    .iter()
                    .find(|r| r.is_private() && **r != room)
                    .cloned()
            });
            if let Some(previous) = previous {
                self.leave(connection, &previous);
                debug!(connection = %connection, room = %previous, "Evicted from private room");
                outcome.evicted = Some(previous);
            }
        }

        let members = self.rooms.entry(room.clone()).or_insert_with(|| {
            debug!(room = %room, "Creating new room");
            HashSet::new()
        });
        outcome.joined = members.insert(connection.clone());
        if outcome.joined {
            self.membership_total += 1;
        }
        self.memberships
            .entry(connection.clone())
            .or_default()
            .insert(room);

        outcome
    }

    fn leave(&mut self, connection: &ConnectionId, room: &RoomKey) -> bool {
        if let Some(rooms) = self.memberships.get_mut(connection) {
            rooms.remove(room);
            if rooms.is_empty() {
                self.memberships.remove(connection);
            }
        }
        self.remove_member(connection, room)
    }

    fn members(&self, room: &RoomKey) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn evict_connection(&mut self, connection: &ConnectionId) -> Vec<RoomKey> {
        let Some(rooms) = self.memberships.remove(connection) else {
            return Vec::new();
        };
        let rooms: Vec<RoomKey> = rooms.into_iter().collect();
        for room in &rooms {
            self.remove_member(connection, room);
        }
        rooms
    }

    fn rooms_of(&self, connection: &ConnectionId) -> Vec<RoomKey> {
        self.memberships
            .get(connection)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn room_count(&self) -> usize {
        self.rooms.len()
    }

    fn membership_count(&self) -> usize {
        self.membership_total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(id: &str) -> ConnectionId {
        ConnectionId::from(id)
    }

    fn private(a: &str, b: &str) -> RoomKey {
        RoomKey::private(UserId::from(a), UserId::from(b))
    }

    #[test]
    fn test_private_key_is_order_independent() {
        assert_eq!(private("alice", "bob"), private("bob", "alice"));
        assert_eq!(private("bob", "alice").to_string(), "private:alice:bob");
        assert_eq!(RoomKey::group("g1").to_string(), "group:g1");
    }

    #[test]
    fn test_targets_from_either_side_resolve_to_same_room() {
        let from_alice = RoomTarget::private(UserId::from("alice"), UserId::from("bob"));
        let from_bob = RoomTarget::private(UserId::from("bob"), UserId::from("alice"));
        assert_eq!(from_alice.resolve().unwrap(), from_bob.resolve().unwrap());
    }

    #[test]
    fn test_from_parts() {
        let me = UserId::from("alice");
        assert_eq!(
            RoomTarget::from_parts(&me, Some("bob"), None).unwrap(),
            RoomTarget::private(me.clone(), UserId::from("bob"))
        );
        assert_eq!(
            RoomTarget::from_parts(&me, None, Some("g1")).unwrap(),
            RoomTarget::group("g1")
        );
        assert!(matches!(
            RoomTarget::from_parts(&me, None, None),
            Err(RelayError::UnresolvedRoom(_))
        ));
        assert!(matches!(
            RoomTarget::from_parts(&me, Some("bob"), Some("g1")),
            Err(RelayError::UnresolvedRoom(_))
        ));
    }

    #[test]
    fn test_resolve_rejects_bad_identifiers() {
        assert!(RoomTarget::group("").resolve().is_err());
        assert!(RoomTarget::group("a".repeat(MAX_ROOM_ID_LENGTH + 1))
            .resolve()
            .is_err());
        assert!(RoomTarget::private(UserId::from("alice"), UserId::from(""))
            .resolve()
            .is_err());
        assert!(RoomTarget::group("bad\nid").resolve().is_err());
    }

    #[test]
    fn test_private_display_keys_are_unambiguous() {
        // ("a:b", "c") and ("a", "b:c") would both print as private:a:b:c
        let left = RoomTarget::private(UserId::from("a:b"), UserId::from("c"));
        let right = RoomTarget::private(UserId::from("a"), UserId::from("b:c"));
        assert!(matches!(left.resolve(), Err(RelayError::UnresolvedRoom(_))));
        assert!(matches!(right.resolve(), Err(RelayError::UnresolvedRoom(_))));

        assert!(validate_user_id("alice").is_ok());
        assert!(validate_user_id("a:b").is_err());
        assert!(RoomTarget::group("team:ops").resolve().is_ok());
    }

    #[test]
    fn test_join_leave_deletes_empty_room() {
        let mut store = MemoryRoomStore::new();
        let room = RoomKey::group("g1");

        assert!(store.join(&conn("c1"), room.clone()).joined);
        assert!(!store.join(&conn("c1"), room.clone()).joined);
        assert_eq!(store.members(&room), vec![conn("c1")]);

        assert!(store.leave(&conn("c1"), &room));
        assert_eq!(store.room_count(), 0);
        assert!(store.members(&room).is_empty());

        // Leaving again is a no-op.
        assert!(!store.leave(&conn("c1"), &room));
    }

    #[test]
    fn test_private_join_evicts_previous_private_room() {
        let mut store = MemoryRoomStore::new();
        let r1 = private("alice", "bob");
        let r2 = private("alice", "carol");
        let group = RoomKey::group("g1");

        store.join(&conn("c1"), r1.clone());
        store.join(&conn("c1"), group.clone());
        let outcome = store.join(&conn("c1"), r2.clone());

        assert_eq!(outcome.evicted, Some(r1.clone()));
        assert!(!store.members(&r1).contains(&conn("c1")));
        assert!(store.members(&r2).contains(&conn("c1")));
        assert!(store.members(&group).contains(&conn("c1")));
    }

    #[test]
    fn test_rejoining_same_private_room_does_not_evict() {
        let mut store = MemoryRoomStore::new();
        let r1 = private("alice", "bob");

        store.join(&conn("c1"), r1.clone());
        let outcome = store.join(&conn("c1"), r1.clone());

        assert_eq!(outcome.evicted, None);
        assert_eq!(store.members(&r1), vec![conn("c1")]);
    }

    #[test]
    fn test_group_rooms_accumulate() {
        let mut store = MemoryRoomStore::new();
        store.join(&conn("c1"), RoomKey::group("g1"));
        store.join(&conn("c1"), RoomKey::group("g2"));

        assert_eq!(store.rooms_of(&conn("c1")).len(), 2);
    }

    #[test]
    fn test_evict_connection() {
        let mut store = MemoryRoomStore::new();
        store.join(&conn("c1"), RoomKey::group("g1"));
        store.join(&conn("c1"), private("alice", "bob"));
        store.join(&conn("c2"), RoomKey::group("g1"));

        let left = store.evict_connection(&conn("c1"));
        assert_eq!(left.len(), 2);
        assert_eq!(store.room_count(), 1);
        assert_eq!(store.members(&RoomKey::group("g1")), vec![conn("c2")]);
        assert!(store.rooms_of(&conn("c1")).is_empty());
        assert_eq!(store.membership_count(), 1);

        assert!(store.evict_connection(&conn("c1")).is_empty());
    }

    #[test]
    fn test_membership_count_through_churn() {
        let mut store = MemoryRoomStore::new();
        store.join(&conn("c1"), private("alice", "bob"));
        store.join(&conn("c1"), private("alice", "bob"));
        assert_eq!(store.membership_count(), 1);

        // Private swap replaces rather than adds
        store.join(&conn("c1"), private("alice", "carol"));
        store.join(&conn("c1"), RoomKey::group("g1"));
        store.join(&conn("c2"), RoomKey::group("g1"));
        assert_eq!(store.membership_count(), 3);

        assert!(!store.leave(&conn("c2"), &RoomKey::group("g2")));
        store.leave(&conn("c2"), &RoomKey::group("g1"));
        store.evict_connection(&conn("c1"));
        assert_eq!(store.membership_count(), 0);
        assert_eq!(store.room_count(), 0);
    }
}
