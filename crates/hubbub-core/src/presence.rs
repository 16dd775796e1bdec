//! Presence tracking.
//!
//! Online state is derived from the registry lifecycle: binding a user marks
//! them online, unregistering the connection marks them offline. Each user
//! points at one connection at most, and the most recent bind wins.

use crate::registry::{now_millis, ConnectionId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Presence entry for one online user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceEntry {
    /// The connection presence currently points at.
    pub connection_id: String,
    /// When that connection came online (ms since epoch).
    pub online_since: u64,
}

impl PresenceEntry {
    /// Create an entry timestamped now.
    #[must_use]
    pub fn new(connection_id: &ConnectionId) -> Self {
        Self {
            connection_id: connection_id.as_str().to_string(),
            online_since: now_millis(),
        }
    }

    /// Whether the entry points at `connection_id`.
    #[must_use]
    pub fn is_for(&self, connection_id: &ConnectionId) -> bool {
        self.connection_id == connection_id.as_str()
    }
}

/// Storage for presence state.
///
/// Calls are serialized by the event router.
pub trait PresenceStore: Send {
    /// Point the user's presence at `connection`, replacing any previous entry.
    ///
    /// Returns the connection the entry previously pointed at, if any.
    fn mark_online(&mut self, user: &UserId, connection: &ConnectionId) -> Option<ConnectionId>;

    /// Clear presence for whichever user currently points at `connection`.
    ///
    /// Returns the user that went offline, or `None` if no entry points at
    /// this connection (including when a newer connection superseded it).
    fn mark_offline(&mut self, connection: &ConnectionId) -> Option<UserId>;

    /// Whether the user has a live presence entry.
    fn is_online(&self, user: &UserId) -> bool;

    /// The user's current presence entry.
    fn entry(&self, user: &UserId) -> Option<PresenceEntry>;

    /// Number of online users.
    fn online_count(&self) -> usize;
}

/// In-process presence table.
#[derive(Debug, Default)]
pub struct MemoryPresenceStore {
    by_user: HashMap<UserId, PresenceEntry>,
    by_connection: HashMap<ConnectionId, UserId>,
}

impl MemoryPresenceStore {
    /// Create an empty presence table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All online users.
    #[must_use]
    pub fn online_users(&self) -> Vec<&UserId> {
        self.by_user.keys().collect()
    }
}

impl PresenceStore for MemoryPresenceStore {
    fn mark_online(&mut self, user: &UserId, connection: &ConnectionId) -> Option<ConnectionId> {
        let previous = self
            .by_user
            .insert(user.clone(), PresenceEntry::new(connection))
            .map(|entry| ConnectionId::new(entry.connection_id));

        if let Some(previous) = &previous {
            self.by_connection.remove(previous);
            debug!(user = %user, previous = %previous, connection = %connection, "Presence: superseded");
        } else {
            debug!(user = %user, connection = %connection, "Presence: online");
        }
        self.by_connection.insert(connection.clone(), user.clone());

        previous
    }

    fn mark_offline(&mut self, connection: &ConnectionId) -> Option<UserId> {
        let user = self.by_connection.remove(connection)?;

        match self.by_user.get(&user) {
            Some(entry) if entry.is_for(connection) => {
                self.by_user.remove(&user);
                debug!(user = %user, connection = %connection, "Presence: offline");
                Some(user)
            }
            _ => None,
        }
    }

    fn is_online(&self, user: &UserId) -> bool {
        self.by_user.contains_key(user)
    }

    fn entry(&self, user: &UserId) -> Option<PresenceEntry> {
        self.by_user.get(user).cloned()
    }

    fn online_count(&self) -> usize {
        self.by_user.len()
    }
}
