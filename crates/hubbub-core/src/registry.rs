//! Connection registry.
//!
//! Tracks live transport sessions, the user identity bound to each, and the
//! sending half of each session's outbound buffer.

use crate::error::RelayError;
use crate::event::Outbound;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::debug;

/// Receiving half of a connection's outbound buffer.
pub type Mailbox = mpsc::Receiver<Arc<Outbound>>;

/// Sending half of a connection's outbound buffer.
pub type Outbox = mpsc::Sender<Arc<Outbound>>;

static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Opaque identifier of one transport session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a connection ID from an existing string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh connection ID.
    ///
    /// The counter keeps two IDs minted in the same nanosecond distinct.
    #[must_use]
    pub fn generate() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        let counter = CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}_{:x}", nanos, counter))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Verified user identifier supplied by the auth collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(String);

impl UserId {
    /// Create a user ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Outcome of a successful [`ConnectionRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The identity was bound now.
    Bound,
    /// The connection already carried this identity.
    Unchanged,
}

/// One live transport session.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    user: Option<UserId>,
    created_at: u64,
    outbox: Outbox,
    dropped: u64,
}

impl Connection {
    fn new(id: ConnectionId, outbox: Outbox) -> Self {
        Self {
            id,
            user: None,
            created_at: now_millis(),
            outbox,
            dropped: 0,
        }
    }

    /// The connection ID.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// The bound user, if any.
    #[must_use]
    pub fn user(&self) -> Option<&UserId> {
        self.user.as_ref()
    }

    /// When the session was opened (ms since epoch).
    #[must_use]
    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Number of deliveries dropped because the outbound buffer was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub(crate) fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    pub(crate) fn record_drop(&mut self) {
        self.dropped += 1;
    }
}

/// Registry of live connections.
///
/// Not synchronized on its own; the event router owns it behind its lock.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
    bound: usize,
    max_connections: usize,
}

impl ConnectionRegistry {
    /// Create a registry admitting at most `max_connections` sessions.
    #[must_use]
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: HashMap::new(),
            bound: 0,
            max_connections,
        }
    }

    /// Admit a transport session that has not been bound to a user yet.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::DuplicateConnection`] if the ID is already open,
    /// or [`RelayError::CapacityReached`] at the connection limit.
    pub fn open(&mut self, id: ConnectionId, outbox: Outbox) -> Result<(), RelayError> {
        if self.connections.contains_key(&id) {
            return Err(RelayError::DuplicateConnection(id));
        }
        if self.connections.len() >= self.max_connections {
            return Err(RelayError::CapacityReached(self.max_connections));
        }

        debug!(connection = %id, "Connection opened");
        self.connections.insert(id.clone(), Connection::new(id, outbox));
        Ok(())
    }

    /// Bind a user identity to a connection.
    ///
    /// Rebinding the same identity is a no-op success.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::AlreadyBound`] if the connection carries a
    /// different identity, or [`RelayError::UnknownConnection`] if it was
    /// never opened.
    pub fn register(&mut self, id: &ConnectionId, user: UserId) -> Result<Registration, RelayError> {
        let connection = self
            .connections
            .get_mut(id)
            .ok_or_else(|| RelayError::UnknownConnection(id.clone()))?;

        match &connection.user {
            Some(bound) if *bound == user => Ok(Registration::Unchanged),
            Some(bound) => Err(RelayError::AlreadyBound {
                connection: id.clone(),
                bound: bound.clone(),
            }),
            None => {
                debug!(connection = %id, user = %user, "Connection bound");
                connection.user = Some(user);
                self.bound += 1;
                Ok(Registration::Bound)
            }
        }
    }

    /// Remove a connection. Unknown IDs are ignored.
    pub fn unregister(&mut self, id: &ConnectionId) -> Option<Connection> {
        let removed = self.connections.remove(id);
        if let Some(connection) = &removed {
            if connection.user.is_some() {
                self.bound -= 1;
            }
            debug!(connection = %id, "Connection removed");
        }
        removed
    }

    /// The user bound to a connection.
    #[must_use]
    pub fn lookup(&self, id: &ConnectionId) -> Option<&UserId> {
        self.connections.get(id).and_then(Connection::user)
    }

    /// Get a connection.
    #[must_use]
    pub fn get(&self, id: &ConnectionId) -> Option<&Connection> {
        self.connections.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(id)
    }

    /// Whether the connection is open.
    #[must_use]
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    /// Number of open connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no connections are open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Number of connections with a bound identity.
    #[must_use]
    pub fn bound_count(&self) -> usize {
        self.bound
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(usize::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outbox() -> Outbox {
        mpsc::channel(8).0
    }

    #[test]
    fn test_connection_id_generation() {
        let id1 = ConnectionId::generate();
        let id2 = ConnectionId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("conn_"));
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ConnectionRegistry::default();
        let conn = ConnectionId::from("c1");
        registry.open(conn.clone(), outbox()).unwrap();

        assert!(registry.lookup(&conn).is_none());
        assert_eq!(
            registry.register(&conn, UserId::from("alice")).unwrap(),
            Registration::Bound
        );
        assert_eq!(registry.lookup(&conn), Some(&UserId::from("alice")));
        assert_eq!(registry.bound_count(), 1);
    }

    #[test]
    fn test_rebind_same_identity_is_noop() {
        let mut registry = ConnectionRegistry::default();
        let conn = ConnectionId::from("c1");
        registry.open(conn.clone(), outbox()).unwrap();
        registry.register(&conn, UserId::from("alice")).unwrap();

        assert_eq!(
            registry.register(&conn, UserId::from("alice")).unwrap(),
            Registration::Unchanged
        );
    }

    #[test]
    fn test_rebind_different_identity_fails() {
        let mut registry = ConnectionRegistry::default();
        let conn = ConnectionId::from("c1");
        registry.open(conn.clone(), outbox()).unwrap();
        registry.register(&conn, UserId::from("alice")).unwrap();

        let err = registry.register(&conn, UserId::from("bob")).unwrap_err();
        assert!(matches!(err, RelayError::AlreadyBound { ref bound, .. } if bound.as_str() == "alice"));
        assert_eq!(registry.lookup(&conn), Some(&UserId::from("alice")));
    }

    #[test]
    fn test_register_unknown_connection() {
        let mut registry = ConnectionRegistry::default();
        assert!(matches!(
            registry.register(&ConnectionId::from("ghost"), UserId::from("alice")),
            Err(RelayError::UnknownConnection(_))
        ));
    }

    #[test]
    fn test_open_limits() {
        let mut registry = ConnectionRegistry::new(1);
        registry.open(ConnectionId::from("c1"), outbox()).unwrap();

        assert!(matches!(
            registry.open(ConnectionId::from("c1"), outbox()),
            Err(RelayError::DuplicateConnection(_))
        ));
        assert!(matches!(
            registry.open(ConnectionId::from("c2"), outbox()),
            Err(RelayError::CapacityReached(1))
        ));
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let mut registry = ConnectionRegistry::default();
        let conn = ConnectionId::from("c1");
        registry.open(conn.clone(), outbox()).unwrap();

        assert!(registry.unregister(&conn).is_some());
        assert!(registry.unregister(&conn).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_bound_count_follows_lifecycle() {
        let mut registry = ConnectionRegistry::default();
        let (c1, c2) = (ConnectionId::from("c1"), ConnectionId::from("c2"));
        registry.open(c1.clone(), outbox()).unwrap();
        registry.open(c2.clone(), outbox()).unwrap();
        assert_eq!(registry.bound_count(), 0);

        registry.register(&c1, UserId::from("alice")).unwrap();
        registry.register(&c1, UserId::from("alice")).unwrap();
        assert_eq!(registry.bound_count(), 1);

        registry.unregister(&c2);
        assert_eq!(registry.bound_count(), 1);
        registry.unregister(&c1);
        registry.unregister(&c1);
        assert_eq!(registry.bound_count(), 0);
    }
}
