//! Event router for Hubbub.
//!
//! The router owns the connection registry, the room membership table and the
//! presence table behind one lock. Every mutation and every dispatch takes
//! that lock, so membership updates never race and all members of a room see
//! dispatches in the same order. Fan-out only enqueues into each member's
//! bounded outbound buffer; the network write happens in the member's own
//! connection task, so a slow subscriber never stalls the others.

use crate::error::RelayError;
use crate::event::{ChatEvent, Outbound};
use crate::presence::{MemoryPresenceStore, PresenceStore};
use crate::registry::{ConnectionId, ConnectionRegistry, Mailbox, Registration, UserId};
use crate::rooms::{JoinOutcome, MemoryRoomStore, RoomKey, RoomStore};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, trace, warn};

/// What to do when a subscriber's outbound buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackpressurePolicy {
    /// Drop the delivery and keep the connection.
    #[default]
    Drop,
    /// Drop the delivery and force-unregister the connection.
    Disconnect,
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Maximum number of open connections.
    pub max_connections: usize,
    /// Maximum rooms a single connection may occupy.
    pub max_rooms_per_connection: usize,
    /// Capacity of each connection's outbound buffer.
    pub outbound_capacity: usize,
    /// Full-buffer policy.
    pub backpressure: BackpressurePolicy,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_connections: 100_000,
            max_rooms_per_connection: 100,
            outbound_capacity: 256,
            backpressure: BackpressurePolicy::Drop,
        }
    }
}

/// Result of a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// The resolved room.
    pub room: RoomKey,
    /// Members the event was addressed to.
    pub recipients: usize,
    /// Deliveries enqueued.
    pub delivered: usize,
    /// Deliveries dropped on a full outbound buffer.
    pub dropped: usize,
    /// Members whose session had already ended.
    pub stale: usize,
    /// Connections force-unregistered for backpressure.
    pub disconnected: Vec<ConnectionId>,
}

impl DispatchReport {
    fn new(room: RoomKey) -> Self {
        Self {
            room,
            recipients: 0,
            delivered: 0,
            dropped: 0,
            stale: 0,
            disconnected: Vec::new(),
        }
    }
}

/// Router statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    /// Open connections.
    pub connections: usize,
    /// Connections with a bound user.
    pub bound_connections: usize,
    /// Live rooms.
    pub rooms: usize,
    /// Memberships across all rooms.
    pub memberships: usize,
    /// Users with a presence entry.
    pub online_users: usize,
}

struct RelayState<R, P> {
    registry: ConnectionRegistry,
    rooms: R,
    presence: P,
}

impl<R: RoomStore, P: PresenceStore> RelayState<R, P> {
    /// Remove a connection, its memberships and its presence entry.
    ///
    /// Returns `true` if the connection was open.
    fn teardown(&mut self, connection: &ConnectionId) -> bool {
        let removed = self.registry.unregister(connection).is_some();
        let rooms = self.rooms.evict_connection(connection);
        let offline = self.presence.mark_offline(connection);

        if removed {
            debug!(
                connection = %connection,
                rooms = rooms.len(),
                offline = ?offline,
                "Unregistered"
            );
        }
        removed
    }

    fn deliver(&mut self, member: &ConnectionId, outbound: &Arc<Outbound>) -> Result<(), RelayError> {
        let connection = self
            .registry
            .get_mut(member)
            .ok_or_else(|| RelayError::UnknownConnection(member.clone()))?;

        match connection.outbox().try_send(Arc::clone(outbound)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                connection.record_drop();
                Err(RelayError::TransportBackpressure(member.clone()))
            }
            Err(TrySendError::Closed(_)) => Err(RelayError::UnknownConnection(member.clone())),
        }
    }
}

/// The relay's single coordination point.
///
/// Room and presence storage are pluggable so a clustered backend can replace
/// the in-process tables without touching routing logic.
pub struct EventRouter<R = MemoryRoomStore, P = MemoryPresenceStore> {
    state: Mutex<RelayState<R, P>>,
    config: RouterConfig,
}

impl EventRouter {
    /// Create a router with default configuration and in-process stores.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    /// Create a router with in-process stores.
    #[must_use]
    pub fn with_config(config: RouterConfig) -> Self {
        Self::with_stores(config, MemoryRoomStore::new(), MemoryPresenceStore::new())
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: RoomStore, P: PresenceStore> EventRouter<R, P> {
    /// Create a router over the given stores.
    #[must_use]
    pub fn with_stores(config: RouterConfig, rooms: R, presence: P) -> Self {
        info!("Creating event router with config: {:?}", config);
        Self {
            state: Mutex::new(RelayState {
                registry: ConnectionRegistry::new(config.max_connections),
                rooms,
                presence,
            }),
            config,
        }
    }

    // A panic while holding the lock leaves the tables consistent at the
    // operation boundary, so poisoning is ignored.
    fn state(&self) -> MutexGuard<'_, RelayState<R, P>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The router configuration.
    #[must_use]
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Admit a transport session and create its outbound buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the ID is already open or the connection limit is
    /// reached.
    pub fn open(&self, connection: &ConnectionId) -> Result<Mailbox, RelayError> {
        let (outbox, mailbox) = mpsc::channel(self.config.outbound_capacity.max(1));
        self.state().registry.open(connection.clone(), outbox)?;
        Ok(mailbox)
    }

    /// Bind a user to a connection and mark them online.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::AlreadyBound`] if the connection carries another
    /// identity, or [`RelayError::UnknownConnection`] if it is not open.
    pub fn register(&self, connection: &ConnectionId, user: UserId) -> Result<Registration, RelayError> {
        let mut state = self.state();
        let registration = state.registry.register(connection, user.clone())?;

        if registration == Registration::Bound {
            if let Some(previous) = state.presence.mark_online(&user, connection) {
                info!(
                    user = %user,
                    previous = %previous,
                    connection = %connection,
                    "User connected again; presence moved to newer connection"
                );
            }
        }

        Ok(registration)
    }

    /// Tear down a connection: registry entry, every membership and its
    /// presence entry, before returning. Unknown connections are a no-op.
    ///
    /// Returns `true` if the connection was open.
    pub fn unregister(&self, connection: &ConnectionId) -> bool {
        self.state().teardown(connection)
    }

    /// The user bound to a connection.
    #[must_use]
    pub fn lookup(&self, connection: &ConnectionId) -> Option<UserId> {
        self.state().registry.lookup(connection).cloned()
    }

    /// Subscribe a connection to a room.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is unknown or unbound, or is already
    /// in `max_rooms_per_connection` rooms.
    pub fn join(&self, connection: &ConnectionId, room: RoomKey) -> Result<JoinOutcome, RelayError> {
        let mut state = self.state();

        match state.registry.get(connection) {
            None => return Err(RelayError::UnknownConnection(connection.clone())),
            Some(conn) if conn.user().is_none() => {
                return Err(RelayError::Unbound(connection.clone()))
            }
            Some(_) => {}
        }

        let current = state.rooms.rooms_of(connection);
        if !current.contains(&room) {
            let replaced = room.is_private() && current.iter().any(RoomKey::is_private);
            let occupied = current.len() - usize::from(replaced);
            if occupied >= self.config.max_rooms_per_connection {
                return Err(RelayError::RoomLimitReached(
                    self.config.max_rooms_per_connection,
                ));
            }
        }

        debug!(connection = %connection, room = %room, "Join");
        Ok(state.rooms.join(connection, room))
    }

    /// Unsubscribe a connection from a room.
    ///
    /// Returns `false` if it was not a member; that is not an error.
    pub fn leave(&self, connection: &ConnectionId, room: &RoomKey) -> bool {
        let left = self.state().rooms.leave(connection, room);
        debug!(connection = %connection, room = %room, left, "Leave");
        left
    }

    /// Snapshot of a room's members.
    #[must_use]
    pub fn members(&self, room: &RoomKey) -> Vec<ConnectionId> {
        self.state().rooms.members(room)
    }

    /// Rooms a connection belongs to.
    #[must_use]
    pub fn rooms_of(&self, connection: &ConnectionId) -> Vec<RoomKey> {
        self.state().rooms.rooms_of(connection)
    }

    /// Remove a connection from every room while keeping it registered.
    pub fn evict_connection(&self, connection: &ConnectionId) -> Vec<RoomKey> {
        self.state().rooms.evict_connection(connection)
    }

    /// Whether the user is online.
    #[must_use]
    pub fn is_online(&self, user: &UserId) -> bool {
        self.state().presence.is_online(user)
    }

    /// The connection the user's presence points at.
    #[must_use]
    pub fn presence_of(&self, user: &UserId) -> Option<ConnectionId> {
        self.state()
            .presence
            .entry(user)
            .map(|entry| ConnectionId::new(entry.connection_id))
    }

    /// Fan an event out to the members of its room.
    ///
    /// Messages reach every member including `origin`; typing indicators
    /// reach every member except `origin`. An empty room is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UnresolvedRoom`] if the event's address is
    /// malformed. Delivery failures are reported in the [`DispatchReport`],
    /// never as errors.
    pub fn dispatch(&self, event: ChatEvent, origin: &ConnectionId) -> Result<DispatchReport, RelayError> {
        let room = event.target().resolve()?;
        let echo = event.echoes_to_origin();
        let kind = event.kind();
        let outbound = Arc::new(event.into_outbound(room.clone()));

        let mut report = DispatchReport::new(room);
        let mut reap = Vec::new();

        let mut state = self.state();
        let members = state.rooms.members(&report.room);

        for member in members {
            if !echo && member == *origin {
                continue;
            }
            report.recipients += 1;

            match state.deliver(&member, &outbound) {
                Ok(()) => report.delivered += 1,
                Err(e) if e.is_soft() => {
                    report.dropped += 1;
                    warn!(room = %report.room, error = %e, "Delivery dropped");
                    if self.config.backpressure == BackpressurePolicy::Disconnect {
                        report.disconnected.push(member);
                    }
                }
                Err(e) => {
                    report.stale += 1;
                    debug!(room = %report.room, error = %e, "Skipping stale member");
                    reap.push(member);
                }
            }
        }

        for connection in report.disconnected.iter().chain(reap.iter()) {
            state.teardown(connection);
        }
        drop(state);

        for connection in &report.disconnected {
            warn!(connection = %connection, "Forced unregister on backpressure");
        }

        if report.recipients == 0 {
            trace!(room = %report.room, event = kind, "Dispatch to room without recipients");
        } else {
            trace!(
                room = %report.room,
                event = kind,
                delivered = report.delivered,
                "Dispatched"
            );
        }

        Ok(report)
    }

    /// Number of non-empty rooms.
    ///
    /// Reads only the room table, unlike [`EventRouter::stats`].
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.state().rooms.room_count()
    }

    /// Router statistics.
    #[must_use]
    pub fn stats(&self) -> RelayStats {
        let state = self.state();
        RelayStats {
            connections: state.registry.len(),
            bound_connections: state.registry.bound_count(),
            rooms: state.rooms.room_count(),
            memberships: state.rooms.membership_count(),
            online_users: state.presence.online_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ChatMessage, TypingNotice};
    use crate::rooms::RoomTarget;
    use tokio::sync::mpsc::error::TryRecvError;

    fn user(id: &str) -> UserId {
        UserId::from(id)
    }

    fn connect(router: &EventRouter, conn: &str, who: &str) -> (ConnectionId, Mailbox) {
        let id = ConnectionId::from(conn);
        let mailbox = router.open(&id).unwrap();
        router.register(&id, user(who)).unwrap();
        (id, mailbox)
    }

    fn message(from: &str, to: &str, id: &str) -> ChatEvent {
        ChatEvent::Message(ChatMessage::new(
            RoomTarget::private(user(from), user(to)),
            user(from),
            id,
            1,
            "hello",
        ))
    }

    fn group_message(from: &str, group: &str, id: &str) -> ChatEvent {
        ChatEvent::Message(ChatMessage::new(
            RoomTarget::group(group),
            user(from),
            id,
            1,
            "hello",
        ))
    }

    fn typing(from: &str, target: RoomTarget) -> ChatEvent {
        ChatEvent::TypingStart(TypingNotice::new(target, user(from)))
    }

    fn message_id(outbound: &Outbound) -> &str {
        match outbound {
            Outbound::NewMessage { message, .. } => &message.message_id,
            other => panic!("expected a message, got {:?}", other),
        }
    }

    #[test]
    fn test_unregister_cascades_to_rooms() {
        let router = EventRouter::new();
        let (c1, _rx1) = connect(&router, "c1", "alice");
        let (c2, _rx2) = connect(&router, "c2", "bob");

        let private = RoomKey::private(user("alice"), user("bob"));
        router.join(&c1, private.clone()).unwrap();
        router.join(&c1, RoomKey::group("g1")).unwrap();
        router.join(&c2, private.clone()).unwrap();

        assert!(router.unregister(&c1));
        assert!(!router.members(&private).contains(&c1));
        assert!(router.members(&RoomKey::group("g1")).is_empty());
        assert!(router.rooms_of(&c1).is_empty());
        assert!(!router.is_online(&user("alice")));

        // Second unregister is a no-op.
        assert!(!router.unregister(&c1));
    }

    #[test]
    fn test_stale_disconnect_does_not_clear_newer_presence() {
        let router = EventRouter::new();
        let (c1, _rx1) = connect(&router, "c1", "alice");
        let (c2, _rx2) = connect(&router, "c2", "alice");

        assert!(router.is_online(&user("alice")));
        assert_eq!(router.presence_of(&user("alice")), Some(c2.clone()));

        router.unregister(&c1);
        assert!(router.is_online(&user("alice")));
        assert_eq!(router.presence_of(&user("alice")), Some(c2.clone()));

        router.unregister(&c2);
        assert!(!router.is_online(&user("alice")));
    }

    #[test]
    fn test_rebind_same_user_keeps_presence() {
        let router = EventRouter::new();
        let (c1, _rx) = connect(&router, "c1", "alice");

        assert_eq!(
            router.register(&c1, user("alice")).unwrap(),
            Registration::Unchanged
        );
        assert!(matches!(
            router.register(&c1, user("bob")),
            Err(RelayError::AlreadyBound { .. })
        ));
        assert!(!router.is_online(&user("bob")));
        assert_eq!(router.lookup(&c1), Some(user("alice")));
    }

    #[test]
    fn test_join_requires_bound_connection() {
        let router = EventRouter::new();
        let c1 = ConnectionId::from("c1");

        assert!(matches!(
            router.join(&c1, RoomKey::group("g1")),
            Err(RelayError::UnknownConnection(_))
        ));

        let _rx = router.open(&c1).unwrap();
        assert!(matches!(
            router.join(&c1, RoomKey::group("g1")),
            Err(RelayError::Unbound(_))
        ));
    }

    #[test]
    fn test_private_join_evicts_previous() {
        let router = EventRouter::new();
        let (c1, _rx) = connect(&router, "c1", "alice");

        let r1 = RoomKey::private(user("alice"), user("bob"));
        let r2 = RoomKey::private(user("alice"), user("carol"));
        router.join(&c1, r1.clone()).unwrap();
        let outcome = router.join(&c1, r2.clone()).unwrap();

        assert_eq!(outcome.evicted, Some(r1.clone()));
        assert!(!router.members(&r1).contains(&c1));
        assert!(router.members(&r2).contains(&c1));
    }

    #[test]
    fn test_room_limit() {
        let router = EventRouter::with_config(RouterConfig {
            max_rooms_per_connection: 2,
            ..Default::default()
        });
        let (c1, _rx) = connect(&router, "c1", "alice");

        router.join(&c1, RoomKey::group("g1")).unwrap();
        router
            .join(&c1, RoomKey::private(user("alice"), user("bob")))
            .unwrap();

        assert!(matches!(
            router.join(&c1, RoomKey::group("g2")),
            Err(RelayError::RoomLimitReached(2))
        ));
        // Rejoining is fine, and so is swapping the private room.
        router.join(&c1, RoomKey::group("g1")).unwrap();
        router
            .join(&c1, RoomKey::private(user("alice"), user("carol")))
            .unwrap();
    }

    #[test]
    fn test_message_echoes_to_origin() {
        let router = EventRouter::new();
        let (c1, mut rx1) = connect(&router, "c1", "alice");
        let (c2, mut rx2) = connect(&router, "c2", "bob");

        router
            .join(&c1, RoomTarget::private(user("alice"), user("bob")).resolve().unwrap())
            .unwrap();
        router
            .join(&c2, RoomTarget::private(user("bob"), user("alice")).resolve().unwrap())
            .unwrap();

        let report = router.dispatch(message("alice", "bob", "m1"), &c1).unwrap();
        assert_eq!(report.recipients, 2);
        assert_eq!(report.delivered, 2);

        assert_eq!(message_id(&rx1.try_recv().unwrap()), "m1");
        assert_eq!(message_id(&rx2.try_recv().unwrap()), "m1");
    }

    #[test]
    fn test_typing_never_echoes_to_origin() {
        let router = EventRouter::new();
        let (c1, mut rx1) = connect(&router, "c1", "alice");
        let (c2, mut rx2) = connect(&router, "c2", "bob");
        router.join(&c1, RoomKey::group("g1")).unwrap();
        router.join(&c2, RoomKey::group("g1")).unwrap();

        let report = router
            .dispatch(typing("alice", RoomTarget::group("g1")), &c1)
            .unwrap();
        assert_eq!(report.recipients, 1);

        assert!(matches!(rx1.try_recv(), Err(TryRecvError::Empty)));
        let received = rx2.try_recv().unwrap();
        assert!(matches!(&*received, Outbound::UserTyping { user, .. } if user.as_str() == "alice"));

        let stop = ChatEvent::TypingStop(TypingNotice::new(RoomTarget::group("g1"), user("alice")));
        router.dispatch(stop, &c1).unwrap();
        assert!(matches!(rx1.try_recv(), Err(TryRecvError::Empty)));
        assert!(matches!(&*rx2.try_recv().unwrap(), Outbound::UserStopTyping { .. }));
    }

    #[test]
    fn test_dispatch_to_empty_room() {
        let router = EventRouter::new();
        let (c1, mut rx1) = connect(&router, "c1", "alice");

        let report = router.dispatch(message("alice", "bob", "m1"), &c1).unwrap();
        assert_eq!(report.recipients, 0);
        assert_eq!(report.delivered, 0);
        assert!(rx1.try_recv().is_err());
    }

    #[test]
    fn test_dispatch_unresolved_room() {
        let router = EventRouter::new();
        let c1 = ConnectionId::from("c1");

        assert!(matches!(
            router.dispatch(group_message("alice", "", "m1"), &c1),
            Err(RelayError::UnresolvedRoom(_))
        ));
    }

    #[test]
    fn test_per_room_order_is_dispatch_order() {
        let router = EventRouter::new();
        let (c1, mut rx1) = connect(&router, "c1", "alice");
        let (c2, mut rx2) = connect(&router, "c2", "bob");
        let room = RoomKey::private(user("alice"), user("bob"));
        router.join(&c1, room.clone()).unwrap();
        router.join(&c2, room).unwrap();

        router.dispatch(message("alice", "bob", "m1"), &c1).unwrap();
        router.dispatch(message("bob", "alice", "m2"), &c2).unwrap();
        router.dispatch(message("alice", "bob", "m3"), &c1).unwrap();

        for rx in [&mut rx1, &mut rx2] {
            let order: Vec<String> = (0..3)
                .map(|_| message_id(&rx.try_recv().unwrap()).to_string())
                .collect();
            assert_eq!(order, ["m1", "m2", "m3"]);
        }
    }

    #[test]
    fn test_group_typing_is_scoped_to_group() {
        let router = EventRouter::new();
        let (c1, mut rx1) = connect(&router, "c1", "alice");
        let (c2, mut rx2) = connect(&router, "c2", "bob");
        let (c3, mut rx3) = connect(&router, "c3", "carol");
        router.join(&c1, RoomKey::group("g1")).unwrap();
        router.join(&c2, RoomKey::group("g2")).unwrap();
        router.join(&c3, RoomKey::group("g1")).unwrap();

        router
            .dispatch(typing("alice", RoomTarget::group("g1")), &c1)
            .unwrap();

        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_err());
        assert!(rx3.try_recv().is_ok());
    }

    #[test]
    fn test_backpressure_drop_keeps_connection() {
        let router = EventRouter::with_config(RouterConfig {
            outbound_capacity: 1,
            ..Default::default()
        });
        let (c1, _rx1) = connect(&router, "c1", "alice");
        let (c2, mut rx2) = connect(&router, "c2", "bob");
        router.join(&c2, RoomKey::group("g1")).unwrap();

        router.dispatch(group_message("alice", "g1", "m1"), &c1).unwrap();
        let report = router.dispatch(group_message("alice", "g1", "m2"), &c1).unwrap();

        assert_eq!(report.dropped, 1);
        assert!(report.disconnected.is_empty());
        assert!(router.members(&RoomKey::group("g1")).contains(&c2));
        assert_eq!(message_id(&rx2.try_recv().unwrap()), "m1");
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn test_backpressure_disconnect_unregisters() {
        let router = EventRouter::with_config(RouterConfig {
            outbound_capacity: 1,
            backpressure: BackpressurePolicy::Disconnect,
            ..Default::default()
        });
        let (c1, _rx1) = connect(&router, "c1", "alice");
        let (c2, mut rx2) = connect(&router, "c2", "bob");
        router.join(&c2, RoomKey::group("g1")).unwrap();

        router.dispatch(group_message("alice", "g1", "m1"), &c1).unwrap();
        let report = router.dispatch(group_message("alice", "g1", "m2"), &c1).unwrap();

        assert_eq!(report.disconnected, vec![c2.clone()]);
        assert!(router.members(&RoomKey::group("g1")).is_empty());
        assert!(!router.is_online(&user("bob")));

        // Buffered deliveries drain, then the mailbox reports closure.
        assert_eq!(message_id(&rx2.try_recv().unwrap()), "m1");
        assert!(matches!(rx2.try_recv(), Err(TryRecvError::Disconnected)));
    }

    #[test]
    fn test_closed_mailbox_is_reaped() {
        let router = EventRouter::new();
        let (c1, _rx1) = connect(&router, "c1", "alice");
        let (c2, rx2) = connect(&router, "c2", "bob");
        router.join(&c2, RoomKey::group("g1")).unwrap();
        drop(rx2);

        let report = router.dispatch(group_message("alice", "g1", "m1"), &c1).unwrap();
        assert_eq!(report.stale, 1);
        assert!(router.lookup(&c2).is_none());
        assert!(!router.is_online(&user("bob")));
    }

    #[test]
    fn test_router_stats() {
        let router = EventRouter::new();
        let (c1, _rx1) = connect(&router, "c1", "alice");
        let (c2, _rx2) = connect(&router, "c2", "bob");
        let _rx3 = router.open(&ConnectionId::from("c3")).unwrap();

        router.join(&c1, RoomKey::group("g1")).unwrap();
        router.join(&c2, RoomKey::group("g1")).unwrap();
        router
            .join(&c1, RoomKey::private(user("alice"), user("bob")))
            .unwrap();

        let stats = router.stats();
        assert_eq!(stats.connections, 3);
        assert_eq!(stats.bound_connections, 2);
        assert_eq!(stats.rooms, 2);
        assert_eq!(stats.memberships, 3);
        assert_eq!(stats.online_users, 2);
    }

    #[test]
    fn test_room_count_tracks_joins_and_teardown() {
        let router = EventRouter::new();
        let (c1, _rx1) = connect(&router, "c1", "alice");
        let (c2, _rx2) = connect(&router, "c2", "bob");
        assert_eq!(router.room_count(), 0);

        router.join(&c1, RoomKey::group("g1")).unwrap();
        router.join(&c2, RoomKey::group("g1")).unwrap();
        router.join(&c2, RoomKey::group("g2")).unwrap();
        assert_eq!(router.room_count(), 2);
        assert_eq!(router.room_count(), router.stats().rooms);

        router.leave(&c1, &RoomKey::group("g1"));
        assert_eq!(router.room_count(), 2);

        router.unregister(&c2);
        assert_eq!(router.room_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_fanout_from_tasks() {
        let router = Arc::new(EventRouter::new());
        let mut mailboxes = Vec::new();
        for i in 0..8 {
            let (id, rx) = connect(&router, &format!("c{}", i), &format!("user{}", i));
            router.join(&id, RoomKey::group("lobby")).unwrap();
            mailboxes.push(rx);
        }

        let mut handles = Vec::new();
        for i in 0..8 {
            let router = Arc::clone(&router);
            handles.push(tokio::spawn(async move {
                let origin = ConnectionId::new(format!("c{}", i));
                router
                    .dispatch(group_message(&format!("user{}", i), "lobby", &format!("m{}", i)), &origin)
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Every member sees all eight messages in the same order.
        let reference: Vec<String> = (0..8)
            .map(|_| message_id(&mailboxes[0].try_recv().unwrap()).to_string())
            .collect();
        for rx in mailboxes.iter_mut().skip(1) {
            let order: Vec<String> = (0..8)
                .map(|_| message_id(&rx.try_recv().unwrap()).to_string())
                .collect();
            assert_eq!(order, reference);
        }
    }
}
