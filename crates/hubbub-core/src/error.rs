//! Relay error taxonomy.
//!
//! Only conditions a caller can act on are errors. Unregistering an unknown
//! connection, leaving a room the connection never joined, and dispatching to
//! an empty room are silent no-ops.

use crate::registry::{ConnectionId, UserId};
use thiserror::Error;

/// Errors returned by the relay core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// The connection is already bound to a different user.
    #[error("Connection {connection} is already bound to user {bound}")]
    AlreadyBound {
        /// The connection being rebound.
        connection: ConnectionId,
        /// The identity it already carries.
        bound: UserId,
    },

    /// The event carries no usable room address.
    #[error("Unresolved room: {0}")]
    UnresolvedRoom(&'static str),

    /// A subscriber's outbound buffer is full.
    #[error("Outbound buffer full for connection {0}")]
    TransportBackpressure(ConnectionId),

    /// The connection was never opened, or has already been unregistered.
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// The connection is open but has no bound identity yet.
    #[error("Connection {0} has no bound user")]
    Unbound(ConnectionId),

    /// A connection with this id is already open.
    #[error("Connection already open: {0}")]
    DuplicateConnection(ConnectionId),

    /// The registry is at its connection limit.
    #[error("Maximum connections reached ({0})")]
    CapacityReached(usize),

    /// The connection is at its room limit.
    #[error("Maximum rooms per connection reached ({0})")]
    RoomLimitReached(usize),
}

impl RelayError {
    /// Whether the error only concerns one delivery and never the caller's request.
    #[must_use]
    pub fn is_soft(&self) -> bool {
        matches!(self, RelayError::TransportBackpressure(_))
    }
}
