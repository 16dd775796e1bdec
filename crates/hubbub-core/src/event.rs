//! Chat events entering the router and the events it fans out.

use crate::registry::UserId;
use crate::rooms::{RoomKey, RoomTarget};

/// A message already persisted by the storage collaborator.
///
/// The relay never assigns or rewrites `message_id` or `timestamp`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    /// Where the message goes.
    pub target: RoomTarget,
    /// Author of the message.
    pub sender: UserId,
    /// Stable identifier assigned by the store.
    pub message_id: String,
    /// Logical timestamp assigned by the store.
    pub timestamp: u64,
    /// Message body.
    pub content: String,
    /// Extra fields the store attached (sender name, attachment URL, ...).
    pub metadata: Option<serde_json::Value>,
}

impl ChatMessage {
    /// Create a message without metadata.
    #[must_use]
    pub fn new(
        target: RoomTarget,
        sender: UserId,
        message_id: impl Into<String>,
        timestamp: u64,
        content: impl Into<String>,
    ) -> Self {
        Self {
            target,
            sender,
            message_id: message_id.into(),
            timestamp,
            content: content.into(),
            metadata: None,
        }
    }

    /// Attach store metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// A typing indicator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingNotice {
    /// Where the indicator goes.
    pub target: RoomTarget,
    /// Who is typing.
    pub user: UserId,
}

impl TypingNotice {
    /// Create a typing notice.
    #[must_use]
    pub fn new(target: RoomTarget, user: UserId) -> Self {
        Self { target, user }
    }
}

/// Inbound event handed to [`EventRouter::dispatch`](crate::EventRouter::dispatch).
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// A chat message; echoed back to the origin.
    Message(ChatMessage),
    /// Typing started; never echoed to the origin.
    TypingStart(TypingNotice),
    /// Typing stopped; never echoed to the origin.
    TypingStop(TypingNotice),
}

impl ChatEvent {
    /// The event's room address.
    #[must_use]
    pub fn target(&self) -> &RoomTarget {
        match self {
            ChatEvent::Message(message) => &message.target,
            ChatEvent::TypingStart(notice) | ChatEvent::TypingStop(notice) => &notice.target,
        }
    }

    /// Whether the origin connection receives its own event.
    #[must_use]
    pub fn echoes_to_origin(&self) -> bool {
        matches!(self, ChatEvent::Message(_))
    }

    /// Short name for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ChatEvent::Message(_) => "message",
            ChatEvent::TypingStart(_) => "typing_start",
            ChatEvent::TypingStop(_) => "typing_stop",
        }
    }

    pub(crate) fn into_outbound(self, room: RoomKey) -> Outbound {
        match self {
            ChatEvent::Message(message) => Outbound::NewMessage { room, message },
            ChatEvent::TypingStart(notice) => Outbound::UserTyping {
                room,
                user: notice.user,
            },
            ChatEvent::TypingStop(_) => Outbound::UserStopTyping { room },
        }
    }
}

/// Event delivered to a subscriber's outbound buffer.
///
/// One instance is shared by every recipient of a dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// A new chat message.
    NewMessage {
        /// Resolved room.
        room: RoomKey,
        /// The message.
        message: ChatMessage,
    },
    /// Someone started typing.
    UserTyping {
        /// Resolved room.
        room: RoomKey,
        /// Who is typing.
        user: UserId,
    },
    /// Someone stopped typing.
    UserStopTyping {
        /// Resolved room.
        room: RoomKey,
    },
}

impl Outbound {
    /// The room the event belongs to.
    #[must_use]
    pub fn room(&self) -> &RoomKey {
        match self {
            Outbound::NewMessage { room, .. }
            | Outbound::UserTyping { room, .. }
            | Outbound::UserStopTyping { room } => room,
        }
    }
}
