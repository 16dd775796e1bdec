//! Frame types for the Hubbub protocol.
//!
//! Frames are the unit of communication between chat clients and the relay.
//! The same frame model is carried as MessagePack on binary WebSocket
//! messages and as JSON on text messages.

use serde::{Deserialize, Serialize};

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum FrameType {
    Connect = 0x01,
    Connected = 0x02,
    Join = 0x03,
    Leave = 0x04,
    Message = 0x05,
    TypingStart = 0x06,
    TypingStop = 0x07,
    NewMessage = 0x08,
    UserTyping = 0x09,
    UserStopTyping = 0x0A,
    Presence = 0x0B,
    PresenceStatus = 0x0C,
    Ack = 0x0D,
    Error = 0x0E,
    Ping = 0x0F,
    Pong = 0x10,
}

impl FrameType {
    /// Lowercase name used in logs and metric labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FrameType::Connect => "connect",
            FrameType::Connected => "connected",
            FrameType::Join => "join",
            FrameType::Leave => "leave",
            FrameType::Message => "message",
            FrameType::TypingStart => "typing_start",
            FrameType::TypingStop => "typing_stop",
            FrameType::NewMessage => "new_message",
            FrameType::UserTyping => "user_typing",
            FrameType::UserStopTyping => "user_stop_typing",
            FrameType::Presence => "presence",
            FrameType::PresenceStatus => "presence_status",
            FrameType::Ack => "ack",
            FrameType::Error => "error",
            FrameType::Ping => "ping",
            FrameType::Pong => "pong",
        }
    }
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> u8 {
        ft as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0x01 => Ok(FrameType::Connect),
            0x02 => Ok(FrameType::Connected),
            0x03 => Ok(FrameType::Join),
            0x04 => Ok(FrameType::Leave),
            0x05 => Ok(FrameType::Message),
            0x06 => Ok(FrameType::TypingStart),
            0x07 => Ok(FrameType::TypingStop),
            0x08 => Ok(FrameType::NewMessage),
            0x09 => Ok(FrameType::UserTyping),
            0x0A => Ok(FrameType::UserStopTyping),
            0x0B => Ok(FrameType::Presence),
            0x0C => Ok(FrameType::PresenceStatus),
            0x0D => Ok(FrameType::Ack),
            0x0E => Ok(FrameType::Error),
            0x0F => Ok(FrameType::Ping),
            0x10 => Ok(FrameType::Pong),
            _ => Err("Invalid frame type"),
        }
    }
}

/// Room variant on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomType {
    /// One-to-one chat; the room id is the peer's user id.
    Private,
    /// Group chat; the room id is the group id.
    Group,
}

/// A room as named by a client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomRef {
    /// Room variant.
    pub kind: RoomType,
    /// Peer user id (private) or group id (group).
    pub id: String,
}

impl RoomRef {
    /// Private room with `peer`.
    #[must_use]
    pub fn private(peer: impl Into<String>) -> Self {
        Self {
            kind: RoomType::Private,
            id: peer.into(),
        }
    }

    /// Group room.
    #[must_use]
    pub fn group(id: impl Into<String>) -> Self {
        Self {
            kind: RoomType::Group,
            id: id.into(),
        }
    }
}

/// Error codes carried by [`Frame::Error`].
pub mod codes {
    /// Client protocol major version differs from the server's.
    pub const UNSUPPORTED_VERSION: u16 = 1001;
    /// Frame could not be decoded or is not valid from a client.
    pub const INVALID_FRAME: u16 = 1002;
    /// Frame requires a bound identity; send `connect` first.
    pub const NOT_CONNECTED: u16 = 1003;
    /// Connection is bound to a different user.
    pub const ALREADY_BOUND: u16 = 1004;
    /// Event carries no usable room address.
    pub const UNRESOLVED_ROOM: u16 = 1005;
    /// Connection or room limit reached.
    pub const LIMIT_REACHED: u16 = 1006;
    /// Unexpected relay failure.
    pub const INTERNAL: u16 = 1007;
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Bind the connection to a verified user.
    #[serde(rename = "connect")]
    Connect {
        /// Client protocol major version.
        version: u8,
        /// User identifier issued by the auth collaborator.
        user: String,
    },

    /// Connection bound.
    #[serde(rename = "connected")]
    Connected {
        /// Relay-assigned connection identifier.
        connection_id: String,
        /// Server protocol major version.
        version: u8,
        /// Heartbeat interval in milliseconds.
        heartbeat: u32,
    },

    /// Join a room.
    #[serde(rename = "join")]
    Join {
        /// Request ID for acknowledgment.
        id: u64,
        /// Room to join.
        room: RoomRef,
    },

    /// Leave a room.
    #[serde(rename = "leave")]
    Leave {
        /// Request ID for acknowledgment.
        id: u64,
        /// Room to leave.
        room: RoomRef,
    },

    /// Relay a persisted chat message.
    #[serde(rename = "message")]
    Message {
        /// Optional request ID for acknowledgment.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<u64>,
        /// Peer user id, for private messages.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recipient: Option<String>,
        /// Group id, for group messages.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group: Option<String>,
        /// Identifier assigned by the message store.
        message_id: String,
        /// Timestamp assigned by the message store.
        timestamp: u64,
        /// Message body.
        content: String,
        /// Extra stored fields.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<serde_json::Value>,
    },

    /// Typing started.
    #[serde(rename = "typing_start")]
    TypingStart {
        /// Room the user is typing in.
        room: RoomRef,
    },

    /// Typing stopped.
    #[serde(rename = "typing_stop")]
    TypingStop {
        /// Room the user stopped typing in.
        room: RoomRef,
    },

    /// A message was relayed to a room this connection is in.
    #[serde(rename = "new_message")]
    NewMessage {
        /// Canonical room key.
        room: String,
        /// Author.
        sender: String,
        /// Identifier assigned by the message store.
        message_id: String,
        /// Timestamp assigned by the message store.
        timestamp: u64,
        /// Message body.
        content: String,
        /// Extra stored fields.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<serde_json::Value>,
    },

    /// Someone in the room started typing.
    #[serde(rename = "user_typing")]
    UserTyping {
        /// Who is typing.
        user: String,
        /// Canonical room key.
        room: String,
    },

    /// Someone in the room stopped typing.
    #[serde(rename = "user_stop_typing")]
    UserStopTyping {
        /// Canonical room key.
        room: String,
    },

    /// Ask whether a user is online.
    #[serde(rename = "presence")]
    Presence {
        /// Request ID.
        id: u64,
        /// User to look up.
        user: String,
    },

    /// Answer to a presence query.
    #[serde(rename = "presence_status")]
    PresenceStatus {
        /// ID of the query.
        id: u64,
        /// User looked up.
        user: String,
        /// Whether the user is online.
        online: bool,
    },

    /// Acknowledgment of a request.
    #[serde(rename = "ack")]
    Ack {
        /// ID of the acknowledged request.
        id: u64,
    },

    /// Error response.
    #[serde(rename = "error")]
    Error {
        /// ID of the failed request (0 if not applicable).
        id: u64,
        /// Error code, see [`codes`].
        code: u16,
        /// Human-readable error message.
        message: String,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        /// Optional timestamp.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        /// Echoed timestamp from ping.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Connect { .. } => FrameType::Connect,
            Frame::Connected { .. } => FrameType::Connected,
            Frame::Join { .. } => FrameType::Join,
            Frame::Leave { .. } => FrameType::Leave,
            Frame::Message { .. } => FrameType::Message,
            Frame::TypingStart { .. } => FrameType::TypingStart,
            Frame::TypingStop { .. } => FrameType::TypingStop,
            Frame::NewMessage { .. } => FrameType::NewMessage,
            Frame::UserTyping { .. } => FrameType::UserTyping,
            Frame::UserStopTyping { .. } => FrameType::UserStopTyping,
            Frame::Presence { .. } => FrameType::Presence,
            Frame::PresenceStatus { .. } => FrameType::PresenceStatus,
            Frame::Ack { .. } => FrameType::Ack,
            Frame::Error { .. } => FrameType::Error,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
        }
    }

    /// Whether clients may send this frame.
    #[must_use]
    pub fn is_client_frame(&self) -> bool {
        matches!(
            self,
            Frame::Connect { .. }
                | Frame::Join { .. }
                | Frame::Leave { .. }
                | Frame::Message { .. }
                | Frame::TypingStart { .. }
                | Frame::TypingStop { .. }
                | Frame::Presence { .. }
                | Frame::Ping { .. }
                | Frame::Pong { .. }
        )
    }

    /// Create a new Connect frame.
    #[must_use]
    pub fn connect(version: u8, user: impl Into<String>) -> Self {
        Frame::Connect {
            version,
            user: user.into(),
        }
    }

    /// Create a new Connected frame.
    #[must_use]
    pub fn connected(connection_id: impl Into<String>, version: u8, heartbeat: u32) -> Self {
        Frame::Connected {
            connection_id: connection_id.into(),
            version,
            heartbeat,
        }
    }

    /// Create a new Join frame.
    #[must_use]
    pub fn join(id: u64, room: RoomRef) -> Self {
        Frame::Join { id, room }
    }

    /// Create a new Leave frame.
    #[must_use]
    pub fn leave(id: u64, room: RoomRef) -> Self {
        Frame::Leave { id, room }
    }

    /// Create a private Message frame.
    #[must_use]
    pub fn private_message(
        recipient: impl Into<String>,
        message_id: impl Into<String>,
        timestamp: u64,
        content: impl Into<String>,
    ) -> Self {
        Frame::Message {
            id: None,
            recipient: Some(recipient.into()),
            group: None,
            message_id: message_id.into(),
            timestamp,
            content: content.into(),
            metadata: None,
        }
    }

    /// Create a group Message frame.
    #[must_use]
    pub fn group_message(
        group: impl Into<String>,
        message_id: impl Into<String>,
        timestamp: u64,
        content: impl Into<String>,
    ) -> Self {
        Frame::Message {
            id: None,
            recipient: None,
            group: Some(group.into()),
            message_id: message_id.into(),
            timestamp,
            content: content.into(),
            metadata: None,
        }
    }

    /// Request acknowledgment of a Message frame. Other frames are unchanged.
    #[must_use]
    pub fn with_ack(mut self, request_id: u64) -> Self {
        if let Frame::Message { id, .. } = &mut self {
            *id = Some(request_id);
        }
        self
    }

    /// Create a new Ack frame.
    #[must_use]
    pub fn ack(id: u64) -> Self {
        Frame::Ack { id }
    }

    /// Create a new Error frame.
    #[must_use]
    pub fn error(id: u64, code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            id,
            code,
            message: message.into(),
        }
    }

    /// Create a new Ping frame.
    #[must_use]
    pub fn ping() -> Self {
        Frame::Ping { timestamp: None }
    }

    /// Create a new Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_type() {
        let join = Frame::join(1, RoomRef::group("g1"));
        assert_eq!(join.frame_type(), FrameType::Join);
        assert_eq!(join.frame_type().as_str(), "join");

        let message = Frame::private_message("bob", "m1", 1, "hi");
        assert_eq!(message.frame_type(), FrameType::Message);
    }

    #[test]
    fn test_frame_type_conversion() {
        for value in 0x01..=0x10u8 {
            let ft = FrameType::try_from(value).unwrap();
            assert_eq!(u8::from(ft), value);
        }
        assert!(FrameType::try_from(0x11).is_err());
        assert!(FrameType::try_from(0).is_err());
    }

    #[test]
    fn test_client_frames() {
        assert!(Frame::connect(1, "alice").is_client_frame());
        assert!(Frame::ping().is_client_frame());
        assert!(!Frame::ack(1).is_client_frame());
        assert!(!Frame::connected("c1", 1, 30_000).is_client_frame());
    }

    #[test]
    fn test_with_ack() {
        let frame = Frame::group_message("g1", "m1", 1, "hi").with_ack(7);
        assert!(matches!(frame, Frame::Message { id: Some(7), .. }));

        let untouched = Frame::ping().with_ack(7);
        assert_eq!(untouched, Frame::ping());
    }

    #[test]
    fn test_json_wire_names() {
        let frame = Frame::TypingStart {
            room: RoomRef::private("bob"),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "typing_start");
        assert_eq!(json["room"]["kind"], "private");
        assert_eq!(json["room"]["id"], "bob");
    }
}
