//! # hubbub-protocol
//!
//! Wire protocol for the Hubbub chat relay.
//!
//! ## Frame Types
//!
//! - `Connect` / `Connected` - Bind a connection to a verified user
//! - `Join` / `Leave` - Room membership
//! - `Message` / `NewMessage` - Relay persisted chat messages
//! - `TypingStart` / `TypingStop` / `UserTyping` / `UserStopTyping` - Typing indicators
//! - `Presence` / `PresenceStatus` - Online lookups
//! - `Ack` / `Error` - Acknowledgments and errors
//!
//! ## Example
//!
//! ```rust
//! use hubbub_protocol::{codec, Frame, RoomRef};
//!
//! let frame = Frame::join(1, RoomRef::group("book-club"));
//!
//! let encoded = codec::encode(&frame).unwrap();
//! assert_eq!(codec::decode(&encoded).unwrap(), frame);
//!
//! let text = codec::encode_json(&frame).unwrap();
//! assert_eq!(codec::decode_json(&text).unwrap(), frame);
//! ```

pub mod codec;
pub mod frames;
pub mod version;

pub use codec::{decode, encode, Encoded, ProtocolError, WireFormat};
pub use frames::{codes, Frame, FrameType, RoomRef, RoomType};
pub use version::{UnsupportedVersion, Version, PROTOCOL_VERSION};
