//! # hubbub-core
//!
//! Session and room coordination for the Hubbub chat relay.
//!
//! This crate provides the in-memory relay state and its single entry point:
//!
//! - **Registry** - Live connections and the user bound to each
//! - **Rooms** - Private (user pair) and group rooms and their members
//! - **Presence** - Which connection each online user points at
//! - **Router** - Serialized mutations and event fan-out
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│ EventRouter │────▶│  RoomStore  │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                   │
//!        │ Mailbox           ▼
//!        │            ┌───────────────┐
//!        └────────────│ PresenceStore │
//!                     └───────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use hubbub_core::{ChatEvent, ChatMessage, ConnectionId, EventRouter, RoomTarget, UserId};
//!
//! let router = EventRouter::new();
//! let alice = ConnectionId::from("c1");
//! let mut mailbox = router.open(&alice).unwrap();
//! router.register(&alice, UserId::from("alice")).unwrap();
//!
//! let target = RoomTarget::private(UserId::from("alice"), UserId::from("bob"));
//! router.join(&alice, target.resolve().unwrap()).unwrap();
//!
//! let message = ChatMessage::new(target, UserId::from("alice"), "m1", 1, "hi");
//! router.dispatch(ChatEvent::Message(message), &alice).unwrap();
//! assert!(mailbox.try_recv().is_ok());
//! ```

pub mod error;
pub mod event;
pub mod presence;
pub mod registry;
pub mod rooms;
pub mod router;

pub use error::RelayError;
pub use event::{ChatEvent, ChatMessage, Outbound, TypingNotice};
pub use presence::{MemoryPresenceStore, PresenceEntry, PresenceStore};
pub use registry::{ConnectionId, ConnectionRegistry, Mailbox, Registration, UserId};
pub use rooms::{JoinOutcome, MemoryRoomStore, RoomKey, RoomKind, RoomStore, RoomTarget};
pub use router::{BackpressurePolicy, DispatchReport, EventRouter, RelayStats, RouterConfig};
