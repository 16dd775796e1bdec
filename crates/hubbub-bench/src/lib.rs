//! Fixtures shared by the Hubbub benchmarks.

use hubbub_core::{
    ChatEvent, ChatMessage, ConnectionId, EventRouter, Mailbox, RelayError, RoomKey, RoomTarget,
    RouterConfig, TypingNotice, UserId,
};

/// Outbound capacity used by fixtures; large enough that benchmarks never drop.
pub const FIXTURE_CAPACITY: usize = 4096;

/// A router with one group room of `size` bound members.
pub struct GroupFixture {
    /// The relay.
    pub router: EventRouter,
    /// Mailboxes of every member, in join order.
    pub mailboxes: Vec<Mailbox>,
    /// Connection of the first member.
    pub origin: ConnectionId,
    /// The populated room.
    pub group: String,
}

impl GroupFixture {
    /// Open `size` connections and join them all to one group.
    ///
    /// # Errors
    ///
    /// Returns an error if the router rejects a connection or join.
    pub fn new(size: usize) -> Result<Self, RelayError> {
        let router = EventRouter::with_config(RouterConfig {
            outbound_capacity: FIXTURE_CAPACITY,
            ..RouterConfig::default()
        });
        let group = "bench".to_string();

        let mailboxes = (0..size.max(1))
            .map(|i| {
                let (connection, mailbox) = bound_connection(&router, i)?;
                router.join(&connection, RoomKey::group(group.as_str()))?;
                Ok(mailbox)
            })
            .collect::<Result<Vec<_>, RelayError>>()?;

        Ok(Self {
            router,
            mailboxes,
            origin: connection_id(0),
            group,
        })
    }

    /// A message from the first member to the room.
    #[must_use]
    pub fn message(&self, content: &str) -> ChatEvent {
        ChatEvent::Message(ChatMessage::new(
            RoomTarget::group(self.group.as_str()),
            user_id(0),
            "bench-message",
            0,
            content,
        ))
    }

    /// A typing notice from the first member.
    #[must_use]
    pub fn typing(&self) -> ChatEvent {
        ChatEvent::TypingStart(TypingNotice::new(
            RoomTarget::group(self.group.as_str()),
            user_id(0),
        ))
    }

    /// Empty every mailbox, returning how many events were waiting.
    pub fn drain(&mut self) -> usize {
        self.mailboxes
            .iter_mut()
            .map(|mailbox| std::iter::from_fn(|| mailbox.try_recv().ok()).count())
            .sum()
    }
}

/// Connection ID used for the `index`th fixture connection.
#[must_use]
pub fn connection_id(index: usize) -> ConnectionId {
    ConnectionId::new(format!("bench-conn-{}", index))
}

/// User ID used for the `index`th fixture connection.
#[must_use]
pub fn user_id(index: usize) -> UserId {
    UserId::new(format!("bench-user-{}", index))
}

/// Open and bind the `index`th fixture connection.
///
/// # Errors
///
/// Returns an error if the router rejects the connection.
pub fn bound_connection(
    router: &EventRouter,
    index: usize,
) -> Result<(ConnectionId, Mailbox), RelayError> {
    let connection = connection_id(index);
    let mailbox = router.open(&connection)?;
    router.register(&connection, user_id(index))?;
    Ok((connection, mailbox))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_fixture_delivers_to_every_member() {
        let mut fixture = GroupFixture::new(5).unwrap();
        let report = fixture
            .router
            .dispatch(fixture.message("hi"), &fixture.origin)
            .unwrap();
        assert_eq!(report.recipients, 5);
        assert_eq!(fixture.drain(), 5);
    }

    #[test]
    fn test_typing_skips_origin() {
        let mut fixture = GroupFixture::new(3).unwrap();
        fixture
            .router
            .dispatch(fixture.typing(), &fixture.origin)
            .unwrap();
        assert_eq!(fixture.drain(), 2);
    }
}
