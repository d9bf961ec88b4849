//! Trait bound for items a queue agent can batch by destination.

use codec::Message;

/// Implemented by anything an [`AsynchQueueAgent`](crate::AsynchQueueAgent)
/// drains. Batching groups consecutive items whose destinations agree.
pub trait OutgoingMessage {
    fn is_same_destination(&self, other: &Self) -> bool;
}

impl OutgoingMessage for Message {
    fn is_same_destination(&self, other: &Self) -> bool {
        Message::is_same_destination(self, other)
    }
}

impl<T: OutgoingMessage> OutgoingMessage for std::sync::Arc<T> {
    fn is_same_destination(&self, other: &Self) -> bool {
        T::is_same_destination(self, other)
    }
}
