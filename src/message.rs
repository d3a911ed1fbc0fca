//! Application messages.
//!
//! §9 calls out modeling the source's manual reference counting as Rust
//! shared ownership instead of hand-tracked counts: a [`Message`] is an
//! `Rc<MessageData>`, so cloning the handle for a send-queue slot, a
//! sent-packet-entry, or a receive-queue slot is exactly the "+1 reference"
//! the base spec describes, and the payload is freed when the last `Rc`
//! drops. There is no cycle risk because nothing a channel owns ever holds a
//! `Message` pointing back at channel state.

use std::cell::Cell;
use std::rc::Rc;

/// The payload carried by a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePayload {
    /// Serialized inline, alongside other messages in a packet.
    Regular(Vec<u8>),
    /// A detachable opaque buffer up to `maxBlockSize`, streamed as its own
    /// fragments by the reliable channel's block sub-protocol (§4.6) or by
    /// [`crate::chunk`].
    Block(Vec<u8>),
}

impl MessagePayload {
    #[must_use]
    pub fn is_block(&self) -> bool {
        matches!(self, Self::Block(_))
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Regular(b) | Self::Block(b) => b,
        }
    }
}

/// Message contents. `id` is a `Cell` because it is unassigned at creation
/// and filled in by the owning channel's `send_message` (`sendMessageId`) —
/// every other field is fixed for the message's lifetime.
#[derive(Debug)]
pub struct MessageData {
    id: Cell<u16>,
    pub message_type: u16,
    pub payload: MessagePayload,
}

impl MessageData {
    #[must_use]
    pub fn id(&self) -> u16 {
        self.id.get()
    }

    pub fn set_id(&self, id: u16) {
        self.id.set(id);
    }

    /// Builds a block message's final form once reassembly completes,
    /// carrying the fully reassembled bytes.
    #[must_use]
    pub(crate) fn rebuild_block(id: u16, message_type: u16, bytes: Vec<u8>) -> Self {
        Self {
            id: Cell::new(id),
            message_type,
            payload: MessagePayload::Block(bytes),
        }
    }

    /// Rebuilds a regular (inline) message read off the wire.
    #[must_use]
    pub(crate) fn rebuild_regular(id: u16, message_type: u16, bytes: Vec<u8>) -> Self {
        Self {
            id: Cell::new(id),
            message_type,
            payload: MessagePayload::Regular(bytes),
        }
    }
}

/// Shared-ownership handle to a message. See the module documentation.
pub type Message = Rc<MessageData>;

/// Creates messages. A real application registers one type per distinct
/// message schema; the factory here only needs to know the type count to
/// validate `message_type` is in range, since actual (de)serialization is
/// supplied by the caller via `MessagePayload` bytes.
#[derive(Debug, Clone, Copy)]
pub struct MessageFactory {
    num_types: u16,
}

impl MessageFactory {
    #[must_use]
    pub fn new(num_types: u16) -> Self {
        Self { num_types }
    }

    #[must_use]
    pub fn num_types(&self) -> u16 {
        self.num_types
    }

    /// Creates a regular (inline) message. Returns `None` if `message_type`
    /// is out of range.
    #[must_use]
    pub fn create_regular(&self, message_type: u16, payload: Vec<u8>) -> Option<Message> {
        if message_type >= self.num_types {
            return None;
        }
        Some(Rc::new(MessageData {
            id: Cell::new(0),
            message_type,
            payload: MessagePayload::Regular(payload),
        }))
    }

    /// Creates a block message carrying a detachable byte buffer.
    #[must_use]
    pub fn create_block(&self, message_type: u16, block: Vec<u8>) -> Option<Message> {
        if message_type >= self.num_types {
            return None;
        }
        Some(Rc::new(MessageData {
            id: Cell::new(0),
            message_type,
            payload: MessagePayload::Block(block),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_type() {
        let factory = MessageFactory::new(2);
        assert!(factory.create_regular(5, vec![]).is_none());
        assert!(factory.create_regular(1, vec![1, 2, 3]).is_some());
    }

    #[test]
    fn shared_ownership_keeps_message_alive_across_handles() {
        let factory = MessageFactory::new(1);
        let msg = factory.create_regular(0, vec![9, 9, 9]).unwrap();
        msg.set_id(42);
        let in_send_queue = msg.clone();
        let in_sent_packet_entry = msg.clone();
        drop(msg);
        assert_eq!(in_send_queue.id(), 42);
        assert_eq!(in_sent_packet_entry.payload.bytes(), &[9, 9, 9]);
    }
}
