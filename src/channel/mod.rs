//! Channel abstraction: `ChannelPacketData`, the `Channel` trait, and the
//! two concrete channel kinds this protocol supports.
//!
//! Grounded on `yojimbo_channel.h`'s `ChannelPacketData`/`Channel` virtual
//! interface, translated from virtual dispatch into a closed tagged enum
//! plus a single trait, per §9 "Polymorphic Packet/Message hierarchy →
//! tagged variants."

pub mod reliable;
pub mod unreliable;

pub use reliable::ReliableOrderedChannel;
pub use unreliable::UnreliableUnorderedChannel;

use crate::error::ChannelError;
use crate::message::Message;

/// The payload half of [`ChannelPacketData`] (§3).
#[derive(Debug, Clone)]
pub enum ChannelPacketPayload {
    /// Regular delivery: a list of whole messages.
    Messages(Vec<Message>),
    /// One block fragment. `block_message` carries the `BlockMessage`
    /// itself, attached only to fragment 0.
    Block {
        message_id: u16,
        fragment_id: u16,
        num_fragments: u16,
        fragment_size: u16,
        fragment_data: Vec<u8>,
        block_message: Option<Message>,
        message_type: u16,
    },
}

/// What a channel contributed to one outgoing connection packet, or what was
/// read back out of one on the receive side (§3).
#[derive(Debug, Clone)]
pub struct ChannelPacketData {
    pub channel_index: u16,
    /// Set on the receive side when the channel's own payload failed to
    /// deserialize; triggers [`ChannelError::FailedToSerialize`].
    pub message_failed_to_serialize: bool,
    pub payload: ChannelPacketPayload,
}

impl ChannelPacketData {
    #[must_use]
    pub fn is_block(&self) -> bool {
        matches!(self.payload, ChannelPacketPayload::Block { .. })
    }
}

/// Common functionality shared across channel kinds (mirrors
/// `yojimbo::Channel`'s virtual method contract).
pub trait Channel {
    /// Resets all channel state as if newly constructed.
    fn reset(&mut self);

    /// Whether a message can currently be queued for send.
    fn can_send_message(&self) -> bool;

    /// Whether there is at least one message in the send queue.
    fn has_messages_to_send(&self) -> bool;

    /// Queues `message` to be sent. On failure the channel's sticky error
    /// level is set and the message is dropped (its `Rc` released).
    fn send_message(&mut self, message: Message) -> Result<(), ChannelError>;

    /// Pops the next message off the receive queue, if any is ready.
    fn receive_message(&mut self) -> Option<Message>;

    /// Advances channel time; called once per tick by the owning
    /// connection.
    fn advance_time(&mut self, time: f64);

    /// Produces this channel's contribution to an outgoing connection
    /// packet, bounded by `available_bits`. Returns the packet data and the
    /// number of bits it consumes, or `None` if the channel has nothing to
    /// contribute right now.
    fn get_packet_data(
        &mut self,
        packet_sequence: u16,
        available_bits: usize,
    ) -> Option<(ChannelPacketData, usize)>;

    /// Processes channel data read out of a received connection packet.
    fn process_packet_data(&mut self, data: &ChannelPacketData, packet_sequence: u16);

    /// Processes an ack for a connection packet this channel contributed to.
    fn process_ack(&mut self, sequence: u16);

    /// The channel's sticky error level, if any.
    fn error_level(&self) -> Option<ChannelError>;

    fn channel_index(&self) -> u16;
}
