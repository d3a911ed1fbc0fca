//! Reliable-ordered channel (§4.6): per-message acks via a packet-ack
//! mapping, oldest-unacked tracking, and an embedded block sub-protocol for
//! streaming one large block message at a time.
//!
//! Grounded on `yojimbo_reliable_ordered_channel.h`/`.cpp`'s queue layout
//! and `SendBlockData`/`ReceiveBlockData` fields, as specified in full by
//! §4.6 of the base spec.

use tracing::{debug, trace, warn};

use crate::bit_array::BitArray;
use crate::config::ChannelConfig;
use crate::error::ChannelError;
use crate::message::{Message, MessagePayload};
use crate::seq::sequence_difference;
use crate::seq_buffer::SequenceBuffer;

use super::{Channel, ChannelPacketData, ChannelPacketPayload};

struct SendQueueEntry {
    message: Message,
    measured_bits: usize,
    block: bool,
    time_last_sent: f64,
}

struct ReceiveQueueEntry {
    message: Message,
}

struct SentPacketEntry {
    time_sent: f64,
    acked: bool,
    message_ids: Vec<u16>,
    block: bool,
    block_message_id: u16,
    block_fragment_id: u16,
}

struct SendBlockData {
    active: bool,
    num_fragments: u16,
    num_acked_fragments: u16,
    block_message_id: u16,
    acked_fragment: BitArray,
    fragment_send_time: Vec<f64>,
    block_bytes: Vec<u8>,
    fragment_size: usize,
}

struct ReceiveBlockData {
    active: bool,
    num_fragments: u16,
    num_received_fragments: u16,
    message_id: u16,
    message_type: u16,
    received_fragment: BitArray,
    block_data: Vec<u8>,
    block_message: Option<Message>,
}

/// A conservative flat per-message header estimate (message id + length tag)
/// used when budgeting available bits for the regular send path. The base
/// spec's exact bit accounting (sequence-relative delta ids) is an
/// optimization over this; both satisfy the packet-budget invariant.
const MESSAGE_HEADER_BITS: usize = 16;
const GIVE_UP_BYTES: usize = 4;

/// See the module documentation.
pub struct ReliableOrderedChannel {
    channel_index: u16,
    config: ChannelConfig,
    error: Option<ChannelError>,
    time: f64,

    send_message_id: u16,
    oldest_unacked_message_id: u16,
    receive_message_id: u16,

    send_queue: SequenceBuffer<SendQueueEntry>,
    receive_queue: SequenceBuffer<ReceiveQueueEntry>,
    sent_packets: SequenceBuffer<SentPacketEntry>,

    send_block: Option<SendBlockData>,
    receive_block: Option<ReceiveBlockData>,

    messages_sent: u64,
    messages_received: u64,
}

impl ReliableOrderedChannel {
    #[must_use]
    pub fn new(channel_index: u16, config: ChannelConfig) -> Self {
        Self {
            channel_index,
            send_queue: SequenceBuffer::new(config.message_send_queue_size as usize),
            receive_queue: SequenceBuffer::new(config.message_receive_queue_size as usize),
            sent_packets: SequenceBuffer::new(config.sent_packet_buffer_size as usize),
            config,
            error: None,
            time: 0.0,
            send_message_id: 0,
            oldest_unacked_message_id: 0,
            receive_message_id: 0,
            send_block: None,
            receive_block: None,
            messages_sent: 0,
            messages_received: 0,
        }
    }

    #[must_use]
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent
    }

    #[must_use]
    pub fn messages_received(&self) -> u64 {
        self.messages_received
    }

    #[must_use]
    pub fn oldest_unacked_message_id(&self) -> u16 {
        self.oldest_unacked_message_id
    }

    fn set_error(&mut self, error: ChannelError) {
        if self.error.is_none() {
            warn!(channel = self.channel_index, ?error, "channel error raised");
            self.error = Some(error);
        }
    }

    fn sending_block_message(&self) -> bool {
        self.send_queue
            .get(self.oldest_unacked_message_id)
            .map(|e| e.block)
            .unwrap_or(false)
    }

    fn update_oldest_unacked(&mut self) {
        while self.oldest_unacked_message_id != self.send_message_id
            && !self.send_queue.exists(self.oldest_unacked_message_id)
        {
            self.oldest_unacked_message_id = self.oldest_unacked_message_id.wrapping_add(1);
        }
    }

    fn get_messages_packet_data(
        &mut self,
        available_bits: usize,
    ) -> Option<(ChannelPacketData, usize)> {
        let mut available_bits = available_bits;
        if let Some(budget) = self.config.packet_budget {
            available_bits = available_bits.min(budget as usize * 8);
        }

        let window = (self.config.message_send_queue_size as usize)
            .min(self.config.message_receive_queue_size as usize);

        let mut ids = Vec::new();
        let mut messages = Vec::new();
        let mut bits_used = MESSAGE_HEADER_BITS; // conservative channel header
        let mut give_up = 0u32;

        let mut id = self.oldest_unacked_message_id;
        for _ in 0..window {
            if ids.len() >= self.config.max_messages_per_packet as usize {
                break;
            }
            if give_up as u32 >= self.config.message_send_queue_size {
                break;
            }
            let Some(entry) = self.send_queue.get_mut(id) else {
                id = id.wrapping_add(1);
                continue;
            };
            if entry.block {
                break;
            }
            if entry.time_last_sent + self.config.message_resend_time > self.time {
                id = id.wrapping_add(1);
                continue;
            }
            let needed = entry.measured_bits + MESSAGE_HEADER_BITS;
            if available_bits.saturating_sub(bits_used) < needed + GIVE_UP_BYTES * 8 {
                give_up += 1;
                id = id.wrapping_add(1);
                continue;
            }
            entry.time_last_sent = self.time;
            bits_used += needed;
            ids.push(id);
            messages.push(entry.message.clone());
            id = id.wrapping_add(1);
        }

        if ids.is_empty() {
            return None;
        }

        trace!(channel = self.channel_index, count = ids.len(), "reliable messages selected");
        Some((
            ChannelPacketData {
                channel_index: self.channel_index,
                message_failed_to_serialize: false,
                payload: ChannelPacketPayload::Messages(messages),
            },
            bits_used,
        ))
    }

    fn get_block_packet_data(
        &mut self,
        available_bits: usize,
    ) -> Option<(ChannelPacketData, usize)> {
        let entry = self.send_queue.get(self.oldest_unacked_message_id)?;
        let MessagePayload::Block(bytes) = &entry.message.payload else {
            return None;
        };

        if self.send_block.is_none() {
            let fragment_size = self.config.block_fragment_size as usize;
            let num_fragments = ((bytes.len() + fragment_size - 1) / fragment_size).max(1) as u16;
            self.send_block = Some(SendBlockData {
                active: true,
                num_fragments,
                num_acked_fragments: 0,
                block_message_id: self.oldest_unacked_message_id,
                acked_fragment: BitArray::new(num_fragments as usize),
                fragment_send_time: vec![f64::NEG_INFINITY; num_fragments as usize],
                block_bytes: bytes.clone(),
                fragment_size,
            });
        }

        let block = self.send_block.as_mut()?;
        if !block.active || block.block_message_id != self.oldest_unacked_message_id {
            return None;
        }

        let fragment_id = (0..block.num_fragments as usize).find(|&i| {
            !block.acked_fragment.get(i) && block.fragment_send_time[i] + self.config.block_fragment_resend_time < self.time
        })?;

        let fragment_size = block.fragment_size;
        let start = fragment_id * fragment_size;
        let end = (start + fragment_size).min(block.block_bytes.len());
        let fragment_data = block.block_bytes[start..end].to_vec();
        let header_bits = 16 + 16 + 16 + 16; // message id, fragment id, num fragments, fragment size
        let needed = header_bits + fragment_data.len() * 8;
        if needed > available_bits {
            return None;
        }
        block.fragment_send_time[fragment_id] = self.time;

        let block_message = if fragment_id == 0 {
            Some(entry.message.clone())
        } else {
            None
        };
        let num_fragments = block.num_fragments;

        trace!(
            channel = self.channel_index,
            fragment_id,
            num_fragments,
            "block fragment selected"
        );

        Some((
            ChannelPacketData {
                channel_index: self.channel_index,
                message_failed_to_serialize: false,
                payload: ChannelPacketPayload::Block {
                    message_id: self.oldest_unacked_message_id,
                    fragment_id: fragment_id as u16,
                    num_fragments,
                    fragment_size: fragment_data.len() as u16,
                    fragment_data,
                    block_message,
                    message_type: entry.message.message_type,
                },
            },
            needed,
        ))
    }

    fn process_regular_data(&mut self, messages: &[Message], packet_sequence: u16) {
        let window = self.config.message_receive_queue_size;
        for message in messages {
            let id = message.id();
            let diff = sequence_difference(id, self.receive_message_id);
            if diff < 0 {
                // already delivered or superseded; ignore
                continue;
            }
            if diff as u32 >= window {
                self.set_error(ChannelError::Desync);
                return;
            }
            if self.receive_queue.exists(id) {
                continue;
            }
            self.receive_queue.insert(id, ReceiveQueueEntry { message: message.clone() });
        }
        let _ = packet_sequence;
    }

    fn process_block_data(
        &mut self,
        message_id: u16,
        fragment_id: u16,
        num_fragments: u16,
        fragment_data: &[u8],
        block_message: &Option<Message>,
        message_type: u16,
    ) {
        if message_id != self.receive_message_id {
            return;
        }
        if self.receive_queue.exists(message_id) {
            return; // already reassembled and queued
        }

        if self.receive_block.is_none() {
            let Some(block_message) = block_message.clone() else {
                // fragment 0 must arrive eventually carrying the template;
                // out-of-order non-zero fragments before it are dropped
                return;
            };
            self.receive_block = Some(ReceiveBlockData {
                active: true,
                num_fragments,
                num_received_fragments: 0,
                message_id,
                message_type,
                received_fragment: BitArray::new(num_fragments as usize),
                block_data: vec![0u8; self.config.max_block_size as usize],
                block_message: Some(block_message),
            });
        }

        let block = self.receive_block.as_mut().unwrap();
        if !block.active || block.message_id != message_id || block.num_fragments != num_fragments {
            return;
        }
        if fragment_id as usize >= num_fragments as usize {
            return;
        }
        if block.received_fragment.get(fragment_id as usize) {
            return; // idempotent: duplicate fragment ignored
        }

        let fragment_size = self.config.block_fragment_size as usize;
        let start = fragment_id as usize * fragment_size;
        let end = start + fragment_data.len();
        if end > block.block_data.len() {
            self.set_error(ChannelError::OutOfMemory);
            return;
        }
        block.block_data[start..end].copy_from_slice(fragment_data);
        block.received_fragment.set(fragment_id as usize);
        block.num_received_fragments += 1;

        let is_last = fragment_id + 1 == num_fragments;
        let total_len = if is_last { end } else { block.block_data.len() };

        if block.num_received_fragments == block.num_fragments {
            block.block_data.truncate(total_len.max(end));
            let reassembled = std::mem::take(&mut block.block_data);
            let _template = block.block_message.take();
            let full_message = std::rc::Rc::new(crate::message::MessageData::rebuild_block(
                message_id,
                message_type,
                reassembled,
            ));
            debug!(channel = self.channel_index, message_id, "block reassembled");
            self.receive_queue
                .insert(message_id, ReceiveQueueEntry { message: full_message });
            self.receive_block = None;
        }
    }
}

impl Channel for ReliableOrderedChannel {
    fn reset(&mut self) {
        let config = self.config;
        *self = Self::new(self.channel_index, config);
    }

    fn can_send_message(&self) -> bool {
        self.error.is_none() && !self.send_queue.exists(self.send_message_id)
    }

    fn has_messages_to_send(&self) -> bool {
        self.oldest_unacked_message_id != self.send_message_id
    }

    fn send_message(&mut self, message: Message) -> Result<(), ChannelError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let is_block = message.payload.is_block();
        if is_block && self.config.disable_blocks {
            self.set_error(ChannelError::BlocksDisabled);
            return Err(ChannelError::BlocksDisabled);
        }
        if !self.can_send_message() {
            self.set_error(ChannelError::SendQueueFull);
            return Err(ChannelError::SendQueueFull);
        }
        message.set_id(self.send_message_id);
        let measured_bits = message.payload.bytes().len() * 8 + 16;
        self.send_queue.insert(
            self.send_message_id,
            SendQueueEntry {
                message,
                measured_bits,
                block: is_block,
                time_last_sent: f64::NEG_INFINITY,
            },
        );
        self.send_message_id = self.send_message_id.wrapping_add(1);
        self.messages_sent += 1;
        Ok(())
    }

    fn receive_message(&mut self) -> Option<Message> {
        let entry = self.receive_queue.remove(self.receive_message_id)?;
        self.receive_message_id = self.receive_message_id.wrapping_add(1);
        self.messages_received += 1;
        Some(entry.message)
    }

    fn advance_time(&mut self, time: f64) {
        self.time = time;
    }

    fn get_packet_data(
        &mut self,
        _packet_sequence: u16,
        available_bits: usize,
    ) -> Option<(ChannelPacketData, usize)> {
        if self.error.is_some() || !self.has_messages_to_send() {
            return None;
        }
        if self.sending_block_message() {
            self.get_block_packet_data(available_bits)
        } else {
            self.get_messages_packet_data(available_bits)
        }
    }

    fn process_packet_data(&mut self, data: &ChannelPacketData, packet_sequence: u16) {
        if self.error.is_some() {
            return;
        }
        if data.message_failed_to_serialize {
            self.set_error(ChannelError::FailedToSerialize);
            return;
        }
        match &data.payload {
            ChannelPacketPayload::Messages(messages) => {
                self.process_regular_data(messages, packet_sequence);
            }
            ChannelPacketPayload::Block {
                message_id,
                fragment_id,
                num_fragments,
                fragment_data,
                block_message,
                message_type,
            } => {
                self.process_block_data(
                    *message_id,
                    *fragment_id,
                    *num_fragments,
                    fragment_data,
                    block_message,
                    *message_type,
                );
            }
        }
    }

    fn process_ack(&mut self, sequence: u16) {
        let Some(entry) = self.sent_packets.get_mut(sequence) else {
            return;
        };
        if entry.acked {
            return;
        }
        entry.acked = true;
        let block = entry.block;
        let block_message_id = entry.block_message_id;
        let block_fragment_id = entry.block_fragment_id;
        let message_ids = entry.message_ids.clone();

        if block {
            if let Some(sb) = &mut self.send_block {
                if sb.active
                    && sb.block_message_id == block_message_id
                    && !sb.acked_fragment.get(block_fragment_id as usize)
                {
                    sb.acked_fragment.set(block_fragment_id as usize);
                    sb.num_acked_fragments += 1;
                    if sb.num_acked_fragments == sb.num_fragments {
                        sb.active = false;
                        self.send_queue.remove(block_message_id);
                        self.update_oldest_unacked();
                    }
                }
            }
        } else {
            for id in message_ids {
                self.send_queue.remove(id);
            }
            self.update_oldest_unacked();
        }
    }

    fn error_level(&self) -> Option<ChannelError> {
        self.error
    }

    fn channel_index(&self) -> u16 {
        self.channel_index
    }
}

/// Records a [`SentPacketEntry`] for `packet_sequence` given what
/// `get_packet_data` returned; the owning [`crate::connection::Connection`]
/// calls this right after composing the outgoing packet.
impl ReliableOrderedChannel {
    pub fn record_sent_packet(&mut self, packet_sequence: u16, data: &ChannelPacketData) {
        let entry = match &data.payload {
            ChannelPacketPayload::Messages(messages) => SentPacketEntry {
                time_sent: self.time,
                acked: false,
                message_ids: messages.iter().map(|m| m.id()).collect(),
                block: false,
                block_message_id: 0,
                block_fragment_id: 0,
            },
            ChannelPacketPayload::Block {
                message_id,
                fragment_id,
                ..
            } => SentPacketEntry {
                time_sent: self.time,
                acked: false,
                message_ids: Vec::new(),
                block: true,
                block_message_id: *message_id,
                block_fragment_id: *fragment_id,
            },
        };
        self.sent_packets.insert(packet_sequence, entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageFactory;

    fn channel() -> ReliableOrderedChannel {
        let mut config = ChannelConfig::default();
        config.message_resend_time = 0.0;
        config.block_fragment_resend_time = 0.0;
        ReliableOrderedChannel::new(0, config)
    }

    #[test]
    fn send_and_receive_in_order() {
        let factory = MessageFactory::new(1);
        let mut tx = channel();
        let mut rx = channel();

        for i in 0..5u8 {
            let msg = factory.create_regular(0, vec![i]).unwrap();
            tx.send_message(msg).unwrap();
        }

        let mut seq = 0u16;
        while tx.has_messages_to_send() {
            let Some((data, _bits)) = tx.get_packet_data(seq, 1_000_000) else {
                break;
            };
            tx.record_sent_packet(seq, &data);
            rx.process_packet_data(&data, seq);
            tx.process_ack(seq);
            seq = seq.wrapping_add(1);
        }

        let mut received = Vec::new();
        while let Some(msg) = rx.receive_message() {
            received.push(msg.payload.bytes().to_vec());
        }
        assert_eq!(received, vec![vec![0], vec![1], vec![2], vec![3], vec![4]]);
        assert_eq!(tx.oldest_unacked_message_id(), tx.send_message_id);
    }

    #[test]
    fn dropped_packet_is_resent_and_order_preserved() {
        let factory = MessageFactory::new(1);
        let mut tx = channel();
        let mut rx = channel();
        for i in 0..5u8 {
            tx.send_message(factory.create_regular(0, vec![i]).unwrap()).unwrap();
        }

        // first packet generated but dropped (never delivered, never acked)
        let (first, _) = tx.get_packet_data(0, 1_000_000).unwrap();
        tx.record_sent_packet(0, &first);
        // simulate time passing so resend timer allows another send
        tx.advance_time(1.0);

        let mut seq = 1u16;
        loop {
            let Some((data, _)) = tx.get_packet_data(seq, 1_000_000) else {
                break;
            };
            tx.record_sent_packet(seq, &data);
            rx.process_packet_data(&data, seq);
            tx.process_ack(seq);
            seq = seq.wrapping_add(1);
            if seq > 10 {
                break;
            }
        }

        let mut received = Vec::new();
        while let Some(msg) = rx.receive_message() {
            received.push(msg.payload.bytes().to_vec());
        }
        assert_eq!(received, vec![vec![0], vec![1], vec![2], vec![3], vec![4]]);
    }

    #[test]
    fn block_message_roundtrip() {
        let factory = MessageFactory::new(1);
        let mut config = ChannelConfig::default();
        config.block_fragment_size = 4;
        config.block_fragment_resend_time = 0.0;
        let mut tx = ReliableOrderedChannel::new(0, config);
        let mut rx = ReliableOrderedChannel::new(0, config);

        let payload: Vec<u8> = (0..10u8).collect();
        let msg = factory.create_block(0, payload.clone()).unwrap();
        tx.send_message(msg).unwrap();

        let mut seq = 0u16;
        while tx.has_messages_to_send() {
            let Some((data, _)) = tx.get_packet_data(seq, 1_000_000) else {
                break;
            };
            tx.record_sent_packet(seq, &data);
            rx.process_packet_data(&data, seq);
            tx.process_ack(seq);
            seq = seq.wrapping_add(1);
            if seq > 20 {
                break;
            }
        }

        let received = rx.receive_message().expect("block message delivered");
        assert_eq!(received.payload.bytes(), payload.as_slice());
    }
}
