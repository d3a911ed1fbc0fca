//! Unreliable-unordered channel (§4.7): two fixed-capacity ring queues,
//! best-effort delivery under a packet byte budget, no resend.

use std::collections::VecDeque;

use tracing::trace;

use crate::config::ChannelConfig;
use crate::error::ChannelError;
use crate::message::Message;

use super::{Channel, ChannelPacketData, ChannelPacketPayload};

const MESSAGE_HEADER_BITS: usize = 16;

/// See the module documentation.
pub struct UnreliableUnorderedChannel {
    channel_index: u16,
    config: ChannelConfig,
    error: Option<ChannelError>,
    time: f64,
    send_queue: VecDeque<Message>,
    receive_queue: VecDeque<Message>,
    messages_sent: u64,
    messages_received: u64,
    messages_dropped: u64,
}

impl UnreliableUnorderedChannel {
    #[must_use]
    pub fn new(channel_index: u16, config: ChannelConfig) -> Self {
        Self {
            channel_index,
            config,
            error: None,
            time: 0.0,
            send_queue: VecDeque::new(),
            receive_queue: VecDeque::new(),
            messages_sent: 0,
            messages_received: 0,
            messages_dropped: 0,
        }
    }

    #[must_use]
    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped
    }
}

impl Channel for UnreliableUnorderedChannel {
    fn reset(&mut self) {
        let config = self.config;
        *self = Self::new(self.channel_index, config);
    }

    fn can_send_message(&self) -> bool {
        self.error.is_none()
            && self.send_queue.len() < self.config.message_send_queue_size as usize
    }

    fn has_messages_to_send(&self) -> bool {
        !self.send_queue.is_empty()
    }

    fn send_message(&mut self, message: Message) -> Result<(), ChannelError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        if !self.can_send_message() {
            self.error = Some(ChannelError::SendQueueFull);
            return Err(ChannelError::SendQueueFull);
        }
        self.send_queue.push_back(message);
        self.messages_sent += 1;
        Ok(())
    }

    fn receive_message(&mut self) -> Option<Message> {
        let msg = self.receive_queue.pop_front();
        if msg.is_some() {
            self.messages_received += 1;
        }
        msg
    }

    fn advance_time(&mut self, time: f64) {
        self.time = time;
    }

    fn get_packet_data(
        &mut self,
        _packet_sequence: u16,
        available_bits: usize,
    ) -> Option<(ChannelPacketData, usize)> {
        if self.error.is_some() || self.send_queue.is_empty() {
            return None;
        }
        let mut available_bits = available_bits;
        if let Some(budget) = self.config.packet_budget {
            available_bits = available_bits.min(budget as usize * 8);
        }

        let mut messages = Vec::new();
        let mut bits_used = MESSAGE_HEADER_BITS;
        while let Some(front) = self.send_queue.front() {
            if messages.len() >= self.config.max_messages_per_packet as usize {
                break;
            }
            let needed = front.payload.bytes().len() * 8 + MESSAGE_HEADER_BITS;
            if bits_used + needed > available_bits {
                if messages.is_empty() {
                    // doesn't fit at all: drop it, matching "messages that
                    // don't fit are dropped" (§4.7)
                    self.send_queue.pop_front();
                    self.messages_dropped += 1;
                    continue;
                }
                break;
            }
            let message = self.send_queue.pop_front().unwrap();
            bits_used += needed;
            messages.push(message);
        }

        if messages.is_empty() {
            return None;
        }
        trace!(channel = self.channel_index, count = messages.len(), "unreliable messages flushed");
        Some((
            ChannelPacketData {
                channel_index: self.channel_index,
                message_failed_to_serialize: false,
                payload: ChannelPacketPayload::Messages(messages),
            },
            bits_used,
        ))
    }

    fn process_packet_data(&mut self, data: &ChannelPacketData, packet_sequence: u16) {
        if self.error.is_some() {
            return;
        }
        let ChannelPacketPayload::Messages(messages) = &data.payload else {
            return;
        };
        for message in messages {
            message.set_id(packet_sequence);
            if self.receive_queue.len() >= self.config.message_receive_queue_size as usize {
                self.messages_dropped += 1;
                continue;
            }
            self.receive_queue.push_back(message.clone());
        }
    }

    fn process_ack(&mut self, _sequence: u16) {
        // unreliable-unordered: acks are a no-op, per §4.8's Channel::ProcessAck contract
    }

    fn error_level(&self) -> Option<ChannelError> {
        self.error
    }

    fn channel_index(&self) -> u16 {
        self.channel_index
    }
}
