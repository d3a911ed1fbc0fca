//! Connection layer (§4.8): owns one channel instance per configured
//! channel slot and multiplexes their packet data into a single
//! `ConnectionPacket`, mirroring `yojimbo_connection.h`'s `Connection`
//! class — generalized here to an arbitrary mix of
//! [`ReliableOrderedChannel`]/[`UnreliableUnorderedChannel`] instances
//! instead of the source's fixed two-channel demo configuration.

use tracing::{debug, trace, warn};

use crate::ack::AckSystem;
use crate::bitstream::{BitStream, ReadStream, WriteStream};
use crate::channel::{
    Channel, ChannelPacketData, ChannelPacketPayload, ReliableOrderedChannel,
    UnreliableUnorderedChannel,
};
use crate::config::{ChannelConfig, ChannelKind, Config};
use crate::error::{ChannelError, ConnectionError, StreamError};
use crate::message::{Message, MessageFactory};
use crate::packet::{self, PacketBody};

/// Connection packets occupy type 1 in the shared packet-type space;
/// type 0 is reserved for fragment packets (§3, [`crate::packet::FRAGMENT_PACKET_TYPE`]).
const CONNECTION_PACKET_TYPE: u16 = 1;
/// Number of distinct packet types multiplexed over one protocol id:
/// fragment (0) and connection (1).
const NUM_PACKET_TYPES: u16 = 2;

/// A conservative estimate of the connection packet header's own bits
/// (entry count range code), left as headroom before channels start
/// contributing (§4.8).
const CONSERVATIVE_PACKET_HEADER_BITS: usize = 16;
/// Conservative per-contributing-channel header overhead (channel index +
/// is-block tag), subtracted from the running budget for every channel that
/// contributes data to the packet.
const CONSERVATIVE_CHANNEL_HEADER_BITS: usize = 24;

enum ChannelSlot {
    Reliable(ReliableOrderedChannel),
    Unreliable(UnreliableUnorderedChannel),
}

impl ChannelSlot {
    fn new(index: u16, config: ChannelConfig) -> Self {
        match config.kind {
            ChannelKind::ReliableOrdered => Self::Reliable(ReliableOrderedChannel::new(index, config)),
            ChannelKind::UnreliableUnordered => {
                Self::Unreliable(UnreliableUnorderedChannel::new(index, config))
            }
        }
    }

    fn as_channel_mut(&mut self) -> &mut dyn Channel {
        match self {
            Self::Reliable(c) => c,
            Self::Unreliable(c) => c,
        }
    }

    fn as_channel(&self) -> &dyn Channel {
        match self {
            Self::Reliable(c) => c,
            Self::Unreliable(c) => c,
        }
    }
}

/// One channel's worth of data as read off, or destined for, the wire.
#[derive(Debug, Clone)]
pub struct ConnectionPacket {
    pub sequence: u16,
    pub entries: Vec<ChannelPacketData>,
}

impl PacketBody for ConnectionPacket {
    const HAS_USER_HEADER: bool = true;

    fn packet_type(&self) -> u16 {
        CONNECTION_PACKET_TYPE
    }

    fn write_body(&self, stream: &mut WriteStream) -> Result<(), StreamError> {
        write_connection_packet(stream, self)
    }

    fn read_body(stream: &mut ReadStream<'_>, _packet_type: u16) -> Result<Self, StreamError> {
        read_connection_packet(stream)
    }
}

fn write_connection_packet(
    stream: &mut WriteStream,
    packet: &ConnectionPacket,
) -> Result<(), StreamError> {
    let mut sequence = u32::from(packet.sequence);
    stream.serialize_bits(&mut sequence, 16)?;
    let mut count = packet.entries.len() as i64;
    stream.serialize_int(&mut count, 0, 255)?;
    for entry in &packet.entries {
        let mut channel_index = i64::from(entry.channel_index);
        stream.serialize_int(&mut channel_index, 0, 255)?;
        let mut is_block = entry.is_block();
        stream.serialize_bool(&mut is_block)?;
        match &entry.payload {
            ChannelPacketPayload::Messages(messages) => {
                let mut num_messages = messages.len() as i64;
                stream.serialize_int(&mut num_messages, 0, u16::MAX as i64)?;
                for message in messages {
                    let mut id = i64::from(message.id());
                    stream.serialize_int(&mut id, 0, u16::MAX as i64)?;
                    let mut message_type = i64::from(message.message_type);
                    stream.serialize_int(&mut message_type, 0, u16::MAX as i64)?;
                    let mut bytes = message.payload.bytes().to_vec();
                    let mut len = bytes.len() as i64;
                    stream.serialize_int(&mut len, 0, u32::MAX as i64)?;
                    stream.serialize_bytes(&mut bytes, bytes.len())?;
                }
            }
            ChannelPacketPayload::Block {
                message_id,
                fragment_id,
                num_fragments,
                fragment_size,
                fragment_data,
                block_message,
                message_type,
            } => {
                let mut v = i64::from(*message_id);
                stream.serialize_int(&mut v, 0, u16::MAX as i64)?;
                v = i64::from(*fragment_id);
                stream.serialize_int(&mut v, 0, u16::MAX as i64)?;
                v = i64::from(*num_fragments);
                stream.serialize_int(&mut v, 0, u16::MAX as i64)?;
                v = i64::from(*fragment_size);
                stream.serialize_int(&mut v, 0, u16::MAX as i64)?;
                let mut data = fragment_data.clone();
                stream.serialize_bytes(&mut data, data.len())?;
                let mut has_message = block_message.is_some();
                stream.serialize_bool(&mut has_message)?;
                if let Some(block_message) = block_message {
                    let mut ty = i64::from(*message_type);
                    stream.serialize_int(&mut ty, 0, u16::MAX as i64)?;
                    let mut bytes = block_message.payload.bytes().to_vec();
                    let mut len = bytes.len() as i64;
                    stream.serialize_int(&mut len, 0, u32::MAX as i64)?;
                    stream.serialize_bytes(&mut bytes, bytes.len())?;
                }
            }
        }
    }
    Ok(())
}

/// Reads one entry's channel-packet-data payload. Split out from
/// [`read_connection_packet`] so a deserialize failure partway through a
/// single entry can be caught there and turned into that entry's
/// `message_failed_to_serialize` flag (§4.6 "Failure modes") instead of
/// aborting the whole packet read.
fn read_channel_packet_payload(
    stream: &mut ReadStream<'_>,
    is_block: bool,
) -> Result<ChannelPacketPayload, StreamError> {
    if !is_block {
        let mut num_messages: i64 = 0;
        stream.serialize_int(&mut num_messages, 0, u16::MAX as i64)?;
        let mut messages = Vec::with_capacity(num_messages as usize);
        for _ in 0..num_messages {
            let mut id: i64 = 0;
            stream.serialize_int(&mut id, 0, u16::MAX as i64)?;
            let mut message_type: i64 = 0;
            stream.serialize_int(&mut message_type, 0, u16::MAX as i64)?;
            let mut len: i64 = 0;
            stream.serialize_int(&mut len, 0, u32::MAX as i64)?;
            let mut bytes = Vec::new();
            stream.serialize_bytes(&mut bytes, len as usize)?;
            let message = std::rc::Rc::new(crate::message::MessageData::rebuild_regular(
                id as u16,
                message_type as u16,
                bytes,
            ));
            messages.push(message);
        }
        Ok(ChannelPacketPayload::Messages(messages))
    } else {
        let mut message_id: i64 = 0;
        stream.serialize_int(&mut message_id, 0, u16::MAX as i64)?;
        let mut fragment_id: i64 = 0;
        stream.serialize_int(&mut fragment_id, 0, u16::MAX as i64)?;
        let mut num_fragments: i64 = 0;
        stream.serialize_int(&mut num_fragments, 0, u16::MAX as i64)?;
        let mut fragment_size: i64 = 0;
        stream.serialize_int(&mut fragment_size, 0, u16::MAX as i64)?;
        let mut fragment_data = Vec::new();
        stream.serialize_bytes(&mut fragment_data, fragment_size as usize)?;
        let mut has_message = false;
        stream.serialize_bool(&mut has_message)?;
        let mut message_type: i64 = 0;
        let block_message = if has_message {
            stream.serialize_int(&mut message_type, 0, u16::MAX as i64)?;
            let mut len: i64 = 0;
            stream.serialize_int(&mut len, 0, u32::MAX as i64)?;
            let mut bytes = Vec::new();
            stream.serialize_bytes(&mut bytes, len as usize)?;
            Some(std::rc::Rc::new(crate::message::MessageData::rebuild_block(
                message_id as u16,
                message_type as u16,
                bytes,
            )))
        } else {
            None
        };
        Ok(ChannelPacketPayload::Block {
            message_id: message_id as u16,
            fragment_id: fragment_id as u16,
            num_fragments: num_fragments as u16,
            fragment_size: fragment_size as u16,
            fragment_data,
            block_message,
            message_type: message_type as u16,
        })
    }
}

fn read_connection_packet(stream: &mut ReadStream<'_>) -> Result<ConnectionPacket, StreamError> {
    let mut sequence: u32 = 0;
    stream.serialize_bits(&mut sequence, 16)?;
    let mut count: i64 = 0;
    stream.serialize_int(&mut count, 0, 255)?;
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let mut channel_index: i64 = 0;
        stream.serialize_int(&mut channel_index, 0, 255)?;
        let mut is_block = false;
        stream.serialize_bool(&mut is_block)?;
        match read_channel_packet_payload(stream, is_block) {
            Ok(payload) => entries.push(ChannelPacketData {
                channel_index: channel_index as u16,
                message_failed_to_serialize: false,
                payload,
            }),
            Err(err) => {
                // The stream position past this point is no longer
                // trustworthy, so stop reading further entries; this one
                // is still reported to its channel so the sticky
                // `FAILED_TO_SERIALIZE` error (§4.6) actually fires instead
                // of the whole packet silently vanishing.
                warn!(channel_index = channel_index, %err, "channel entry failed to deserialize");
                entries.push(ChannelPacketData {
                    channel_index: channel_index as u16,
                    message_failed_to_serialize: true,
                    payload: ChannelPacketPayload::Messages(Vec::new()),
                });
                break;
            }
        }
    }
    Ok(ConnectionPacket {
        sequence: sequence as u16,
        entries,
    })
}

/// Drives `num_channels` channel instances through one connection's
/// lifetime (§4.8).
pub struct Connection {
    config: Config,
    channels: Vec<ChannelSlot>,
    message_factory: MessageFactory,
    error: Option<ConnectionError>,
    next_send_sequence: u16,
    acks: AckSystem,
}

impl Connection {
    #[must_use]
    pub fn new(config: Config, message_factory: MessageFactory) -> Self {
        let channels = config
            .channels
            .iter()
            .enumerate()
            .map(|(i, c)| ChannelSlot::new(i as u16, *c))
            .collect();
        let received_packets_buffer_size = config.received_packets_buffer_size;
        Self {
            config,
            channels,
            message_factory,
            error: None,
            next_send_sequence: 0,
            acks: AckSystem::new(received_packets_buffer_size),
        }
    }

    #[must_use]
    pub fn message_factory(&self) -> &MessageFactory {
        &self.message_factory
    }

    #[must_use]
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn send_message(&mut self, channel_index: u16, message: Message) -> Result<(), ChannelError> {
        self.channels[channel_index as usize]
            .as_channel_mut()
            .send_message(message)
    }

    pub fn receive_message(&mut self, channel_index: u16) -> Option<Message> {
        self.channels[channel_index as usize].as_channel_mut().receive_message()
    }

    /// Builds this tick's `ConnectionPacket` by polling every channel for
    /// packet data under a shared, shrinking bit budget (§4.8
    /// `GeneratePacket`).
    pub fn generate_packet(&mut self, packet_sequence: u16) -> ConnectionPacket {
        let mut available_bits =
            self.config.max_packet_size * 8 - CONSERVATIVE_PACKET_HEADER_BITS;
        let mut entries = Vec::new();
        for slot in &mut self.channels {
            let channel = slot.as_channel_mut();
            if available_bits <= CONSERVATIVE_CHANNEL_HEADER_BITS {
                break;
            }
            let budget = available_bits - CONSERVATIVE_CHANNEL_HEADER_BITS;
            if let Some((data, bits)) = channel.get_packet_data(packet_sequence, budget) {
                available_bits = available_bits.saturating_sub(CONSERVATIVE_CHANNEL_HEADER_BITS + bits);
                if let ChannelSlot::Reliable(reliable) = slot {
                    reliable.record_sent_packet(packet_sequence, &data);
                }
                entries.push(data);
            }
        }
        trace!(packet_sequence, contributing = entries.len(), "generated connection packet");
        ConnectionPacket { sequence: packet_sequence, entries }
    }

    /// Dispatches each entry of a received `ConnectionPacket` into its
    /// channel (§4.8 `ProcessPacket`). A read failure upstream of this call
    /// should instead set [`ConnectionError::ReadPacketFailed`] directly.
    pub fn process_packet(&mut self, packet: &ConnectionPacket, packet_sequence: u16) {
        for entry in &packet.entries {
            let Some(slot) = self.channels.get_mut(entry.channel_index as usize) else {
                warn!(channel_index = entry.channel_index, "entry for unknown channel index");
                continue;
            };
            slot.as_channel_mut().process_packet_data(entry, packet_sequence);
        }
    }

    pub fn mark_read_failed(&mut self) {
        self.error = Some(ConnectionError::ReadPacketFailed);
    }

    /// §4.8 `ProcessAcks`: for each acked sequence, notify every channel.
    pub fn process_acks(&mut self, acks: &[u16]) {
        for &sequence in acks {
            for slot in &mut self.channels {
                slot.as_channel_mut().process_ack(sequence);
            }
        }
    }

    /// Builds this tick's outgoing packet, frames it through
    /// [`crate::packet::write_packet`] with the ack bitfield riding in the
    /// optional user header (§4.2, `DESIGN.md`'s ack-transmission Open
    /// Question), and advances the send sequence.
    pub fn send_packet(&mut self) -> Result<Vec<u8>, StreamError> {
        let sequence = self.next_send_sequence;
        self.next_send_sequence = self.next_send_sequence.wrapping_add(1);
        let packet = self.generate_packet(sequence);
        let header = self
            .acks
            .generate_header()
            .map(|(ack, ack_bits)| AckSystem::encode(ack, ack_bits));
        packet::write_packet(
            self.config.protocol_id,
            self.config.prefix_bytes,
            NUM_PACKET_TYPES,
            &packet,
            header.as_ref().map(|h| h.as_slice()),
        )
    }

    /// Reads a framed packet produced by [`Connection::send_packet`],
    /// marks its sequence received, processes any acks the peer's header
    /// carried, and dispatches its channel entries (§4.8 `ProcessPacket`).
    pub fn receive_packet(&mut self, bytes: &[u8]) {
        let result = packet::read_packet::<ConnectionPacket>(
            self.config.protocol_id,
            self.config.prefix_bytes,
            NUM_PACKET_TYPES,
            bytes,
        );
        let Ok((packet, header)) = result else {
            self.mark_read_failed();
            return;
        };
        self.acks.mark_received(packet.sequence);
        if let Some(header) = header {
            if let Some((ack, ack_bits)) = AckSystem::decode(&header) {
                let acked = AckSystem::acked_sequences(ack, ack_bits);
                self.process_acks(&acked);
            }
        }
        self.process_packet(&packet, packet.sequence);
    }

    /// §4.8 `AdvanceTime`: ticks every channel, then promotes the first
    /// channel error found into the connection-wide error level.
    pub fn advance_time(&mut self, time: f64) {
        for slot in &mut self.channels {
            slot.as_channel_mut().advance_time(time);
        }
        if self.error.is_none() {
            for slot in &self.channels {
                if let Some(err) = slot.as_channel().error_level() {
                    debug!(channel_index = slot.as_channel().channel_index(), %err, "channel error promoted to connection");
                    self.error = Some(err.into());
                    break;
                }
            }
        }
    }

    #[must_use]
    pub fn error_level(&self) -> Option<ConnectionError> {
        self.error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelConfig;

    fn test_config() -> Config {
        let mut config = Config::new(99);
        config.channels.push(ChannelConfig::default());
        config.channels.push(ChannelConfig {
            kind: ChannelKind::UnreliableUnordered,
            ..ChannelConfig::default()
        });
        config
    }

    #[test]
    fn round_trips_a_reliable_message_through_the_wire() {
        let config = test_config();
        let factory = MessageFactory::new(1);
        let mut sender = Connection::new(config.clone(), factory);
        let mut receiver = Connection::new(config, factory);

        let msg = factory.create_regular(0, vec![1, 2, 3]).unwrap();
        sender.send_message(0, msg).unwrap();

        let bytes = sender.send_packet().unwrap();
        receiver.receive_packet(&bytes);

        let received = receiver.receive_message(0).unwrap();
        assert_eq!(received.payload.bytes(), &[1, 2, 3]);
    }

    #[test]
    fn peers_ack_each_others_packets() {
        let config = test_config();
        let factory = MessageFactory::new(1);
        let mut a = Connection::new(config.clone(), factory);
        let mut b = Connection::new(config, factory);

        let msg = factory.create_regular(0, vec![9]).unwrap();
        a.send_message(0, msg).unwrap();

        let first = a.send_packet().unwrap();
        b.receive_packet(&first);
        // b's next outgoing packet's header now acks `first`'s sequence.
        let reply = b.send_packet().unwrap();
        a.receive_packet(&reply);

        let ChannelSlot::Reliable(reliable) = &a.channels[0] else {
            panic!("channel 0 is reliable");
        };
        assert_eq!(reliable.oldest_unacked_message_id(), 1);
    }

    #[test]
    fn unknown_channel_index_is_ignored_not_fatal() {
        let config = test_config();
        let factory = MessageFactory::new(1);
        let mut connection = Connection::new(config, factory);
        let bogus = ConnectionPacket {
            sequence: 0,
            entries: vec![ChannelPacketData {
                channel_index: 99,
                message_failed_to_serialize: false,
                payload: ChannelPacketPayload::Messages(vec![]),
            }],
        };
        connection.process_packet(&bogus, 0);
        assert!(connection.error_level().is_none());
    }
}
