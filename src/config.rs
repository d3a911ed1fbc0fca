//! Configuration, per §6's table, plus the two divisibility invariants the
//! base spec calls out (buffer sizes must divide 65536 so sequence
//! wraparound lines up with slot wraparound).

use thiserror::Error;

/// Raised when a [`Config`] or [`ChannelConfig`] violates a divisibility or
/// range invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{field} ({value}) must divide 65536")]
    MustDivide65536 { field: &'static str, value: u32 },
    #[error("{field} must be nonzero")]
    MustBeNonzero { field: &'static str },
}

fn check_divides_65536(field: &'static str, value: u32) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::MustBeNonzero { field });
    }
    if 65536 % value != 0 {
        return Err(ConfigError::MustDivide65536 { field, value });
    }
    Ok(())
}

/// Which delivery semantics a channel slot uses (§4.6, §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelKind {
    #[default]
    ReliableOrdered,
    UnreliableUnordered,
}

/// Per-channel configuration (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    pub kind: ChannelKind,
    pub sent_packet_buffer_size: u32,
    pub message_send_queue_size: u32,
    pub message_receive_queue_size: u32,
    pub max_messages_per_packet: u32,
    /// Byte budget for this channel's share of a packet; `None` = unlimited.
    pub packet_budget: Option<u32>,
    pub max_block_size: u32,
    pub block_fragment_size: u32,
    pub message_resend_time: f64,
    pub block_fragment_resend_time: f64,
    pub disable_blocks: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            kind: ChannelKind::ReliableOrdered,
            sent_packet_buffer_size: 1024,
            message_send_queue_size: 1024,
            message_receive_queue_size: 1024,
            max_messages_per_packet: 256,
            packet_budget: None,
            max_block_size: 256 * 1024,
            block_fragment_size: 1024,
            message_resend_time: 0.1,
            block_fragment_resend_time: 0.25,
            disable_blocks: false,
        }
    }
}

impl ChannelConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_divides_65536("sentPacketBufferSize", self.sent_packet_buffer_size)?;
        check_divides_65536("messageSendQueueSize", self.message_send_queue_size)?;
        check_divides_65536("messageReceiveQueueSize", self.message_receive_queue_size)?;
        Ok(())
    }
}

/// Top-level protocol configuration (§6).
#[derive(Debug, Clone)]
pub struct Config {
    /// Included in the CRC; peers with a mismatched id are rejected.
    pub protocol_id: u64,
    pub max_packet_size: usize,
    pub packet_fragment_size: usize,
    pub max_packet_fragments: usize,
    pub packet_reassembly_buffer_size: usize,
    pub acked_packets_buffer_size: usize,
    pub received_packets_buffer_size: usize,
    pub fragment_packets_above: usize,
    /// Not in the §6 enumerated table but named by §4.2 step 1; an omission
    /// of the distillation rather than an exclusion (see `SPEC_FULL.md`).
    pub prefix_bytes: usize,
    pub network_simulator: bool,
    pub channels: Vec<ChannelConfig>,
}

impl Config {
    #[must_use]
    pub fn new(protocol_id: u64) -> Self {
        Self {
            protocol_id,
            max_packet_size: 8 * 1024,
            packet_fragment_size: 1024,
            max_packet_fragments: 256,
            packet_reassembly_buffer_size: 64,
            acked_packets_buffer_size: 256,
            received_packets_buffer_size: 256,
            fragment_packets_above: 1024,
            prefix_bytes: 0,
            network_simulator: true,
            channels: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for channel in &self.channels {
            channel.validate()?;
        }
        Ok(())
    }
}
