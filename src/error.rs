//! Error taxonomy.
//!
//! Three severities, each with a different propagation policy (see
//! `SPEC_FULL.md`): stream-local errors are returned and cause the offending
//! packet to be discarded; channel-local errors stick to the channel that
//! raised them; connection-wide errors stick to the connection and are
//! surfaced on the next `advance_time`.

use thiserror::Error;

/// Recoverable error from a single stream serialize operation.
///
/// Returned by [`crate::bitstream`] primitives and packet framing. The
/// caller discards the packet being processed; the stream itself is not
/// reused afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("stream overflow")]
    Overflow,
    #[error("serialize check failed")]
    SerializeCheckFailed,
    #[error("crc32 mismatch")]
    Crc32Mismatch,
    #[error("invalid packet type")]
    InvalidPacketType,
    #[error("packet type not allowed")]
    PacketTypeNotAllowed,
    #[error("failed to create packet")]
    CreatePacketFailed,
    #[error("failed to serialize header")]
    SerializeHeaderFailed,
    #[error("failed to serialize packet")]
    SerializePacketFailed,
}

/// Sticky per-channel error level.
///
/// Once set, the channel refuses further sends/receives: `can_send_message`
/// returns `false` and `get_packet_data` returns 0 bits written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("channel desynced")]
    Desync,
    #[error("send queue full")]
    SendQueueFull,
    #[error("blocks disabled on this channel")]
    BlocksDisabled,
    #[error("failed to serialize channel data")]
    FailedToSerialize,
    #[error("out of memory")]
    OutOfMemory,
}

/// Sticky connection-wide error, aggregated from channel/allocator/message
/// factory errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("a channel errored: {0}")]
    Channel(ChannelError),
    #[error("allocator out of memory")]
    Allocator,
    #[error("message factory error")]
    MessageFactory,
    #[error("failed to read connection packet")]
    ReadPacketFailed,
}

impl From<ChannelError> for ConnectionError {
    fn from(e: ChannelError) -> Self {
        Self::Channel(e)
    }
}
