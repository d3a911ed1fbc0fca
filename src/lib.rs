//! Core of a UDP-based realtime networking library for action games: a
//! bit-packed wire serialization layer, packet fragmentation and
//! reassembly, and per-connection channels multiplexing application
//! messages with either reliable-ordered or unreliable-unordered delivery
//! semantics, plus the salt-based connection handshake that precedes
//! channel traffic.
//!
//! Socket I/O, token encryption, cryptographic primitives, and the TLSF
//! heap variant are external collaborators; this crate only depends on
//! their interfaces ([`socket::Socket`], [`allocator::Allocator`]).

pub mod ack;
pub mod allocator;
pub mod bit_array;
pub mod bitstream;
pub mod channel;
pub mod chunk;
pub mod config;
pub mod connection;
pub mod crc;
pub mod endpoint;
pub mod error;
pub mod fragment;
pub mod handshake;
pub mod message;
pub mod packet;
pub mod seq;
pub mod seq_buffer;
pub mod simulator;
pub mod socket;

pub use channel::{Channel, ChannelPacketData, ChannelPacketPayload, ReliableOrderedChannel, UnreliableUnorderedChannel};
pub use config::{ChannelConfig, ChannelKind, Config, ConfigError};
pub use connection::{Connection, ConnectionPacket};
pub use endpoint::ServerEndpoint;
pub use error::{ChannelError, ConnectionError, StreamError};
pub use handshake::{Client as HandshakeClient, ClientState, HandshakeConfig, HandshakePacket, Server as HandshakeServer};
pub use message::{Message, MessageFactory, MessagePayload};
