//! Server / client connection handshake (§4.9).
//!
//! A minimal UDP handshake carried as distinct packet types over the same
//! framer as connection traffic: `CONNECTION_REQUEST` / `DENIED` /
//! `CHALLENGE` / `RESPONSE` / `KEEP_ALIVE` / `DISCONNECT`. Grounded on
//! `006_client_server.cpp`'s state machine and `murmur_hash_64`, and on the
//! teacher's session/slot bookkeeping shape for per-peer timeout tracking.
//! Token encryption from the original connect-token design is explicitly
//! out of scope (§1); this is the salt-based variant only.

use std::net::SocketAddr;

use rand::RngCore;
use tracing::{debug, info, warn};

/// Murmur2 64-bit hash (`murmur_hash_64`, seed-parameterized), used to key
/// the server's challenge table. Ported directly from `protocol2.h`.
#[must_use]
pub fn murmur_hash_64(key: &[u8], seed: u64) -> u64 {
    const M: u64 = 0xc6a4_a793_5bd1_e995;
    const R: u32 = 47;

    let len = key.len() as u64;
    let mut h = seed ^ len.wrapping_mul(M);

    let chunks = key.chunks_exact(8);
    let remainder = chunks.remainder();
    for chunk in chunks {
        let mut k = u64::from_le_bytes(chunk.try_into().expect("chunks_exact(8)"));
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h ^= k;
        h = h.wrapping_mul(M);
    }

    if !remainder.is_empty() {
        let mut tail = [0u8; 8];
        tail[..remainder.len()].copy_from_slice(remainder);
        let mut k = u64::from_le_bytes(tail);
        // only the bytes actually present contribute, matching the
        // fallthrough-switch behavior of the source's byte-at-a-time tail
        k &= (1u64 << (remainder.len() * 8)) - 1;
        h ^= k;
        h = h.wrapping_mul(M);
    }

    h ^= h >> R;
    h = h.wrapping_mul(M);
    h ^= h >> R;
    h
}

fn hash_address(addr: SocketAddr) -> u64 {
    match addr {
        SocketAddr::V4(a) => murmur_hash_64(&a.ip().octets(), 0),
        SocketAddr::V6(a) => murmur_hash_64(&a.ip().octets(), 0),
    }
    ^ murmur_hash_64(&addr.port().to_le_bytes(), 0)
}

/// Distinct packet types carried over the handshake, before a peer is fully
/// connected (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePacket {
    ConnectionRequest { client_salt: u64 },
    ConnectionDenied { client_salt: u64, reason: DenyReason },
    ConnectionChallenge { client_salt: u64, challenge_salt: u64 },
    ConnectionResponse { client_salt: u64, challenge_salt: u64 },
    ConnectionKeepAlive { client_salt: u64, challenge_salt: u64 },
    ConnectionDisconnect { client_salt: u64, challenge_salt: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    ServerFull,
    AlreadyConnected,
}

/// Timing knobs for the handshake state machines. No concrete defaults
/// are enumerated in the base configuration table (§6); these match the
/// constants used by `original_source`'s reference client/server demo
/// (see `DESIGN.md`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HandshakeConfig {
    pub challenge_hash_size: usize,
    pub challenge_time_out: f64,
    pub challenge_send_rate: f64,
    pub connection_keep_alive_send_rate: f64,
    pub keep_alive_time_out: f64,
    pub connection_request_time_out: f64,
    pub challenge_response_time_out: f64,
    pub client_salt_timeout: f64,
    pub max_clients: usize,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            challenge_hash_size: 1024,
            challenge_time_out: 10.0,
            challenge_send_rate: 0.1,
            connection_keep_alive_send_rate: 1.0,
            keep_alive_time_out: 10.0,
            connection_request_time_out: 5.0,
            challenge_response_time_out: 5.0,
            client_salt_timeout: 1.0,
            max_clients: 32,
        }
    }
}

struct ChallengeEntry {
    key: u64,
    address: SocketAddr,
    client_salt: u64,
    challenge_salt: u64,
    created_at: f64,
    last_packet_send_time: f64,
}

struct ClientSlot {
    address: SocketAddr,
    client_salt: u64,
    challenge_salt: u64,
    last_packet_recv_time: f64,
    last_packet_send_time: f64,
}

/// Server-side handshake state: a challenge hash table (single-slot linear
/// probing, §4.9) plus a fixed pool of connected-client slots.
pub struct Server {
    config: HandshakeConfig,
    server_salt: u64,
    challenges: Vec<Option<ChallengeEntry>>,
    slots: Vec<Option<ClientSlot>>,
}

impl Server {
    #[must_use]
    pub fn new(config: HandshakeConfig, server_salt: u64) -> Self {
        let challenge_hash_size = config.challenge_hash_size;
        let max_clients = config.max_clients;
        Self {
            config,
            server_salt,
            challenges: (0..challenge_hash_size).map(|_| None).collect(),
            slots: (0..max_clients).map(|_| None).collect(),
        }
    }

    fn challenge_key(&self, address: SocketAddr, client_salt: u64) -> u64 {
        hash_address(address) ^ murmur_hash_64(&client_salt.to_le_bytes(), 0) ^ self.server_salt
    }

    fn is_connected(&self, address: SocketAddr, client_salt: u64) -> bool {
        self.slots.iter().flatten().any(|s| s.address == address && s.client_salt == client_salt)
    }

    fn free_slot_index(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.is_none())
    }

    /// Processes one incoming handshake packet from `from` at time `now`,
    /// returning the reply to send, if any (§4.9).
    pub fn on_packet(
        &mut self,
        from: SocketAddr,
        packet: HandshakePacket,
        now: f64,
    ) -> Option<HandshakePacket> {
        match packet {
            HandshakePacket::ConnectionRequest { client_salt } => {
                self.on_connection_request(from, client_salt, now)
            }
            HandshakePacket::ConnectionResponse { client_salt, challenge_salt } => {
                self.on_connection_response(from, client_salt, challenge_salt, now)
            }
            HandshakePacket::ConnectionKeepAlive { client_salt, challenge_salt }
            | HandshakePacket::ConnectionDisconnect { client_salt, challenge_salt } => {
                if let Some(slot) = self
                    .slots
                    .iter_mut()
                    .flatten()
                    .find(|s| s.address == from && s.client_salt == client_salt && s.challenge_salt == challenge_salt)
                {
                    if matches!(packet, HandshakePacket::ConnectionDisconnect { .. }) {
                        info!(%from, "client disconnected");
                        *slot = ClientSlot {
                            address: from,
                            client_salt,
                            challenge_salt,
                            last_packet_recv_time: now,
                            last_packet_send_time: now,
                        };
                    } else {
                        slot.last_packet_recv_time = now;
                    }
                }
                None
            }
            HandshakePacket::ConnectionDenied { .. } | HandshakePacket::ConnectionChallenge { .. } => {
                warn!(%from, "received server-originated packet type at server");
                None
            }
        }
    }

    fn on_connection_request(
        &mut self,
        from: SocketAddr,
        client_salt: u64,
        now: f64,
    ) -> Option<HandshakePacket> {
        if self.is_connected(from, client_salt) {
            return Some(HandshakePacket::ConnectionDenied {
                client_salt,
                reason: DenyReason::AlreadyConnected,
            });
        }
        if self.free_slot_index().is_none() {
            return Some(HandshakePacket::ConnectionDenied {
                client_salt,
                reason: DenyReason::ServerFull,
            });
        }

        let key = self.challenge_key(from, client_salt);
        let index = (key as usize) % self.challenges.len();
        let needs_insert = match &self.challenges[index] {
            Some(entry) => entry.key != key,
            None => true,
        };
        if needs_insert {
            let mut salt_bytes = [0u8; 8];
            rand::thread_rng().fill_bytes(&mut salt_bytes);
            self.challenges[index] = Some(ChallengeEntry {
                key,
                address: from,
                client_salt,
                challenge_salt: u64::from_le_bytes(salt_bytes),
                created_at: now,
                last_packet_send_time: f64::NEG_INFINITY,
            });
        }

        let entry = self.challenges[index].as_mut().expect("just inserted or already present");
        if now - entry.last_packet_send_time < self.config.challenge_send_rate {
            return None;
        }
        entry.last_packet_send_time = now;
        debug!(%from, client_salt, "sending connection challenge");
        Some(HandshakePacket::ConnectionChallenge {
            client_salt,
            challenge_salt: entry.challenge_salt,
        })
    }

    fn on_connection_response(
        &mut self,
        from: SocketAddr,
        client_salt: u64,
        challenge_salt: u64,
        now: f64,
    ) -> Option<HandshakePacket> {
        if let Some(slot) = self
            .slots
            .iter_mut()
            .flatten()
            .find(|s| s.address == from && s.client_salt == client_salt)
        {
            if now - slot.last_packet_send_time >= self.config.connection_keep_alive_send_rate {
                slot.last_packet_send_time = now;
                return Some(HandshakePacket::ConnectionKeepAlive { client_salt, challenge_salt });
            }
            return None;
        }

        let key = self.challenge_key(from, client_salt);
        let index = (key as usize) % self.challenges.len();
        let matches = match &self.challenges[index] {
            Some(entry) => {
                entry.key == key
                    && entry.address == from
                    && entry.client_salt == client_salt
                    && entry.challenge_salt == challenge_salt
                    && now - entry.created_at < self.config.challenge_time_out
            }
            None => false,
        };
        if !matches {
            warn!(%from, "dropping response: no matching challenge");
            return None;
        }

        let Some(slot_index) = self.free_slot_index() else {
            return Some(HandshakePacket::ConnectionDenied {
                client_salt,
                reason: DenyReason::ServerFull,
            });
        };
        self.challenges[index] = None;
        self.slots[slot_index] = Some(ClientSlot {
            address: from,
            client_salt,
            challenge_salt,
            last_packet_recv_time: now,
            last_packet_send_time: now,
        });
        info!(%from, slot_index, "client connected");
        Some(HandshakePacket::ConnectionKeepAlive { client_salt, challenge_salt })
    }

    /// Expires challenge entries and disconnects slots that missed
    /// `keep_alive_time_out` (§4.9, §5 "Timeouts are polled in
    /// `advance_time`").
    pub fn advance_time(&mut self, now: f64) {
        for entry in &mut self.challenges {
            if let Some(e) = entry {
                if now - e.created_at >= self.config.challenge_time_out {
                    *entry = None;
                }
            }
        }
        for slot in &mut self.slots {
            if let Some(s) = slot {
                if now - s.last_packet_recv_time >= self.config.keep_alive_time_out {
                    info!(address = %s.address, "client timed out");
                    *slot = None;
                }
            }
        }
    }

    #[must_use]
    pub fn connected_addresses(&self) -> Vec<SocketAddr> {
        self.slots.iter().flatten().map(|s| s.address).collect()
    }
}

/// Client-side handshake state machine (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    SendingConnectionRequest,
    SendingChallengeResponse,
    Connected,
    ConnectionRequestTimedOut,
    ChallengeResponseTimedOut,
    KeepAliveTimedOut,
    ConnectionDeniedFull,
    ConnectionDeniedAlreadyConnected,
}

impl ClientState {
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    #[must_use]
    pub fn connection_failed(self) -> bool {
        matches!(
            self,
            Self::ConnectionRequestTimedOut
                | Self::ChallengeResponseTimedOut
                | Self::KeepAliveTimedOut
                | Self::ConnectionDeniedFull
                | Self::ConnectionDeniedAlreadyConnected
        )
    }
}

pub struct Client {
    config: HandshakeConfig,
    state: ClientState,
    client_salt: u64,
    challenge_salt: u64,
    state_entered_at: f64,
    last_salt_regen_at: f64,
    last_packet_send_time: f64,
    last_packet_recv_time: f64,
}

impl Client {
    #[must_use]
    pub fn new(config: HandshakeConfig) -> Self {
        Self {
            config,
            state: ClientState::Disconnected,
            client_salt: Self::random_salt(),
            challenge_salt: 0,
            state_entered_at: 0.0,
            last_salt_regen_at: 0.0,
            last_packet_send_time: f64::NEG_INFINITY,
            last_packet_recv_time: 0.0,
        }
    }

    fn random_salt() -> u64 {
        let mut bytes = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut bytes);
        u64::from_le_bytes(bytes)
    }

    #[must_use]
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// Begins connecting; transitions to `SendingConnectionRequest`.
    pub fn connect(&mut self, now: f64) {
        self.client_salt = Self::random_salt();
        self.state = ClientState::SendingConnectionRequest;
        self.state_entered_at = now;
        self.last_salt_regen_at = now;
        self.last_packet_send_time = f64::NEG_INFINITY;
        self.last_packet_recv_time = now;
    }

    /// Returns the packet to (re)send this tick, if the send-rate timer
    /// allows it, and advances the salt-regeneration timer.
    pub fn generate_packet(&mut self, now: f64) -> Option<HandshakePacket> {
        match self.state {
            ClientState::SendingConnectionRequest => {
                if now - self.last_salt_regen_at >= self.config.client_salt_timeout {
                    self.client_salt = Self::random_salt();
                    self.last_salt_regen_at = now;
                }
                if now - self.last_packet_send_time < self.config.challenge_send_rate {
                    return None;
                }
                self.last_packet_send_time = now;
                Some(HandshakePacket::ConnectionRequest { client_salt: self.client_salt })
            }
            ClientState::SendingChallengeResponse => {
                if now - self.last_packet_send_time < self.config.connection_keep_alive_send_rate {
                    return None;
                }
                self.last_packet_send_time = now;
                Some(HandshakePacket::ConnectionResponse {
                    client_salt: self.client_salt,
                    challenge_salt: self.challenge_salt,
                })
            }
            ClientState::Connected => {
                if now - self.last_packet_send_time < self.config.connection_keep_alive_send_rate {
                    return None;
                }
                self.last_packet_send_time = now;
                Some(HandshakePacket::ConnectionKeepAlive {
                    client_salt: self.client_salt,
                    challenge_salt: self.challenge_salt,
                })
            }
            _ => None,
        }
    }

    pub fn on_packet(&mut self, packet: HandshakePacket, now: f64) {
        match (self.state, packet) {
            (ClientState::SendingConnectionRequest, HandshakePacket::ConnectionChallenge { client_salt, challenge_salt })
                if client_salt == self.client_salt =>
            {
                self.challenge_salt = challenge_salt;
                self.state = ClientState::SendingChallengeResponse;
                self.state_entered_at = now;
                self.last_packet_send_time = f64::NEG_INFINITY;
                self.last_packet_recv_time = now;
            }
            (
                ClientState::SendingConnectionRequest | ClientState::SendingChallengeResponse,
                HandshakePacket::ConnectionDenied { client_salt, reason },
            ) if client_salt == self.client_salt => {
                self.state = match reason {
                    DenyReason::ServerFull => ClientState::ConnectionDeniedFull,
                    DenyReason::AlreadyConnected => ClientState::ConnectionDeniedAlreadyConnected,
                };
                self.state_entered_at = now;
            }
            (
                ClientState::SendingChallengeResponse,
                HandshakePacket::ConnectionKeepAlive { client_salt, challenge_salt },
            ) if client_salt == self.client_salt && challenge_salt == self.challenge_salt => {
                self.state = ClientState::Connected;
                self.state_entered_at = now;
                self.last_packet_recv_time = now;
            }
            (
                ClientState::Connected,
                HandshakePacket::ConnectionKeepAlive { client_salt, challenge_salt },
            ) if client_salt == self.client_salt && challenge_salt == self.challenge_salt => {
                self.last_packet_recv_time = now;
            }
            (ClientState::Connected, HandshakePacket::ConnectionDisconnect { client_salt, .. })
                if client_salt == self.client_salt =>
            {
                self.state = ClientState::Disconnected;
                self.state_entered_at = now;
            }
            _ => {}
        }
    }

    /// Polls state-machine timeouts (§4.9, §5).
    pub fn advance_time(&mut self, now: f64) {
        match self.state {
            ClientState::SendingConnectionRequest => {
                if now - self.state_entered_at >= self.config.connection_request_time_out {
                    self.state = ClientState::ConnectionRequestTimedOut;
                }
            }
            ClientState::SendingChallengeResponse => {
                if now - self.state_entered_at >= self.config.challenge_response_time_out {
                    self.state = ClientState::ChallengeResponseTimedOut;
                }
            }
            ClientState::Connected => {
                if now - self.last_packet_recv_time >= self.config.keep_alive_time_out {
                    self.state = ClientState::KeepAliveTimedOut;
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn murmur_hash_is_deterministic_and_sensitive_to_input() {
        let a = murmur_hash_64(b"hello world", 0);
        let b = murmur_hash_64(b"hello world", 0);
        let c = murmur_hash_64(b"hello worle", 0);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn murmur_hash_handles_all_tail_lengths() {
        for len in 0..16usize {
            let data = vec![0xABu8; len];
            let _ = murmur_hash_64(&data, 7);
        }
    }

    #[test]
    fn handshake_happy_path_connects_client() {
        let from: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        let mut server = Server::new(HandshakeConfig::default(), 0xDEAD_BEEF);
        let mut client = Client::new(HandshakeConfig::default());

        client.connect(0.0);
        let request = client.generate_packet(0.0).unwrap();
        let challenge = server.on_packet(from, request, 0.0).unwrap();
        client.on_packet(challenge, 0.1);
        assert_eq!(client.state(), ClientState::SendingChallengeResponse);

        let response = client.generate_packet(0.1).unwrap();
        let keep_alive = server.on_packet(from, response, 0.1).unwrap();
        client.on_packet(keep_alive, 0.2);

        assert_eq!(client.state(), ClientState::Connected);
        assert_eq!(server.connected_addresses(), vec![from]);
    }

    #[test]
    fn second_client_rejected_when_server_full() {
        let config = HandshakeConfig {
            max_clients: 1,
            ..HandshakeConfig::default()
        };
        let mut server = Server::new(config, 1);
        let addr1: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let addr2: SocketAddr = "127.0.0.1:2".parse().unwrap();

        let challenge1 = server
            .on_packet(addr1, HandshakePacket::ConnectionRequest { client_salt: 1 }, 0.0)
            .unwrap();
        let HandshakePacket::ConnectionChallenge { challenge_salt, .. } = challenge1 else {
            panic!("expected challenge");
        };
        server
            .on_packet(
                addr1,
                HandshakePacket::ConnectionResponse { client_salt: 1, challenge_salt },
                0.0,
            )
            .unwrap();

        let denied = server
            .on_packet(addr2, HandshakePacket::ConnectionRequest { client_salt: 2 }, 0.0)
            .unwrap();
        assert_eq!(
            denied,
            HandshakePacket::ConnectionDenied { client_salt: 2, reason: DenyReason::ServerFull }
        );
    }

    #[test]
    fn client_request_times_out_without_a_challenge() {
        let mut client = Client::new(HandshakeConfig::default());
        client.connect(0.0);
        client.advance_time(4.9);
        assert_eq!(client.state(), ClientState::SendingConnectionRequest);
        client.advance_time(5.1);
        assert_eq!(client.state(), ClientState::ConnectionRequestTimedOut);
    }
}
