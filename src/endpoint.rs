//! Ties the handshake state machine (§4.9) to per-client connection state
//! (§4.8): once the server admits a client, its [`Connection`] is created
//! and looked up by address on every subsequent tick. Grounded on
//! `006_client_server.cpp`'s `Server` class, which keeps exactly this
//! pairing (a `ServerChallengeHash` plus per-slot connection data) but
//! flattens the slot array into an address-keyed map, since this crate's
//! `Connection` is already a heap-allocated, independently sized object
//! rather than a fixed per-slot struct field.

use std::net::SocketAddr;

use ahash::AHashMap;
use tracing::info;

use crate::config::Config;
use crate::connection::Connection;
use crate::handshake::{HandshakeConfig, HandshakePacket, Server as HandshakeServer};
use crate::message::MessageFactory;

/// A server endpoint: handshake admission plus one [`Connection`] per
/// admitted client address.
pub struct ServerEndpoint {
    handshake: HandshakeServer,
    config: Config,
    message_factory: MessageFactory,
    connections: AHashMap<SocketAddr, Connection>,
}

impl ServerEndpoint {
    #[must_use]
    pub fn new(config: Config, handshake_config: HandshakeConfig, server_salt: u64, message_factory: MessageFactory) -> Self {
        Self {
            handshake: HandshakeServer::new(handshake_config, server_salt),
            config,
            message_factory,
            connections: AHashMap::default(),
        }
    }

    /// Feeds one incoming handshake packet to the admission state machine,
    /// creating a fresh `Connection` the moment a client is newly admitted.
    pub fn on_handshake_packet(
        &mut self,
        from: SocketAddr,
        packet: HandshakePacket,
        now: f64,
    ) -> Option<HandshakePacket> {
        let was_connected = self.connections.contains_key(&from);
        let reply = self.handshake.on_packet(from, packet, now);
        if !was_connected && self.handshake.connected_addresses().contains(&from) {
            info!(%from, "provisioning connection state for newly admitted client");
            self.connections.insert(
                from,
                Connection::new(self.config.clone(), self.message_factory),
            );
        }
        reply
    }

    pub fn connection_mut(&mut self, from: SocketAddr) -> Option<&mut Connection> {
        self.connections.get_mut(&from)
    }

    /// Advances the handshake state machine and every admitted client's
    /// connection, dropping connection state for any address the handshake
    /// layer has timed out (§4.9 `KeepAliveTimeOut`, §5).
    pub fn advance_time(&mut self, now: f64) {
        self.handshake.advance_time(now);
        let still_connected: std::collections::HashSet<SocketAddr> =
            self.handshake.connected_addresses().into_iter().collect();
        self.connections.retain(|addr, _| still_connected.contains(addr));
        for connection in self.connections.values_mut() {
            connection.advance_time(now);
        }
    }

    #[must_use]
    pub fn connected_addresses(&self) -> Vec<SocketAddr> {
        self.handshake.connected_addresses()
    }
}
