//! End-to-end handshake scenarios (§8): multiple concurrent clients,
//! graceful disconnect, and keep-alive timeout, driven through the public
//! `HandshakeServer`/`HandshakeClient`/`ServerEndpoint` API.

use std::net::SocketAddr;

use bitrelay::handshake::DenyReason;
use bitrelay::{
    ChannelConfig, Config, HandshakeClient, HandshakeConfig, HandshakePacket, HandshakeServer,
    MessageFactory, ServerEndpoint,
};

/// Drives `client` to completion against `server`, returning the final tick
/// and the `client_salt` the client settled on (needed by tests that later
/// forge a handshake packet claiming to be the same client).
fn connect(client: &mut HandshakeClient, server: &mut HandshakeServer, from: SocketAddr, mut now: f64) -> (f64, u64) {
    client.connect(now);
    let mut client_salt = None;
    loop {
        if let Some(packet) = client.generate_packet(now) {
            if let HandshakePacket::ConnectionRequest { client_salt: salt } = packet {
                client_salt = Some(salt);
            }
            if let Some(reply) = server.on_packet(from, packet, now) {
                client.on_packet(reply, now);
            }
        }
        client.advance_time(now);
        if client.state().is_connected() || client.state().connection_failed() {
            break;
        }
        now += 0.05;
        assert!(now < 30.0, "handshake should converge well within its timeouts");
    }
    (now, client_salt.expect("client must have sent at least one connection request"))
}

#[test]
fn two_clients_connect_concurrently_without_interfering() {
    let mut server = HandshakeServer::new(HandshakeConfig::default(), 0x1234);
    let mut alice = HandshakeClient::new(HandshakeConfig::default());
    let mut bob = HandshakeClient::new(HandshakeConfig::default());
    let alice_addr: SocketAddr = "127.0.0.1:5001".parse().unwrap();
    let bob_addr: SocketAddr = "127.0.0.1:5002".parse().unwrap();

    connect(&mut alice, &mut server, alice_addr, 0.0);
    connect(&mut bob, &mut server, bob_addr, 0.0);

    assert!(alice.state().is_connected());
    assert!(bob.state().is_connected());
    let mut connected = server.connected_addresses();
    connected.sort();
    let mut expected = vec![alice_addr, bob_addr];
    expected.sort();
    assert_eq!(connected, expected);
}

#[test]
fn reconnect_attempt_from_an_already_connected_client_is_denied() {
    let mut server = HandshakeServer::new(HandshakeConfig::default(), 0xBEEF);
    let mut client = HandshakeClient::new(HandshakeConfig::default());
    let addr: SocketAddr = "127.0.0.1:6000".parse().unwrap();
    let (_, client_salt) = connect(&mut client, &mut server, addr, 0.0);
    assert!(client.state().is_connected());

    let second_request = HandshakePacket::ConnectionRequest { client_salt };
    let denial = server.on_packet(addr, second_request, 1.0).unwrap();
    assert_eq!(
        denial,
        HandshakePacket::ConnectionDenied {
            client_salt,
            reason: DenyReason::AlreadyConnected,
        }
    );
}

#[test]
fn server_endpoint_evicts_connection_state_after_keep_alive_timeout() {
    let handshake_config = HandshakeConfig {
        keep_alive_time_out: 2.0,
        ..HandshakeConfig::default()
    };
    let mut config = Config::new(0x5EED);
    config.channels.push(ChannelConfig::default());
    let mut server = ServerEndpoint::new(config, handshake_config, 0x9999, MessageFactory::new(1));
    let mut client = HandshakeClient::new(handshake_config);
    let addr: SocketAddr = "127.0.0.1:7000".parse().unwrap();

    client.connect(0.0);
    let mut now = 0.0;
    loop {
        if let Some(packet) = client.generate_packet(now) {
            if let Some(reply) = server.on_handshake_packet(addr, packet, now) {
                client.on_packet(reply, now);
            }
        }
        client.advance_time(now);
        if client.state().is_connected() {
            break;
        }
        now += 0.05;
        assert!(now < 30.0);
    }
    assert!(server.connection_mut(addr).is_some());

    // the client stops sending keep-alives; the server should evict it
    // once `keep_alive_time_out` elapses.
    server.advance_time(now + handshake_config.keep_alive_time_out + 0.1);
    assert!(server.connection_mut(addr).is_none());
    assert!(server.connected_addresses().is_empty());
}
