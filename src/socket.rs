//! Socket interface (§6 collaborator): non-blocking send/recv over an
//! address carrying IPv4 or IPv6 and a port. Grounded on `network2.h`'s
//! `Address`/`Socket` declarations, adapted to `std::net::SocketAddr` since
//! Rust's standard library already models the address half of this
//! interface exactly.

use std::net::SocketAddr;

/// Non-blocking packet transport. An embedder provides a real UDP socket
/// implementation; this crate only depends on the trait.
pub trait Socket {
    /// Sends `bytes` to `to`. Non-blocking: if the underlying queue is
    /// full, the packet is dropped and the implementation should count it,
    /// not block or error loudly (§5 "Suspension points").
    fn send(&mut self, to: SocketAddr, bytes: &[u8]);

    /// Returns the next ready packet, if any, without blocking.
    fn recv(&mut self) -> Option<(SocketAddr, Vec<u8>)>;
}
