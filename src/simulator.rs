//! Network condition simulator (§6 `networkSimulator`): an optional
//! collaborator that sits between the socket and the rest of the stack,
//! injecting latency, jitter, packet loss, and duplication for local
//! testing. Its contract is specified, its implementation is trivial
//! (§1) — grounded on `network2.h`'s `Simulator` and on the teacher's
//! condition-injection helpers used in its transport test harness.

use std::collections::BinaryHeap;
use std::cmp::Ordering;
use std::net::SocketAddr;

use rand::Rng;

/// Latency/jitter/loss/duplication parameters. All probabilities are in
/// `[0.0, 1.0]`; latency and jitter are in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatorConfig {
    pub latency: f64,
    pub jitter: f64,
    pub packet_loss: f64,
    pub duplicate_chance: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            latency: 0.0,
            jitter: 0.0,
            packet_loss: 0.0,
            duplicate_chance: 0.0,
        }
    }
}

struct PendingPacket {
    deliver_at: f64,
    to: SocketAddr,
    bytes: Vec<u8>,
}

impl PartialEq for PendingPacket {
    fn eq(&self, other: &Self) -> bool {
        self.deliver_at == other.deliver_at
    }
}
impl Eq for PendingPacket {}
impl PartialOrd for PendingPacket {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for PendingPacket {
    fn cmp(&self, other: &Self) -> Ordering {
        // reversed: BinaryHeap is a max-heap, we want the earliest delivery first
        other.deliver_at.partial_cmp(&self.deliver_at).unwrap_or(Ordering::Equal)
    }
}

/// Delays, drops, and duplicates packets passed through it before handing
/// them back to a real or loopback socket. Driven by the same external
/// tick as the rest of the endpoint (§5).
pub struct Simulator<R: Rng> {
    config: SimulatorConfig,
    rng: R,
    pending: BinaryHeap<PendingPacket>,
}

impl<R: Rng> Simulator<R> {
    #[must_use]
    pub fn new(config: SimulatorConfig, rng: R) -> Self {
        Self {
            config,
            rng,
            pending: BinaryHeap::new(),
        }
    }

    pub fn config(&self) -> SimulatorConfig {
        self.config
    }

    pub fn set_config(&mut self, config: SimulatorConfig) {
        self.config = config;
    }

    /// Feeds a packet through the simulator at time `now`; it is scheduled
    /// for later delivery, dropped, or (with `duplicate_chance`) scheduled
    /// twice.
    pub fn send(&mut self, now: f64, to: SocketAddr, bytes: Vec<u8>) {
        if self.rng.gen_bool(self.config.packet_loss.clamp(0.0, 1.0)) {
            return;
        }
        let jitter = if self.config.jitter > 0.0 {
            self.rng.gen_range(-self.config.jitter..=self.config.jitter)
        } else {
            0.0
        };
        let deliver_at = now + (self.config.latency + jitter).max(0.0);
        self.pending.push(PendingPacket {
            deliver_at,
            to,
            bytes: bytes.clone(),
        });
        if self.rng.gen_bool(self.config.duplicate_chance.clamp(0.0, 1.0)) {
            self.pending.push(PendingPacket { deliver_at, to, bytes });
        }
    }

    /// Pops every packet whose scheduled delivery time has passed.
    pub fn drain_ready(&mut self, now: f64) -> Vec<(SocketAddr, Vec<u8>)> {
        let mut ready = Vec::new();
        while let Some(top) = self.pending.peek() {
            if top.deliver_at > now {
                break;
            }
            let packet = self.pending.pop().expect("peeked Some");
            ready.push((packet.to, packet.bytes));
        }
        ready
    }
}
