//! Standalone block streaming: Chunk sender/receiver (§4.5).
//!
//! A separate slice/ack sub-protocol layered above the packet stream,
//! distinct from the reliable-ordered channel's embedded block fields in
//! [`crate::channel::reliable`] — §2's component table lists both as
//! separate line items, and `original_source` has both a standalone demo
//! (`004_sending_large_blocks_of_data.cpp`) and the channel-embedded fields.
//! Useful when an application wants to stream one large buffer outside of
//! the channel/message system entirely (e.g. a level download alongside
//! ordinary channel traffic on the same connection).

use crate::bit_array::BitArray;

/// One outgoing slice packet.
#[derive(Debug, Clone)]
pub struct SlicePacket {
    pub chunk_id: u16,
    pub slice_id: u16,
    pub num_slices: u16,
    pub data: Vec<u8>,
}

/// An ack packet reporting which slices of `chunk_id` have been received.
#[derive(Debug, Clone)]
pub struct AckPacket {
    pub chunk_id: u16,
    pub num_slices: u16,
    pub acked: Vec<bool>,
}

/// Sends one chunk (opaque byte buffer) at a time, resending un-acked slices
/// on a fixed timer. Only one chunk may be in flight.
pub struct ChunkSender {
    slice_size: usize,
    min_resend_time: f64,
    sending: bool,
    chunk_id: u16,
    chunk_data: Vec<u8>,
    num_slices: u16,
    current_slice_id: u16,
    num_acked_slices: u16,
    acked: BitArray,
    time_last_sent: Vec<f64>,
}

impl ChunkSender {
    #[must_use]
    pub fn new(slice_size: usize, min_resend_time: f64) -> Self {
        Self {
            slice_size,
            min_resend_time,
            sending: false,
            chunk_id: 0,
            chunk_data: Vec::new(),
            num_slices: 0,
            current_slice_id: 0,
            num_acked_slices: 0,
            acked: BitArray::new(0),
            time_last_sent: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_sending(&self) -> bool {
        self.sending
    }

    /// Begins sending `data` as a new chunk. Panics if a chunk is already in
    /// flight — callers must check `is_sending()` first, mirroring the
    /// source's `YOJIMBO_ASSERT(!m_sending)`.
    pub fn send_chunk(&mut self, data: Vec<u8>) {
        assert!(!self.sending, "a chunk is already in flight");
        self.num_slices = ((data.len() + self.slice_size - 1) / self.slice_size).max(1) as u16;
        self.chunk_data = data;
        self.acked = BitArray::new(self.num_slices as usize);
        self.time_last_sent = vec![f64::NEG_INFINITY; self.num_slices as usize];
        self.current_slice_id = 0;
        self.num_acked_slices = 0;
        self.sending = true;
    }

    /// Returns the next slice ready to (re)send at time `t`, or `None` if
    /// every slice was sent too recently.
    pub fn generate_slice_packet(&mut self, t: f64) -> Option<SlicePacket> {
        if !self.sending {
            return None;
        }
        for _ in 0..self.num_slices {
            let id = self.current_slice_id;
            self.current_slice_id = (self.current_slice_id + 1) % self.num_slices;
            if self.acked.get(id as usize) {
                continue;
            }
            if self.time_last_sent[id as usize] + self.min_resend_time >= t {
                continue;
            }
            self.time_last_sent[id as usize] = t;
            let start = id as usize * self.slice_size;
            let end = (start + self.slice_size).min(self.chunk_data.len());
            return Some(SlicePacket {
                chunk_id: self.chunk_id,
                slice_id: id,
                num_slices: self.num_slices,
                data: self.chunk_data[start..end].to_vec(),
            });
        }
        None
    }

    /// Processes an ack packet; completes the chunk once every slice is
    /// acked.
    pub fn process_ack_packet(&mut self, ack: &AckPacket) {
        if !self.sending || ack.chunk_id != self.chunk_id || ack.num_slices != self.num_slices {
            return;
        }
        for (id, &is_acked) in ack.acked.iter().enumerate() {
            if is_acked && !self.acked.get(id) {
                self.acked.set(id);
                self.num_acked_slices += 1;
            }
        }
        if self.num_acked_slices == self.num_slices {
            self.sending = false;
            self.chunk_id = self.chunk_id.wrapping_add(1);
        }
    }
}

/// Receives chunk slices, assembling them and rate-limiting ack packets.
pub struct ChunkReceiver {
    slice_size: usize,
    min_ack_interval: f64,
    receiving: bool,
    ready_to_read: bool,
    force_ack_previous_chunk: bool,
    previous_chunk_num_slices: Option<u16>,
    chunk_id: u16,
    chunk_size: usize,
    num_slices: u16,
    num_received_slices: u16,
    time_last_ack_sent: f64,
    received: BitArray,
    chunk_data: Vec<u8>,
}

impl ChunkReceiver {
    #[must_use]
    pub fn new(slice_size: usize, min_ack_interval: f64, max_chunk_size: usize) -> Self {
        Self {
            slice_size,
            min_ack_interval,
            receiving: false,
            ready_to_read: false,
            force_ack_previous_chunk: false,
            previous_chunk_num_slices: None,
            chunk_id: 0,
            chunk_size: 0,
            num_slices: 0,
            num_received_slices: 0,
            time_last_ack_sent: f64::NEG_INFINITY,
            received: BitArray::new(0),
            chunk_data: vec![0u8; max_chunk_size],
        }
    }

    pub fn process_slice_packet(&mut self, p: &SlicePacket) {
        if self.ready_to_read {
            return; // caller must consume first
        }
        if !self.receiving
            && p.chunk_id == self.chunk_id.wrapping_sub(1)
            && self.previous_chunk_num_slices.is_some()
        {
            self.force_ack_previous_chunk = true;
        }
        if !self.receiving && p.chunk_id == self.chunk_id {
            self.num_slices = p.num_slices;
            self.received = BitArray::new(p.num_slices as usize);
            self.num_received_slices = 0;
            self.receiving = true;
        }
        if p.chunk_id != self.chunk_id || p.num_slices != self.num_slices {
            return;
        }
        if self.received.get(p.slice_id as usize) {
            return;
        }
        let start = p.slice_id as usize * self.slice_size;
        let end = start + p.data.len();
        if end > self.chunk_data.len() {
            return;
        }
        self.chunk_data[start..end].copy_from_slice(&p.data);
        self.received.set(p.slice_id as usize);
        self.num_received_slices += 1;
        if p.slice_id + 1 == p.num_slices {
            self.chunk_size = (p.num_slices as usize - 1) * self.slice_size + p.data.len();
        }
        if self.num_received_slices == self.num_slices {
            self.receiving = false;
            self.ready_to_read = true;
            self.previous_chunk_num_slices = Some(self.num_slices);
            self.chunk_id = self.chunk_id.wrapping_add(1);
        }
    }

    pub fn generate_ack_packet(&mut self, t: f64) -> Option<AckPacket> {
        if t - self.time_last_ack_sent < self.min_ack_interval {
            return None;
        }
        self.time_last_ack_sent = t;
        if self.force_ack_previous_chunk {
            self.force_ack_previous_chunk = false;
            let num_slices = self.previous_chunk_num_slices.unwrap_or(0);
            return Some(AckPacket {
                chunk_id: self.chunk_id.wrapping_sub(1),
                num_slices,
                acked: vec![true; num_slices as usize],
            });
        }
        if self.receiving {
            return Some(AckPacket {
                chunk_id: self.chunk_id,
                num_slices: self.num_slices,
                acked: self.received.iter().collect(),
            });
        }
        None
    }

    /// Returns the reassembled chunk's bytes, if one is ready, and clears
    /// `ready_to_read`.
    pub fn read_chunk(&mut self) -> Option<Vec<u8>> {
        if !self.ready_to_read {
            return None;
        }
        self.ready_to_read = false;
        Some(self.chunk_data[..self.chunk_size].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive(sender: &mut ChunkSender, receiver: &mut ChunkReceiver, mut t: f64) -> f64 {
        loop {
            let mut progressed = false;
            while let Some(slice) = sender.generate_slice_packet(t) {
                receiver.process_slice_packet(&slice);
                progressed = true;
            }
            if let Some(ack) = receiver.generate_ack_packet(t) {
                sender.process_ack_packet(&ack);
                progressed = true;
            }
            if !sender.is_sending() {
                break;
            }
            if !progressed {
                t += 1.0;
            }
        }
        t
    }

    #[test]
    fn block_streaming_round_trip() {
        let mut sender = ChunkSender::new(1024, 0.0);
        let mut receiver = ChunkReceiver::new(1024, 0.0, 64 * 1024);
        let data: Vec<u8> = (0..10 * 1024u32).map(|i| (i % 256) as u8).collect();
        sender.send_chunk(data.clone());

        drive(&mut sender, &mut receiver, 0.0);
        let out = receiver.read_chunk().expect("chunk ready");
        assert_eq!(out, data);
    }
}
