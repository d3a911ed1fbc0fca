//! Packet fragmentation and reassembly (§4.4).
//!
//! Splits oversize packets into ≤1024-byte fragments and reassembles them on
//! the receive side through a sequence-indexed window that tolerates loss,
//! duplication, and reordering, and rejects malformed or malicious
//! fragments outright. Conceptually grounded on the teacher's `frag.rs`
//! `split()`/reassembly shape, reworked from its `HashMap`-keyed design onto
//! [`crate::seq_buffer::SequenceBuffer`] to match this spec's fixed,
//! sequence-mod-N reassembly window (§4.4), and on `protocol2.h`'s
//! `003_packet_fragmentation_and_reassembly.cpp` for the exact rejection
//! predicates.

use tracing::warn;

use crate::seq::sequence_difference;
use crate::seq_buffer::SequenceBuffer;

/// One outgoing fragment of a split packet.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub fragment_id: u16,
    pub num_fragments: u16,
    pub data: Vec<u8>,
}

/// Splits `data` into fragments of at most `max_fragment_size` bytes.
///
/// # Panics
/// Panics if `data` is empty or would require more than 256 fragments —
/// callers are expected to only fragment packets that exceed
/// `fragment_packets_above` and fit within `max_packet_fragments *
/// max_fragment_size`.
#[must_use]
pub fn split(max_fragment_size: usize, data: &[u8]) -> Vec<Fragment> {
    assert!(!data.is_empty(), "cannot fragment an empty packet");
    let num_fragments = ((data.len() + max_fragment_size - 1) / max_fragment_size) as u16;
    assert!(num_fragments as usize <= 256, "packet too large to fragment");

    (0..num_fragments)
        .map(|id| {
            let start = id as usize * max_fragment_size;
            let end = (start + max_fragment_size).min(data.len());
            Fragment {
                fragment_id: id,
                num_fragments,
                data: data[start..end].to_vec(),
            }
        })
        .collect()
}

struct PacketBufferEntry {
    num_fragments: u16,
    received_fragments: u16,
    fragment_size: usize,
    slots: Vec<Option<Vec<u8>>>,
}

/// Window of in-flight reassembly buffers, keyed by `sequence mod size`.
pub struct Reassembler {
    max_fragment_size: usize,
    max_fragments: u16,
    entries: SequenceBuffer<PacketBufferEntry>,
}

impl Reassembler {
    #[must_use]
    pub fn new(window_size: usize, max_fragment_size: usize, max_fragments: u16) -> Self {
        Self {
            max_fragment_size,
            max_fragments,
            entries: SequenceBuffer::new(window_size),
        }
    }

    /// Feeds one received fragment into the reassembly window. Returns the
    /// reassembled packet bytes once every fragment of its sequence has
    /// arrived, or `None` if the packet is incomplete or the fragment was
    /// rejected.
    pub fn receive_fragment(
        &mut self,
        sequence: u16,
        fragment_id: u16,
        num_fragments: u16,
        fragment_data: &[u8],
    ) -> Option<Vec<u8>> {
        let fragment_size = fragment_data.len();
        let is_last = fragment_id + 1 == num_fragments;

        if fragment_size == 0 || fragment_size > self.max_fragment_size {
            warn!(sequence, fragment_size, "rejected: bad fragment size");
            return None;
        }
        if num_fragments == 0 || num_fragments > self.max_fragments {
            warn!(sequence, num_fragments, "rejected: bad fragment count");
            return None;
        }
        if fragment_id >= num_fragments {
            warn!(sequence, fragment_id, num_fragments, "rejected: fragment id out of range");
            return None;
        }
        if !is_last && fragment_size != self.max_fragment_size {
            warn!(sequence, "rejected: non-final fragment not full size");
            return None;
        }
        if let Some(current) = self.entries.current_sequence() {
            if sequence_difference(sequence, current) > 1024 {
                warn!(sequence, "rejected: sequence too far ahead");
                return None;
            }
        }
        if let Some(slot_sequence) = self.entries.slot_sequence(sequence) {
            if slot_sequence != sequence {
                warn!(sequence, slot_sequence, "rejected: slot occupied by a different in-progress sequence");
                return None;
            }
        }

        if let Some(existing) = self.entries.get(sequence) {
            if existing.num_fragments != num_fragments {
                warn!(sequence, "rejected: num_fragments mismatch with existing entry");
                return None;
            }
            if existing.slots[fragment_id as usize].is_some() {
                // duplicate: idempotent no-op, not an error
                return None;
            }
        } else {
            let entry = PacketBufferEntry {
                num_fragments,
                received_fragments: 0,
                fragment_size: self.max_fragment_size,
                slots: vec![None; num_fragments as usize],
            };
            if !self.entries.insert(sequence, entry) {
                warn!(sequence, "rejected: sequence too old for window");
                return None;
            }
        }

        let entry = self.entries.get_mut(sequence)?;
        entry.slots[fragment_id as usize] = Some(fragment_data.to_vec());
        entry.received_fragments += 1;
        let _ = entry.fragment_size;

        if entry.received_fragments == entry.num_fragments {
            let entry = self.entries.remove(sequence)?;
            let mut out = Vec::new();
            for slot in entry.slots {
                out.extend_from_slice(&slot.expect("all slots filled when received == num_fragments"));
            }
            return Some(out);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_happy_path() {
        let data = vec![7u8; 1500];
        let frags = split(1024, &data);
        assert_eq!(frags.len(), 2);
        assert_eq!(frags[0].data.len(), 1024);
        assert_eq!(frags[1].data.len(), 476);

        let mut r = Reassembler::new(64, 1024, 256);
        assert!(r
            .receive_fragment(1, 0, 2, &frags[0].data)
            .is_none());
        let out = r.receive_fragment(1, 1, 2, &frags[1].data).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn fragment_reordered() {
        let data = vec![9u8; 1500];
        let frags = split(1024, &data);
        let mut r = Reassembler::new(64, 1024, 256);
        assert!(r.receive_fragment(1, 1, 2, &frags[1].data).is_none());
        let out = r.receive_fragment(1, 0, 2, &frags[0].data).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn malicious_fragment_rejected_without_state_change() {
        let mut r = Reassembler::new(64, 1024, 256);
        // fragmentId = 5 but numFragments = 3: out of range, must be rejected
        assert!(r.receive_fragment(1, 5, 3, &[1, 2, 3]).is_none());
        assert!(r.entries.get(1).is_none(), "no entry should have been created");
    }

    #[test]
    fn fragment_colliding_with_a_different_in_progress_sequence_is_rejected() {
        let data = vec![4u8; 2048];
        let frags = split(1024, &data);
        let mut r = Reassembler::new(64, 1024, 256);
        // sequence 1 is still incomplete (only fragment 0 delivered) when a
        // fragment for sequence 1 + window_size arrives, which hashes to the
        // same slot.
        assert!(r.receive_fragment(1, 0, 2, &frags[0].data).is_none());
        assert!(r
            .receive_fragment(1 + 64, 0, 1, &[9, 9, 9])
            .is_none());
        // sequence 1's in-progress reassembly must survive the collision.
        let out = r.receive_fragment(1, 1, 2, &frags[1].data).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn duplicate_fragment_is_idempotent() {
        let data = vec![3u8; 2048];
        let frags = split(1024, &data);
        let mut r = Reassembler::new(64, 1024, 256);
        r.receive_fragment(1, 0, 2, &frags[0].data);
        let before = r.entries.get(1).unwrap().received_fragments;
        r.receive_fragment(1, 0, 2, &frags[0].data);
        let after = r.entries.get(1).unwrap().received_fragments;
        assert_eq!(before, after);
    }
}
