//! CRC32 packet integrity framing.
//!
//! Uses the IEEE 802.3 reflected polynomial (the same one zlib/gzip use),
//! via `crc32fast` rather than hand-rolling the lookup table `protocol2.h`'s
//! comment references — see `SPEC_FULL.md` "CRC32 table / polynomial".
//!
//! The checksum covers `host_to_network(protocol_id)` followed by the
//! packet bytes with the CRC field itself read as zero, matching §4.2/§6.

/// Computes the CRC32 that should be stored in a packet's CRC field.
///
/// `packet` must have its 4-byte CRC field already zeroed at the position it
/// will occupy on the wire.
#[must_use]
pub fn compute(protocol_id: u64, packet: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&protocol_id.to_be_bytes());
    hasher.update(packet);
    hasher.finalize()
}

/// Verifies that `packet[crc_offset..crc_offset + 4]` equals
/// `compute(protocol_id, packet)` with that field zeroed.
#[must_use]
pub fn verify(protocol_id: u64, packet: &[u8], crc_offset: usize) -> bool {
    if packet.len() < crc_offset + 4 {
        return false;
    }
    let stored = u32::from_le_bytes(packet[crc_offset..crc_offset + 4].try_into().unwrap());
    let mut zeroed = packet.to_vec();
    zeroed[crc_offset..crc_offset + 4].copy_from_slice(&[0; 4]);
    compute(protocol_id, &zeroed) == stored
}
