//! Sequence number wraparound arithmetic.
//!
//! Sequence numbers are unsigned 16-bit counters that wrap past 65535.
//! Comparisons must account for wraparound: a sequence is "greater" than
//! another if the signed difference, computed mod 65536, is positive.
//! Mirrors `protocol2.h`'s `sequence_greater_than`/`sequence_less_than`.

/// `s1 > s2`, accounting for wraparound.
#[must_use]
pub fn sequence_greater_than(s1: u16, s2: u16) -> bool {
    ((s1 > s2) && (s1 - s2 <= 32768)) || ((s1 < s2) && (s2 - s1 > 32768))
}

/// `s1 < s2`, accounting for wraparound.
#[must_use]
pub fn sequence_less_than(s1: u16, s2: u16) -> bool {
    sequence_greater_than(s2, s1)
}

/// Signed distance from `s2` to `s1`, accounting for wraparound: positive if
/// `s1` is ahead of `s2`.
#[must_use]
pub fn sequence_difference(s1: u16, s2: u16) -> i32 {
    let mut diff = i32::from(s1) - i32::from(s2);
    if diff >= 32768 {
        diff -= 65536;
    } else if diff < -32768 {
        diff += 65536;
    }
    diff
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_ordering() {
        assert!(sequence_greater_than(1, 0));
        assert!(sequence_less_than(0, 1));
    }

    #[test]
    fn wraps_around() {
        assert!(sequence_greater_than(0, 65535));
        assert!(sequence_less_than(65535, 0));
    }

    #[test]
    fn difference_accounts_for_wrap() {
        assert_eq!(sequence_difference(1, 0), 1);
        assert_eq!(sequence_difference(0, 65535), 1);
        assert_eq!(sequence_difference(65535, 0), -1);
    }
}
