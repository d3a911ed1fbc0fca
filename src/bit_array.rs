//! Dense bit vector used for per-fragment/per-slice acked state.
//!
//! Wraps [`bit_vec::BitVec`] rather than hand-rolling the u64-word-indexed
//! storage `yojimbo_bit_array.h` implements from scratch — the teacher
//! already depends on `bit-vec` for exactly this purpose.

use bit_vec::BitVec;

/// A fixed-size bit array, all bits initially clear.
#[derive(Debug, Clone)]
pub struct BitArray {
    bits: BitVec,
}

impl BitArray {
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            bits: BitVec::from_elem(size, false),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn set(&mut self, index: usize) {
        self.bits.set(index, true);
    }

    pub fn clear_bit(&mut self, index: usize) {
        self.bits.set(index, false);
    }

    #[must_use]
    pub fn get(&self, index: usize) -> bool {
        self.bits.get(index).unwrap_or(false)
    }

    /// Clears every bit (length is unchanged).
    pub fn clear(&mut self) {
        self.bits.clear();
    }

    #[must_use]
    pub fn all_set(&self) -> bool {
        self.bits.iter().all(|b| b)
    }

    #[must_use]
    pub fn count_set(&self) -> usize {
        self.bits.iter().filter(|b| *b).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = bool> + '_ {
        self.bits.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_clear() {
        let mut arr = BitArray::new(10);
        assert!(!arr.get(3));
        arr.set(3);
        assert!(arr.get(3));
        arr.clear_bit(3);
        assert!(!arr.get(3));
    }

    #[test]
    fn all_set_tracks_every_bit() {
        let mut arr = BitArray::new(4);
        assert!(!arr.all_set());
        for i in 0..4 {
            arr.set(i);
        }
        assert!(arr.all_set());
    }
}
