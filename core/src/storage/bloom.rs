//! Bloom filter over bundle keys
//!
//! Routing hands the store a summary of bundle ids it wants dropped;
//! the filter answers membership with false positives but never false
//! negatives. Bit positions are drawn from a blake3 XOF of the element.

use bitvec::prelude::*;

/// Space-efficient probabilistic set of byte strings.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: BitVec<u8, Lsb0>,
    /// Number of hash positions per element.
    k: u32,
    /// Number of elements inserted.
    n: usize,
}

impl BloomFilter {
    /// A filter with `m` bits and `k` hash positions per element.
    pub fn new(m: usize, k: u32) -> Self {
        Self {
            bits: bitvec![u8, Lsb0; 0; m.max(1)],
            k: k.max(1),
            n: 0,
        }
    }

    /// A filter sized for `expected` elements at the target false
    /// positive rate.
    pub fn with_capacity(expected: usize, fpr: f64) -> Self {
        let expected = expected.max(1) as f64;
        let fpr = fpr.clamp(1e-9, 0.5);
        let ln2 = std::f64::consts::LN_2;
        let m = (-expected * fpr.ln() / (ln2 * ln2)).ceil() as usize;
        let k = ((m as f64 / expected) * ln2).round().max(1.0) as u32;
        Self::new(m, k)
    }

    fn positions(&self, element: &[u8]) -> impl Iterator<Item = usize> + '_ {
        let mut reader = blake3::Hasher::new().update(element).finalize_xof();
        let m = self.bits.len();
        (0..self.k).map(move |_| {
            let mut word = [0u8; 8];
            reader.fill(&mut word);
            (u64::from_le_bytes(word) % m as u64) as usize
        })
    }

    /// Insert an element; `contains` is guaranteed true afterwards.
    pub fn insert(&mut self, element: &[u8]) {
        let positions: Vec<usize> = self.positions(element).collect();
        for pos in positions {
            self.bits.set(pos, true);
        }
        self.n += 1;
    }

    /// Membership test: false means definitely absent.
    pub fn contains(&self, element: &[u8]) -> bool {
        self.positions(element).all(|pos| self.bits[pos])
    }

    /// Number of inserted elements.
    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn clear(&mut self) {
        self.bits.fill(false);
        self.n = 0;
    }
}
