//! Existence filter over legitimate product ids.
//!
//! A Bloom filter: `might_contain` never returns `false` for an inserted id,
//! and returns `true` for an absent id with roughly the configured
//! false-positive rate. Bit positions use double hashing (`h1 + i·h2`).

use flashsale_core::types::ProductId;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Bloom filter over product ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistenceFilter {
    bits: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
    len: usize,
}

impl ExistenceFilter {
    /// Size a filter for `expected_items` at `false_positive_rate`.
    ///
    /// `m = -n·ln(p) / ln(2)²`, `k = m/n · ln(2)`.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn with_rate(expected_items: usize, false_positive_rate: f64) -> Self {
        let n = expected_items.max(1) as f64;
        let p = false_positive_rate.clamp(1e-9, 0.5);
        let ln2 = std::f64::consts::LN_2;
        let num_bits = (-(n * p.ln()) / (ln2 * ln2)).ceil().max(64.0) as u64;
        let num_hashes = ((num_bits as f64 / n) * ln2).round().clamp(1.0, 16.0) as u32;
        let words = usize::try_from(num_bits.div_ceil(64)).unwrap_or(usize::MAX);

        Self {
            bits: vec![0; words],
            num_bits: num_bits.div_ceil(64) * 64,
            num_hashes,
            len: 0,
        }
    }

    /// Build a filter holding exactly `ids`.
    #[must_use]
    pub fn from_ids(ids: &[ProductId], false_positive_rate: f64) -> Self {
        let mut filter = Self::with_rate(ids.len(), false_positive_rate);
        for id in ids {
            filter.insert(*id);
        }
        filter
    }

    /// Add an id.
    pub fn insert(&mut self, id: ProductId) {
        for index in self.positions(id).collect::<Vec<_>>() {
            let (word, bit) = Self::locate(index);
            if let Some(slot) = self.bits.get_mut(word) {
                *slot |= 1 << bit;
            }
        }
        self.len += 1;
    }

    /// `false` means the id is definitely absent.
    #[must_use]
    pub fn might_contain(&self, id: ProductId) -> bool {
        self.positions(id).all(|index| {
            let (word, bit) = Self::locate(index);
            self.bits.get(word).is_some_and(|slot| slot & (1 << bit) != 0)
        })
    }

    /// Number of inserted ids.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing was inserted.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size of the bit array.
    #[must_use]
    pub const fn num_bits(&self) -> u64 {
        self.num_bits
    }

    /// Number of hash functions.
    #[must_use]
    pub const fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    fn positions(&self, id: ProductId) -> impl Iterator<Item = u64> + '_ {
        let h1 = hash_with(0x9E37_79B9, id);
        let h2 = hash_with(0x85EB_CA6B, id) | 1;
        (0..u64::from(self.num_hashes))
            .map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % self.num_bits)
    }

    #[allow(clippy::cast_possible_truncation)]
    const fn locate(index: u64) -> (usize, u32) {
        ((index / 64) as usize, (index % 64) as u32)
    }
}

fn hash_with(seed: u64, id: ProductId) -> u64 {
    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    id.hash(&mut hasher);
    hasher.finish()
}
