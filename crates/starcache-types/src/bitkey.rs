//! Fixed-width sets of column bit positions.
//!
//! A [`BitKey`] identifies which columns of a star constrain a request or a
//! segment. Two bit keys of the same star have the same width and are
//! comparable; the total order is used to sort batches deterministically so
//! that two identical evaluations emit byte-identical SQL.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Bits per storage limb.
const LIMB_BITS: usize = 64;

/// A fixed-width set of column bit positions.
///
/// Positions are `0..width`. Most stars fit in two limbs (128 columns)
/// without heap allocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BitKey {
    width: u32,
    limbs: SmallVec<[u64; 2]>,
}

impl BitKey {
    /// Empty key able to address positions `0..width`.
    #[must_use]
    pub fn new(width: u32) -> Self {
        let limb_count = (width as usize).div_ceil(LIMB_BITS).max(1);
        Self {
            width,
            limbs: smallvec::smallvec![0; limb_count],
        }
    }

    /// Key with the given positions set.
    #[must_use]
    pub fn with_bits(width: u32, bits: impl IntoIterator<Item = u32>) -> Self {
        let mut key = Self::new(width);
        for bit in bits {
            key.set(bit);
        }
        key
    }

    /// Addressable width in bits.
    #[inline]
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Set the bit at `pos`.
    ///
    /// # Panics
    /// Panics if `pos >= width`.
    pub fn set(&mut self, pos: u32) {
        assert!(pos < self.width, "bit {pos} out of width {}", self.width);
        self.limbs[pos as usize / LIMB_BITS] |= 1 << (pos as usize % LIMB_BITS);
    }

    /// Clear the bit at `pos`.
    pub fn clear(&mut self, pos: u32) {
        if pos < self.width {
            self.limbs[pos as usize / LIMB_BITS] &= !(1 << (pos as usize % LIMB_BITS));
        }
    }

    /// Whether the bit at `pos` is set.
    #[must_use]
    pub fn get(&self, pos: u32) -> bool {
        if pos >= self.width {
            return false;
        }
        self.limbs[pos as usize / LIMB_BITS] & (1 << (pos as usize % LIMB_BITS)) != 0
    }

    /// Whether no bit is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.limbs.iter().all(|limb| *limb == 0)
    }

    /// Number of set bits.
    #[must_use]
    pub fn cardinality(&self) -> u32 {
        self.limbs.iter().map(|limb| limb.count_ones()).sum()
    }

    /// Bitwise AND.
    #[must_use]
    pub fn and(&self, other: &Self) -> Self {
        self.zip_limbs(other, |a, b| a & b)
    }

    /// Bitwise OR.
    #[must_use]
    pub fn or(&self, other: &Self) -> Self {
        self.zip_limbs(other, |a, b| a | b)
    }

    /// Bits of `self` not in `other`.
    #[must_use]
    pub fn and_not(&self, other: &Self) -> Self {
        self.zip_limbs(other, |a, b| a & !b)
    }

    /// Whether `self` and `other` share at least one set bit.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.limbs
            .iter()
            .zip(other.limbs.iter())
            .any(|(a, b)| a & b != 0)
    }

    /// Whether every bit of `other` is also set in `self`.
    #[must_use]
    pub fn is_superset_of(&self, other: &Self) -> bool {
        let longest = self.limbs.len().max(other.limbs.len());
        (0..longest).all(|i| {
            let a = self.limbs.get(i).copied().unwrap_or(0);
            let b = other.limbs.get(i).copied().unwrap_or(0);
            a & b == b
        })
    }

    /// Set positions in ascending order.
    pub fn ones(&self) -> impl Iterator<Item = u32> + '_ {
        self.limbs.iter().enumerate().flat_map(|(limb_idx, limb)| {
            let base = (limb_idx * LIMB_BITS) as u32;
            let mut rest = *limb;
            std::iter::from_fn(move || {
                if rest == 0 {
                    return None;
                }
                let bit = rest.trailing_zeros();
                rest &= rest - 1;
                Some(base + bit)
            })
        })
    }

    fn zip_limbs(&self, other: &Self, op: impl Fn(u64, u64) -> u64) -> Self {
        debug_assert_eq!(
            self.width, other.width,
            "bit keys of different stars are not comparable"
        );
        let limb_count = self.limbs.len().max(other.limbs.len());
        let limbs = (0..limb_count)
            .map(|i| {
                op(
                    self.limbs.get(i).copied().unwrap_or(0),
                    other.limbs.get(i).copied().unwrap_or(0),
                )
            })
            .collect();
        Self {
            width: self.width.max(other.width),
            limbs,
        }
    }
}

impl PartialOrd for BitKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BitKey {
    /// Total order: most-significant limb first, then width. Stable across
    /// runs because bit positions derive from schema column order.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        let longest = self.limbs.len().max(other.limbs.len());
        for i in (0..longest).rev() {
            let a = self.limbs.get(i).copied().unwrap_or(0);
            let b = other.limbs.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                std::cmp::Ordering::Equal => {}
                unequal => return unequal,
            }
        }
        self.width.cmp(&other.width)
    }
}
