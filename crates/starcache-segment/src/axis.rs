//! Segment axes: one constrained column with its observed key array.

use starcache_predicate::ColumnPredicate;
use starcache_types::Datum;

/// One axis of a segment: the column, its load-time predicate, and the
/// sorted array of keys actually seen in the result.
///
/// Invariant: every cell's coordinate on this axis is one of `keys`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentAxis {
    pub name: String,
    pub bit: u32,
    pub predicate: ColumnPredicate,
    keys: Vec<Datum>,
}

impl SegmentAxis {
    /// Build an axis; keys are sorted and deduplicated.
    #[must_use]
    pub fn new(
        name: &str,
        bit: u32,
        predicate: ColumnPredicate,
        keys: impl IntoIterator<Item = Datum>,
    ) -> Self {
        let mut keys: Vec<Datum> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();
        Self {
            name: name.to_owned(),
            bit,
            predicate,
            keys,
        }
    }

    /// Sorted distinct keys.
    #[must_use]
    pub fn keys(&self) -> &[Datum] {
        &self.keys
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the axis has no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Ordinal of a key value, if present.
    #[must_use]
    pub fn ordinal_of(&self, value: &Datum) -> Option<u32> {
        self.keys.binary_search(value).ok().map(|i| i as u32)
    }

    /// Key at an ordinal.
    #[must_use]
    pub fn key_at(&self, ordinal: u32) -> Option<&Datum> {
        self.keys.get(ordinal as usize)
    }
}
