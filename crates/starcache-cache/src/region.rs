//! Cache regions: fluent descriptions of what to invalidate.

use std::collections::BTreeMap;

use starcache_predicate::{ColumnPredicate, CompoundPredicate};
use starcache_segment::ExcludedRegion;
use starcache_types::BitKey;

/// A region of the cell space to invalidate: a bitmap of columns with
/// per-column flush predicates, plus multi-column flush predicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRegion {
    constrained: BitKey,
    columns: BTreeMap<u32, ColumnPredicate>,
    multi: Vec<CompoundPredicate>,
}

impl CacheRegion {
    /// Start building a region over a star of the given bit width.
    #[must_use]
    pub fn builder(width: u32) -> CacheRegionBuilder {
        CacheRegionBuilder {
            width,
            columns: BTreeMap::new(),
            multi: Vec::new(),
        }
    }

    /// Columns mentioned anywhere in the region.
    #[must_use]
    pub const fn bitkey(&self) -> &BitKey {
        &self.constrained
    }

    /// Per-column flush predicates in bit order.
    #[must_use]
    pub const fn columns(&self) -> &BTreeMap<u32, ColumnPredicate> {
        &self.columns
    }

    /// Flush predicate on one column, when the region constrains it.
    #[must_use]
    pub fn column_predicate(&self, bit: u32) -> Option<&ColumnPredicate> {
        self.columns.get(&bit)
    }

    /// Multi-column flush predicates.
    #[must_use]
    pub fn multi(&self) -> &[CompoundPredicate] {
        &self.multi
    }

    /// The excluded-region record a flushed segment carries forward.
    #[must_use]
    pub fn to_excluded_region(&self) -> ExcludedRegion {
        ExcludedRegion {
            bitkey: self.constrained.clone(),
            columns: self
                .columns
                .iter()
                .map(|(bit, predicate)| (*bit, predicate.clone()))
                .collect(),
            multi: self.multi.clone(),
        }
    }
}

/// Fluent builder for [`CacheRegion`].
#[derive(Debug)]
pub struct CacheRegionBuilder {
    width: u32,
    columns: BTreeMap<u32, ColumnPredicate>,
    multi: Vec<CompoundPredicate>,
}

impl CacheRegionBuilder {
    /// Constrain one column. A second constraint on the same column ORs
    /// with the first: both describe flushed values.
    #[must_use]
    pub fn column(mut self, bit: u32, predicate: ColumnPredicate) -> Self {
        let merged = match self.columns.remove(&bit) {
            Some(existing) => existing.or(predicate),
            None => predicate,
        };
        self.columns.insert(bit, merged);
        self
    }

    /// Add a multi-column flush predicate.
    #[must_use]
    pub fn compound(mut self, predicate: CompoundPredicate) -> Self {
        self.multi.push(predicate);
        self
    }

    /// Finish the region.
    #[must_use]
    pub fn build(self) -> CacheRegion {
        let mut constrained = BitKey::new(self.width);
        for bit in self.columns.keys() {
            constrained.set(*bit);
        }
        for compound in &self.multi {
            constrained = constrained.or(compound.bitkey());
        }
        CacheRegion {
            constrained,
            columns: self.columns,
            multi: self.multi,
        }
    }
}
