//! Segment headers: compact fingerprints of cached segments.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use starcache_predicate::{ColumnPredicate, CompoundPredicate};
use starcache_types::{BitKey, Datum, MeasureExpr, Star, StarId};
use xxhash_rust::xxh3::xxh3_64;

/// One constrained column of a segment: its name, bit position, and the
/// predicate summary captured at load time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstrainedColumn {
    pub name: String,
    pub bit: u32,
    pub predicate: ColumnPredicate,
}

/// A region of coordinates guaranteed absent from a segment's dataset.
///
/// Produced by flush: the flushed coordinates stay described here so later
/// lookups do not trust the segment for them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedRegion {
    /// Columns the region constrains.
    pub bitkey: BitKey,
    /// Per-column flush predicates.
    pub columns: Vec<(u32, ColumnPredicate)>,
    /// Multi-column flush predicates.
    pub multi: Vec<CompoundPredicate>,
}

impl ExcludedRegion {
    /// Whether the region shadows a cell at the given coordinates.
    ///
    /// Conservative: a term over a column absent from `values` counts as
    /// matching, because the segment cell aggregates over every value of
    /// that column and the flush removed some of them.
    #[must_use]
    pub fn shadows(&self, values: &BTreeMap<u32, Datum>) -> bool {
        let columns_match = self.columns.iter().all(|(bit, predicate)| {
            values.get(bit).is_none_or(|value| predicate.evaluate(value))
        });
        if !columns_match {
            return false;
        }
        if self.multi.is_empty() {
            return true;
        }
        self.multi
            .iter()
            .any(|compound| compound_might_match(compound, values))
    }
}

/// Whether a compound predicate could match a partial value assignment:
/// some disjunct has every present-column term true, with absent columns
/// treated as possibly true.
fn compound_might_match(compound: &CompoundPredicate, values: &BTreeMap<u32, Datum>) -> bool {
    compound.disjuncts().iter().any(|disjunct| {
        disjunct.terms().iter().all(|(bit, predicate)| {
            values.get(bit).is_none_or(|value| predicate.evaluate(value))
        })
    })
}

/// Compact, serializable fingerprint of a cached segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentHeader {
    pub schema_name: String,
    pub schema_checksum: u64,
    pub cube_name: String,
    pub measure_name: String,
    pub fact_table: String,
    /// Constrained column positions.
    pub constrained: BitKey,
    /// Per-column predicate summaries, in bit order.
    pub columns: Vec<ConstrainedColumn>,
    /// Sorted canonical forms of the compound predicates.
    pub compound_keys: Vec<String>,
    /// Regions guaranteed absent from the dataset.
    pub excluded_regions: Vec<ExcludedRegion>,
}

impl SegmentHeader {
    /// Build a header for a star, measure, and set of column constraints.
    #[must_use]
    pub fn new(
        star: &Star,
        measure: &MeasureExpr,
        columns: Vec<(u32, ColumnPredicate)>,
        compound: &[CompoundPredicate],
    ) -> Self {
        let mut constrained = star.empty_key();
        let mut summaries: Vec<ConstrainedColumn> = columns
            .into_iter()
            .map(|(bit, predicate)| {
                constrained.set(bit);
                ConstrainedColumn {
                    name: star
                        .column(bit)
                        .map_or_else(|| format!("col{bit}"), |c| c.name.clone()),
                    bit,
                    predicate,
                }
            })
            .collect();
        summaries.sort_by_key(|c| c.bit);
        let mut compound_keys: Vec<String> =
            compound.iter().map(CompoundPredicate::canonical_key).collect();
        compound_keys.sort();
        Self {
            schema_name: star.id().schema_name.clone(),
            schema_checksum: star.id().schema_checksum,
            cube_name: star.id().cube_name.clone(),
            measure_name: measure.name.clone(),
            fact_table: star.id().fact_table.clone(),
            constrained,
            columns: summaries,
            compound_keys,
            excluded_regions: Vec::new(),
        }
    }

    /// Stable hash of the full header content.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        // Field order is fixed and every collection is ordered, so the JSON
        // form is deterministic.
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        xxh3_64(&bytes)
    }

    /// Whether the header belongs to the given star identity and fact alias
    /// and constrains exactly the given columns.
    #[must_use]
    pub fn matches_prefix(&self, star: &StarId, fact_table: &str, bitkey: &BitKey) -> bool {
        self.schema_name == star.schema_name
            && self.schema_checksum == star.schema_checksum
            && self.cube_name == star.cube_name
            && self.fact_table == fact_table
            && self.constrained == *bitkey
    }

    /// Whether the header's compound constraints are equivalent to the
    /// request's.
    #[must_use]
    pub fn compound_equivalent(&self, request_keys: &[String]) -> bool {
        let mut sorted = request_keys.to_vec();
        sorted.sort();
        self.compound_keys == sorted
    }

    /// Whether the header can serve a cell at the given coordinates: every
    /// axis predicate accepts its value and no excluded region shadows it.
    #[must_use]
    pub fn can_serve(&self, values: &BTreeMap<u32, Datum>) -> bool {
        let accepted = self.columns.iter().all(|column| {
            values
                .get(&column.bit)
                .is_some_and(|value| column.predicate.evaluate(value))
        });
        accepted && !self.excluded_regions.iter().any(|r| r.shadows(values))
    }

    /// Product of constrained-value counts; unconstrainable columns count
    /// as `u64::MAX`. Used to order candidate headers smallest slice first.
    #[must_use]
    pub fn domain_size(&self) -> u64 {
        self.columns.iter().fold(1_u64, |acc, column| {
            let width = column
                .predicate
                .constrained_cardinality()
                .map_or(u64::MAX, |n| n as u64);
            acc.saturating_mul(width.max(1))
        })
    }

    /// Axis count of the segment.
    #[must_use]
    pub fn axis_count(&self) -> usize {
        self.columns.len()
    }
}
