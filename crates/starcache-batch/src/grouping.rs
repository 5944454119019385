//! Batch grouping and rollup planning.
//!
//! Two batches can share a grouping-sets query only when rolling the
//! detailed result up reproduces the summary exactly; the [`can_batch`]
//! rules encode when that holds. The merge scan runs to fixpoint over an
//! explicit work list instead of mutating a list mid-iteration.
//!
//! [`can_batch`]: Batch::can_batch

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use starcache_predicate::CompoundPredicate;
use starcache_types::{Datum, DialectCaps, MeasureExpr, Star};
use tracing::debug;

use crate::request::{AggregationKey, CellRequest};

/// Requests sharing one aggregation key; resolves to one SQL.
#[derive(Debug, Clone)]
pub struct Batch {
    pub key: AggregationKey,
    pub star: Arc<Star>,
    /// Accumulated coordinate values per constrained column.
    pub value_sets: BTreeMap<u32, BTreeSet<Datum>>,
    /// Distinct measures in first-seen order.
    pub measures: Vec<MeasureExpr>,
    pub compound: Vec<CompoundPredicate>,
    /// Number of requests absorbed, after deduplication.
    pub request_count: usize,
}

impl Batch {
    /// Empty batch for a bucket.
    #[must_use]
    pub fn new(key: AggregationKey, star: Arc<Star>, compound: Vec<CompoundPredicate>) -> Self {
        let value_sets = key.bitkey.ones().map(|bit| (bit, BTreeSet::new())).collect();
        Self {
            key,
            star,
            value_sets,
            measures: Vec::new(),
            compound,
            request_count: 0,
        }
    }

    /// Fold one request into the batch.
    pub fn add_request(&mut self, request: &CellRequest) {
        for (bit, value) in &request.coords {
            self.value_sets.entry(*bit).or_default().insert(value.clone());
        }
        if !self.measures.contains(&request.measure) {
            self.measures.push(request.measure.clone());
        }
        self.request_count += 1;
    }

    /// Whether any measure is a distinct count.
    #[must_use]
    pub fn has_distinct(&self) -> bool {
        self.measures.iter().any(|m| m.aggregator.is_distinct())
    }

    /// Whether this batch can serve as the detailed side of a grouping-set
    /// query answering `other` as a rolled-up summary.
    ///
    /// All of the following must hold:
    /// 1. this batch's columns are a superset of the other's;
    /// 2. both read the same star;
    /// 3. the measure lists are identical;
    /// 4. neither carries a distinct-count measure;
    /// 5. the closure-column masks are equal, because the ALL member of a
    ///    parent-child closure is not the sum of its children;
    /// 6. value sets agree on shared columns, and on columns only this
    ///    batch constrains it covers the column's whole domain.
    #[must_use]
    pub fn can_batch(&self, other: &Self) -> bool {
        if !self.key.bitkey.is_superset_of(&other.key.bitkey) {
            return false;
        }
        if self.key.star_key != other.key.star_key
            || self.key.compound_keys != other.key.compound_keys
        {
            return false;
        }
        if !same_measures(&self.measures, &other.measures) {
            return false;
        }
        if self.has_distinct() || other.has_distinct() {
            return false;
        }
        let closures = self.star.closure_columns();
        if self.key.bitkey.and(closures) != other.key.bitkey.and(closures) {
            return false;
        }
        for bit in self.key.bitkey.ones() {
            let mine = self.value_sets.get(&bit);
            if other.key.bitkey.get(bit) {
                if mine != other.value_sets.get(&bit) {
                    return false;
                }
            } else {
                let covers_domain = mine.is_some_and(|values| {
                    self.star
                        .column(bit)
                        .is_some_and(|column| values.len() as u64 == column.cardinality)
                });
                if !covers_domain {
                    return false;
                }
            }
        }
        true
    }

    /// Deterministic batch order: column count, then column names, then
    /// value-set contents. Drives reproducible SQL.
    #[must_use]
    pub fn batch_cmp(&self, other: &Self) -> Ordering {
        let my_count = self.key.bitkey.cardinality();
        let their_count = other.key.bitkey.cardinality();
        my_count
            .cmp(&their_count)
            .then_with(|| self.column_names().cmp(&other.column_names()))
            .then_with(|| {
                let mine: Vec<&BTreeSet<Datum>> = self.value_sets.values().collect();
                let theirs: Vec<&BTreeSet<Datum>> = other.value_sets.values().collect();
                mine.cmp(&theirs)
            })
    }

    fn column_names(&self) -> Vec<String> {
        self.key
            .bitkey
            .ones()
            .map(|bit| {
                self.star
                    .column(bit)
                    .map_or_else(|| format!("col{bit}"), |c| c.name.clone())
            })
            .collect()
    }
}

fn same_measures(a: &[MeasureExpr], b: &[MeasureExpr]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut mine: Vec<&MeasureExpr> = a.iter().collect();
    let mut theirs: Vec<&MeasureExpr> = b.iter().collect();
    mine.sort_by(|x, y| x.name.cmp(&y.name));
    theirs.sort_by(|x, y| x.name.cmp(&y.name));
    mine == theirs
}

/// A fused group: one detailed batch plus its rolled-up summaries.
#[derive(Debug, Clone)]
pub struct CompositeBatch {
    pub detailed: Batch,
    pub summaries: Vec<Batch>,
}

impl CompositeBatch {
    fn single(detailed: Batch) -> Self {
        Self {
            detailed,
            summaries: Vec::new(),
        }
    }

    fn absorb(&mut self, other: Self) {
        self.summaries.push(other.detailed);
        self.summaries.extend(other.summaries);
    }
}

/// What the loader receives: a lone batch or a fused group.
#[derive(Debug, Clone)]
pub enum LoadUnit {
    Single(Batch),
    Composite(CompositeBatch),
}

impl LoadUnit {
    /// The detailed batch of the unit.
    #[must_use]
    pub const fn detailed(&self) -> &Batch {
        match self {
            Self::Single(batch) => batch,
            Self::Composite(composite) => &composite.detailed,
        }
    }

    /// Detailed batch first, then summaries in discovery order.
    #[must_use]
    pub fn batches(&self) -> Vec<&Batch> {
        match self {
            Self::Single(batch) => vec![batch],
            Self::Composite(composite) => std::iter::once(&composite.detailed)
                .chain(composite.summaries.iter())
                .collect(),
        }
    }
}

/// Merge mergeable batches into composites.
///
/// Runs the pairwise scan to fixpoint: each round finds the first pair
/// where one side can absorb the other and merges it. When both directions
/// hold the bit keys are equal and the batch comparator picks the detailed
/// side, which keeps the merge order-deterministic. The final unit list is
/// sorted by the comparator.
#[must_use]
pub fn group_batches(batches: Vec<Batch>) -> Vec<LoadUnit> {
    let mut units: Vec<CompositeBatch> = batches.into_iter().map(CompositeBatch::single).collect();

    'merge: loop {
        for i in 0..units.len() {
            for j in (i + 1)..units.len() {
                let forward = units[i].detailed.can_batch(&units[j].detailed);
                let backward = units[j].detailed.can_batch(&units[i].detailed);
                if !forward && !backward {
                    continue;
                }
                let keep_i = if forward && backward {
                    units[i].detailed.batch_cmp(&units[j].detailed) != Ordering::Greater
                } else {
                    forward
                };
                if keep_i {
                    let absorbed = units.remove(j);
                    units[i].absorb(absorbed);
                } else {
                    let absorbed = units.remove(i);
                    // After removing `i`, the absorber shifted down by one.
                    units[j - 1].absorb(absorbed);
                }
                continue 'merge;
            }
        }
        break;
    }

    units.sort_by(|a, b| a.detailed.batch_cmp(&b.detailed));
    debug!(units = units.len(), "batch grouping complete");
    units
        .into_iter()
        .map(|composite| {
            if composite.summaries.is_empty() {
                LoadUnit::Single(composite.detailed)
            } else {
                LoadUnit::Composite(composite)
            }
        })
        .collect()
}

/// Split a batch so no statement carries more than one distinct-count
/// expression when the dialect cannot express that.
///
/// Distinct measures sharing one SQL expression stay together; each
/// expression group becomes its own load. Non-distinct measures remain in
/// the base batch.
#[must_use]
pub fn split_distinct(batch: Batch, caps: &DialectCaps) -> Vec<Batch> {
    if caps.allows_multiple_count_distinct || !batch.has_distinct() {
        return vec![batch];
    }

    let mut expression_groups: BTreeMap<String, Vec<MeasureExpr>> = BTreeMap::new();
    let mut plain = Vec::new();
    for measure in &batch.measures {
        if measure.aggregator.is_distinct() {
            expression_groups
                .entry(measure.expression.clone())
                .or_default()
                .push(measure.clone());
        } else {
            plain.push(measure.clone());
        }
    }

    let mut out = Vec::new();
    if !plain.is_empty() {
        let mut base = batch.clone();
        base.measures = plain;
        out.push(base);
    }
    for (_, group) in expression_groups {
        let mut split = batch.clone();
        split.measures = group;
        out.push(split);
    }
    out
}
