//! Aggregate-table targeting: the decision interface.
//!
//! Whether a load may read a pre-materialized summary table instead of the
//! fact table. Only the decision lives here; recognizing and describing
//! aggregate tables belongs to the schema layer.

use std::collections::BTreeSet;

use starcache_types::{BitKey, MeasureExpr};

/// A chosen aggregate table and whether reading it still requires rollup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggMatch {
    /// Table to read instead of the fact table.
    pub table: String,
    /// Whether the aggregate is coarser than requested and must be rolled
    /// up further.
    pub rollup: bool,
}

/// Decides whether an aggregate table can serve a load.
pub trait AggregateMatcher: Send + Sync {
    /// Pick a table for the requested level columns and measures, or
    /// `None` to read the fact table.
    fn find_agg(&self, levels: &BitKey, measures: &[MeasureExpr]) -> Option<AggMatch>;
}

/// Matcher that never targets an aggregate table.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAggregates;

impl AggregateMatcher for NoAggregates {
    fn find_agg(&self, _levels: &BitKey, _measures: &[MeasureExpr]) -> Option<AggMatch> {
        None
    }
}

/// Description of one candidate aggregate table.
#[derive(Debug, Clone)]
pub struct AggTableDesc {
    pub table: String,
    /// Level columns the aggregate carries.
    pub levels: BitKey,
    /// Measure names the aggregate carries.
    pub measures: BTreeSet<String>,
    /// Level columns carried by distinct-count measures of the aggregate.
    /// Distinct counts cannot be rolled up, so a distinct load needs its
    /// foreign keys present here.
    pub distinct_levels: BitKey,
}

/// Matcher over a fixed list of aggregate-table descriptions.
#[derive(Debug, Clone, Default)]
pub struct StaticAggregateMatcher {
    candidates: Vec<AggTableDesc>,
}

impl StaticAggregateMatcher {
    /// Matcher over the given candidates; earlier candidates win ties.
    #[must_use]
    pub fn new(candidates: Vec<AggTableDesc>) -> Self {
        Self { candidates }
    }
}

impl AggregateMatcher for StaticAggregateMatcher {
    fn find_agg(&self, levels: &BitKey, measures: &[MeasureExpr]) -> Option<AggMatch> {
        let requested: BTreeSet<&str> = measures.iter().map(|m| m.name.as_str()).collect();
        let has_distinct = measures.iter().any(|m| m.aggregator.is_distinct());

        self.candidates.iter().find_map(|candidate| {
            let carries_measures = requested
                .iter()
                .all(|name| candidate.measures.contains(*name));
            if !carries_measures {
                return None;
            }
            if has_distinct {
                // Distinct counts do not roll up: the aggregate must sit at
                // exactly the requested granularity and carry every
                // requested level through a distinct measure.
                let exact = candidate.levels == *levels;
                let fk_carried = candidate.distinct_levels.is_superset_of(levels);
                (exact && fk_carried).then(|| AggMatch {
                    table: candidate.table.clone(),
                    rollup: false,
                })
            } else {
                candidate.levels.is_superset_of(levels).then(|| AggMatch {
                    table: candidate.table.clone(),
                    rollup: candidate.levels != *levels,
                })
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use starcache_types::RollupAggregator;

    fn sum_measure() -> MeasureExpr {
        MeasureExpr::new("Unit Sales", "unit_sales", RollupAggregator::Sum)
    }

    fn distinct_measure() -> MeasureExpr {
        MeasureExpr::new(
            "Customer Count",
            "customer_id",
            RollupAggregator::DistinctCount,
        )
    }

    fn matcher() -> StaticAggregateMatcher {
        StaticAggregateMatcher::new(vec![AggTableDesc {
            table: "agg_year_state".to_owned(),
            levels: BitKey::with_bits(4, [0, 1]),
            measures: ["Unit Sales", "Customer Count"]
                .into_iter()
                .map(str::to_owned)
                .collect(),
            distinct_levels: BitKey::with_bits(4, [0, 1]),
        }])
    }

    #[test]
    fn test_superset_match_flags_rollup() {
        let m = matcher();
        let exact = m
            .find_agg(&BitKey::with_bits(4, [0, 1]), &[sum_measure()])
            .expect("exact match");
        assert!(!exact.rollup);

        let coarser = m
            .find_agg(&BitKey::with_bits(4, [0]), &[sum_measure()])
            .expect("subset of aggregate levels matches");
        assert!(coarser.rollup, "coarser request needs rollup");
    }

    #[test]
    fn test_missing_level_rejects() {
        let m = matcher();
        assert!(
            m.find_agg(&BitKey::with_bits(4, [0, 2]), &[sum_measure()])
                .is_none()
        );
    }

    #[test]
    fn test_distinct_requires_exact_levels() {
        let m = matcher();
        assert!(
            m.find_agg(&BitKey::with_bits(4, [0, 1]), &[distinct_measure()])
                .is_some()
        );
        assert!(
            m.find_agg(&BitKey::with_bits(4, [0]), &[distinct_measure()])
                .is_none(),
            "distinct counts cannot roll up from a finer aggregate"
        );
    }

    #[test]
    fn test_no_aggregates_always_declines() {
        assert!(
            NoAggregates
                .find_agg(&BitKey::with_bits(4, [0]), &[sum_measure()])
                .is_none()
        );
    }
}
