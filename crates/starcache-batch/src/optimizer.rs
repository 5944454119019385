//! Predicate optimization before SQL generation.
//!
//! Two mechanisms widen constraints to `TRUE`: an absolute cap on IN-list
//! length, and bloat-based elimination. The bloat of a constraint is the
//! share of the column's effective domain it covers; a constraint covering
//! nearly the whole domain buys almost no selectivity, so dropping it
//! shrinks the SQL at a bounded cost in fetched rows. Constraints are
//! dropped in bloat-descending order while the product of dropped bloats
//! stays at or above 0.5, which caps the segment growth at 2x.

use std::collections::BTreeMap;

use starcache_predicate::ColumnPredicate;
use starcache_types::CacheConfig;
use tracing::debug;

use crate::grouping::Batch;

/// Share of the dropped-constraint selectivity the optimizer will give up.
const BLOAT_LIMIT: f64 = 0.5;

/// Compute the WHERE-clause predicate per constrained column.
///
/// Starts from the batch's value enumerations. A constraint whose value
/// count reaches `max_constraints` is unconditionally replaced with `TRUE`
/// (the IN-list would be oversized). With `optimize_predicates` enabled,
/// further constraints are eliminated by bloat.
#[must_use]
pub fn optimize_predicates(batch: &Batch, config: &CacheConfig) -> BTreeMap<u32, ColumnPredicate> {
    let mut predicates: BTreeMap<u32, ColumnPredicate> = batch
        .value_sets
        .iter()
        .map(|(bit, values)| (*bit, ColumnPredicate::values(values.iter().cloned())))
        .collect();

    for (bit, values) in &batch.value_sets {
        if values.len() >= config.max_constraints {
            debug!(
                bit,
                values = values.len(),
                cap = config.max_constraints,
                "constraint exceeds the IN-list cap, widening to TRUE"
            );
            predicates.insert(*bit, ColumnPredicate::True);
        }
    }

    if !config.optimize_predicates {
        return predicates;
    }

    // Bloat per still-constrained column, widest first.
    let mut bloats: Vec<(u32, f64)> = batch
        .value_sets
        .iter()
        .filter(|(bit, _)| !matches!(predicates.get(bit), Some(ColumnPredicate::True)))
        .filter_map(|(bit, values)| {
            let column = batch.star.column(*bit)?;
            let effective = column
                .parent_child_count
                .or(column.level_cardinality)
                .unwrap_or(column.cardinality)
                .max(1);
            Some((*bit, values.len() as f64 / effective as f64))
        })
        .collect();
    bloats.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

    let mut dropped_product = 1.0_f64;
    for (bit, bloat) in bloats {
        if dropped_product * bloat < BLOAT_LIMIT {
            break;
        }
        dropped_product *= bloat;
        debug!(bit, bloat, "constraint eliminated by bloat");
        predicates.insert(bit, ColumnPredicate::True);
    }

    predicates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::CellRequest;
    use starcache_types::{ColumnDesc, Datum, MeasureExpr, RollupAggregator, Star, StarId};
    use std::sync::Arc;

    fn star_with_cardinalities(year_card: u64, state_card: u64) -> Arc<Star> {
        Arc::new(Star::new(
            StarId::new("sales", "schema-v1", "Sales", "sales_fact"),
            vec![
                ColumnDesc::plain("year", year_card),
                ColumnDesc::plain("state", state_card),
            ],
        ))
    }

    fn batch_with_values(star: &Arc<Star>, bit: u32, count: i64) -> Batch {
        let measure = MeasureExpr::new("Unit Sales", "unit_sales", RollupAggregator::Sum);
        let first = CellRequest::new(
            Arc::clone(star),
            measure.clone(),
            [(bit, Datum::Int(0))],
            Vec::new(),
        );
        let mut batch = Batch::new(first.aggregation_key(), Arc::clone(star), Vec::new());
        for value in 0..count {
            let request = CellRequest::new(
                Arc::clone(star),
                measure.clone(),
                [(bit, Datum::Int(value))],
                Vec::new(),
            );
            batch.add_request(&request);
        }
        batch
    }

    #[test]
    fn test_high_bloat_constraint_widens_to_true() {
        // 48 of 50 values constrained: bloat 0.96, above the 0.5 limit.
        let star = star_with_cardinalities(50, 50);
        let batch = batch_with_values(&star, 0, 48);
        let config = CacheConfig::default()
            .with_max_constraints(1000)
            .with_optimize_predicates(true);
        let predicates = optimize_predicates(&batch, &config);
        assert_eq!(predicates.get(&0), Some(&ColumnPredicate::True));
    }

    #[test]
    fn test_selective_constraint_survives() {
        // 3 of 50 values: bloat 0.06, dropping it would cost 16x the rows.
        let star = star_with_cardinalities(50, 50);
        let batch = batch_with_values(&star, 0, 3);
        let config = CacheConfig::default().with_optimize_predicates(true);
        let predicates = optimize_predicates(&batch, &config);
        assert!(matches!(
            predicates.get(&0),
            Some(ColumnPredicate::ValueIn(_))
        ));
    }

    #[test]
    fn test_max_constraints_cap_is_unconditional() {
        let star = star_with_cardinalities(1_000_000, 50);
        let batch = batch_with_values(&star, 0, 12);
        // Bloat is tiny, but the cap fires regardless of optimization.
        let config = CacheConfig::default()
            .with_max_constraints(12)
            .with_optimize_predicates(false);
        let predicates = optimize_predicates(&batch, &config);
        assert_eq!(predicates.get(&0), Some(&ColumnPredicate::True));
    }

    #[test]
    fn test_optimization_disabled_keeps_constraints() {
        let star = star_with_cardinalities(50, 50);
        let batch = batch_with_values(&star, 0, 48);
        let config = CacheConfig::default().with_optimize_predicates(false);
        let predicates = optimize_predicates(&batch, &config);
        assert!(matches!(
            predicates.get(&0),
            Some(ColumnPredicate::ValueIn(_))
        ));
    }

    #[test]
    fn test_level_cardinality_preferred_over_raw() {
        // Raw cardinality says 1000 (bloat 0.048), but the cached level
        // cardinality of 50 says the constraint covers nearly everything.
        let star = Arc::new(Star::new(
            StarId::new("sales", "schema-v1", "Sales", "sales_fact"),
            vec![ColumnDesc {
                name: "year".to_owned(),
                cardinality: 1000,
                level_cardinality: Some(50),
                parent_child_count: None,
                is_closure: false,
            }],
        ));
        let batch = batch_with_values(&star, 0, 48);
        let config = CacheConfig::default().with_optimize_predicates(true);
        let predicates = optimize_predicates(&batch, &config);
        assert_eq!(predicates.get(&0), Some(&ColumnPredicate::True));
    }
}
