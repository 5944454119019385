//! Cell requests and their batch-bucket identity.

use std::collections::BTreeMap;
use std::sync::Arc;

use starcache_predicate::CompoundPredicate;
use starcache_types::{BitKey, Datum, MeasureExpr, Star};

/// A demand for one measure value at a specific coordinate.
#[derive(Debug, Clone)]
pub struct CellRequest {
    pub star: Arc<Star>,
    pub measure: MeasureExpr,
    /// Columns the request constrains.
    pub constrained: BitKey,
    /// One value per constrained column.
    pub coords: BTreeMap<u32, Datum>,
    /// Constraints on the fact rows aggregated into the cell.
    pub compound: Vec<CompoundPredicate>,
    /// A contradictory request (e.g. an empty slicer) that can be
    /// short-circuited to the null sentinel.
    pub unsatisfiable: bool,
}

impl CellRequest {
    /// Request for a cell at the given coordinates.
    #[must_use]
    pub fn new(
        star: Arc<Star>,
        measure: MeasureExpr,
        coords: impl IntoIterator<Item = (u32, Datum)>,
        compound: Vec<CompoundPredicate>,
    ) -> Self {
        let coords: BTreeMap<u32, Datum> = coords.into_iter().collect();
        let mut constrained = star.empty_key();
        for bit in coords.keys() {
            constrained.set(*bit);
        }
        Self {
            star,
            measure,
            constrained,
            coords,
            compound,
            unsatisfiable: false,
        }
    }

    /// Request that can never produce a value.
    #[must_use]
    pub fn unsatisfiable(star: Arc<Star>, measure: MeasureExpr) -> Self {
        let constrained = star.empty_key();
        Self {
            star,
            measure,
            constrained,
            coords: BTreeMap::new(),
            compound: Vec::new(),
            unsatisfiable: true,
        }
    }

    /// Sorted canonical forms of the compound predicates.
    #[must_use]
    pub fn compound_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .compound
            .iter()
            .map(CompoundPredicate::canonical_key)
            .collect();
        keys.sort();
        keys
    }

    /// Identity of the batch bucket this request falls into.
    #[must_use]
    pub fn aggregation_key(&self) -> AggregationKey {
        AggregationKey {
            star_key: star_key(&self.star),
            bitkey: self.constrained.clone(),
            compound_keys: self.compound_keys(),
        }
    }

    /// Full identity used to deduplicate recorded requests.
    #[must_use]
    pub fn dedup_key(&self) -> (AggregationKey, String, Vec<(u32, Datum)>) {
        (
            self.aggregation_key(),
            self.measure.name.clone(),
            self.coords
                .iter()
                .map(|(bit, value)| (*bit, value.clone()))
                .collect(),
        )
    }
}

fn star_key(star: &Star) -> String {
    let id = star.id();
    format!(
        "{}#{:016x}/{}/{}",
        id.schema_name, id.schema_checksum, id.cube_name, id.fact_table
    )
}

/// Identity of a batch bucket. Equality is structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AggregationKey {
    pub star_key: String,
    pub bitkey: BitKey,
    pub compound_keys: Vec<String>,
}
