//! Multi-column (compound) predicates.
//!
//! A compound predicate is an OR of conjunctions, each conjunction binding
//! one or more columns, e.g. `(year=1997 AND quarter=Q2) OR (year=1998 AND
//! quarter=Q1)`. Compound predicates constrain the fact rows aggregated
//! into a cell, so two requests may share a cached segment only when their
//! compound predicate lists are equivalent; the [`canonical_key`] form is
//! that equivalence key.
//!
//! [`canonical_key`]: CompoundPredicate::canonical_key

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use starcache_types::{BitKey, Datum};

use crate::column::ColumnPredicate;

/// One conjunction inside a compound predicate: AND over `(bit, predicate)`
/// terms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompoundDisjunct {
    terms: Vec<(u32, ColumnPredicate)>,
}

impl CompoundDisjunct {
    /// Build a conjunction; terms are sorted by bit position.
    #[must_use]
    pub fn new(terms: impl IntoIterator<Item = (u32, ColumnPredicate)>) -> Self {
        let mut terms: Vec<(u32, ColumnPredicate)> = terms.into_iter().collect();
        terms.sort_by_key(|(bit, _)| *bit);
        Self { terms }
    }

    /// Terms in bit order.
    #[must_use]
    pub fn terms(&self) -> &[(u32, ColumnPredicate)] {
        &self.terms
    }

    /// Whether every term accepts its column's value. A term over a column
    /// absent from `values` fails the conjunction.
    #[must_use]
    pub fn evaluate(&self, values: &BTreeMap<u32, Datum>) -> bool {
        self.terms.iter().all(|(bit, predicate)| {
            values
                .get(bit)
                .is_some_and(|value| predicate.evaluate(value))
        })
    }
}

/// OR of multi-column conjunctions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompoundPredicate {
    bitkey: BitKey,
    disjuncts: Vec<CompoundDisjunct>,
}

impl CompoundPredicate {
    /// Build a compound predicate over a star of the given bit width.
    #[must_use]
    pub fn new(width: u32, disjuncts: Vec<CompoundDisjunct>) -> Self {
        let mut bitkey = BitKey::new(width);
        for disjunct in &disjuncts {
            for (bit, _) in disjunct.terms() {
                bitkey.set(*bit);
            }
        }
        Self { bitkey, disjuncts }
    }

    /// Columns mentioned by any disjunct.
    #[must_use]
    pub const fn bitkey(&self) -> &BitKey {
        &self.bitkey
    }

    /// The disjuncts.
    #[must_use]
    pub fn disjuncts(&self) -> &[CompoundDisjunct] {
        &self.disjuncts
    }

    /// Whether any disjunct accepts the value assignment.
    #[must_use]
    pub fn evaluate(&self, values: &BTreeMap<u32, Datum>) -> bool {
        self.disjuncts.iter().any(|d| d.evaluate(values))
    }

    /// Deterministic equivalence key: sorted canonical disjunct strings.
    #[must_use]
    pub fn canonical_key(&self) -> String {
        let mut parts: Vec<String> = self
            .disjuncts
            .iter()
            .map(|disjunct| {
                let terms: Vec<String> = disjunct
                    .terms()
                    .iter()
                    .map(|(bit, predicate)| format!("{bit}:{predicate}"))
                    .collect();
                format!("({})", terms.join("&"))
            })
            .collect();
        parts.sort();
        parts.join("|")
    }

    /// SQL rendering via a bit-to-column-name resolver. `None` when the
    /// predicate does not constrain anything.
    #[must_use]
    pub fn sql(&self, column_name: impl Fn(u32) -> String) -> Option<String> {
        let clauses: Vec<String> = self
            .disjuncts
            .iter()
            .map(|disjunct| {
                let terms: Vec<String> = disjunct
                    .terms()
                    .iter()
                    .filter_map(|(bit, predicate)| predicate.sql(&column_name(*bit)))
                    .collect();
                if terms.is_empty() {
                    "1 = 1".to_owned()
                } else {
                    format!("({})", terms.join(" AND "))
                }
            })
            .collect();
        if clauses.is_empty() {
            None
        } else {
            Some(format!("({})", clauses.join(" OR ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(v: i64) -> Datum {
        Datum::Int(v)
    }

    fn quarters() -> CompoundPredicate {
        // (year=1997 AND quarter='Q2') OR (year=1998 AND quarter='Q1')
        CompoundPredicate::new(
            8,
            vec![
                CompoundDisjunct::new([
                    (0, ColumnPredicate::ValueEq(int(1997))),
                    (1, ColumnPredicate::ValueEq(Datum::from("Q2"))),
                ]),
                CompoundDisjunct::new([
                    (0, ColumnPredicate::ValueEq(int(1998))),
                    (1, ColumnPredicate::ValueEq(Datum::from("Q1"))),
                ]),
            ],
        )
    }

    #[test]
    fn test_bitkey_spans_all_disjuncts() {
        let pred = quarters();
        assert!(pred.bitkey().get(0));
        assert!(pred.bitkey().get(1));
        assert_eq!(pred.bitkey().cardinality(), 2);
    }

    #[test]
    fn test_evaluate_or_of_ands() {
        let pred = quarters();
        let mut row = BTreeMap::new();
        row.insert(0, int(1997));
        row.insert(1, Datum::from("Q2"));
        assert!(pred.evaluate(&row));

        row.insert(1, Datum::from("Q1"));
        assert!(!pred.evaluate(&row), "1997/Q1 matches neither disjunct");

        row.insert(0, int(1998));
        assert!(pred.evaluate(&row));
    }

    #[test]
    fn test_missing_column_fails_conjunction() {
        let pred = quarters();
        let mut row = BTreeMap::new();
        row.insert(0, int(1997));
        assert!(!pred.evaluate(&row));
    }

    #[test]
    fn test_canonical_key_is_order_insensitive() {
        let forward = quarters();
        let reversed = CompoundPredicate::new(
            8,
            vec![
                CompoundDisjunct::new([
                    (0, ColumnPredicate::ValueEq(int(1998))),
                    (1, ColumnPredicate::ValueEq(Datum::from("Q1"))),
                ]),
                CompoundDisjunct::new([
                    (1, ColumnPredicate::ValueEq(Datum::from("Q2"))),
                    (0, ColumnPredicate::ValueEq(int(1997))),
                ]),
            ],
        );
        assert_eq!(forward.canonical_key(), reversed.canonical_key());
    }

    #[test]
    fn test_sql_rendering() {
        let pred = quarters();
        let sql = pred
            .sql(|bit| if bit == 0 { "year" } else { "quarter" }.to_owned())
            .expect("constrained predicate renders");
        assert_eq!(
            sql,
            "((year = 1997 AND quarter = 'Q2') OR (year = 1998 AND quarter = 'Q1'))"
        );
    }
}
