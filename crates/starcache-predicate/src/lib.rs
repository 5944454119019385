//! Decidable constraints over column values.
//!
//! A [`ColumnPredicate`] constrains one column; a [`CompoundPredicate`] is a
//! disjunction of multi-column conjunctions (e.g. `(year=1997 AND
//! quarter=Q2) OR (year=1998 AND quarter=Q1)`). Predicates travel inside
//! segment headers, so they serialize, and their canonical string forms are
//! the equality keys used to bucket batches.

pub mod column;
pub mod compound;

pub use column::{ColumnPredicate, MemberPredicate};
pub use compound::{CompoundDisjunct, CompoundPredicate};
