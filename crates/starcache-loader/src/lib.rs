//! Bulk fact-table loads: grouping-set SQL, row streaming, hydration.
//!
//! The loader turns grouping-set specifications into one SQL statement,
//! streams the result into per-(set, measure) dataset builders on the SQL
//! pool, and registers the resulting segments through the cache manager.
//! A failing load fails every future of the invocation; partial success is
//! not representable.

pub mod agg;
pub mod loader;
pub mod pool;
pub mod sql;

pub use agg::{AggMatch, AggTableDesc, AggregateMatcher, NoAggregates, StaticAggregateMatcher};
pub use loader::{GroupingSetSpec, LoadColumn, SegmentLoader};
pub use pool::SqlPool;
pub use sql::{ColumnType, RowCursor, SqlExecutor, SqlRow};
