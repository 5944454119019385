//! The SQL executor seam.
//!
//! Dialect generation and driver execution live outside this subsystem;
//! the loader sees only this interface. Rows carry the grouping-set id the
//! dialect reported, column values aligned with the detailed column list,
//! and one slot per requested measure.

use starcache_error::Result;
use starcache_types::{CellValue, Datum};

/// Column type hints handed to the executor alongside the statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Int,
    Double,
    Str,
}

/// One result row of a grouping-set query.
#[derive(Debug, Clone)]
pub struct SqlRow {
    /// Index into the requested grouping sets.
    pub grouping_set: usize,
    /// Values aligned with the detailed column list; `None` for columns
    /// rolled up by this row's grouping set.
    pub columns: Vec<Option<Datum>>,
    /// One aggregated value per requested measure; `None` where the
    /// aggregate was SQL NULL.
    pub measures: Vec<Option<CellValue>>,
}

/// Streaming access to a result set. Termination is explicit: `Ok(None)`.
pub trait RowCursor: Send {
    /// Next row, or `Ok(None)` at the end of the result.
    fn next_row(&mut self) -> Result<Option<SqlRow>>;

    /// Ask the underlying statement to cancel and close.
    fn cancel(&mut self);
}

/// Executes one SQL statement and exposes its rows.
pub trait SqlExecutor: Send + Sync {
    /// Run `sql`; `column_types` describes the non-measure columns in
    /// order.
    fn execute(&self, sql: &str, column_types: &[ColumnType]) -> Result<Box<dyn RowCursor>>;
}
