//! Core value and identity types for the starcache segment cache.
//!
//! Everything here is a leaf: plain data with no behavior that reaches into
//! other subsystems. Bit positions in a [`BitKey`] derive from schema column
//! order and are stable across runs; the wire format depends on that.

pub mod bitkey;
pub mod config;
pub mod execution;
pub mod star;
pub mod value;

pub use bitkey::BitKey;
pub use config::{CacheConfig, DialectCaps};
pub use execution::ExecutionContext;
pub use star::{ColumnDesc, ColumnMeta, MeasureExpr, RollupAggregator, Star, StarId};
pub use value::{CellKey, CellValue, Datum};
