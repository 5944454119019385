//! OLAP segment cache and batched cell-loading pipeline.
//!
//! The [`AggregationEngine`] is the per-server entry point: it owns the
//! cache manager thread, the SQL executor pool, and the loader, and hands
//! out one [`BatchReader`] per statement. There are no ambient globals;
//! construct one engine per server instance.
//!
//! ```no_run
//! use std::sync::Arc;
//! use starcache::{AggregationEngine, CacheConfig, DialectCaps};
//! # use starcache::testing::InMemoryFactTable;
//! # let executor = Arc::new(InMemoryFactTable::new(Vec::new()));
//!
//! let engine = AggregationEngine::new(
//!     CacheConfig::default(),
//!     DialectCaps::default(),
//!     executor,
//!     Vec::new(),
//! );
//! let mut reader = engine.reader();
//! // evaluator drives reader.get(..) / reader.load_aggregations(..)
//! engine.shutdown();
//! ```

pub mod engine;
pub mod testing;

pub use engine::AggregationEngine;

pub use starcache_batch::{
    AggregationKey, Batch, BatchReader, CellLookup, CellRequest, CompositeBatch, LoadUnit,
};
pub use starcache_cache::{
    CacheControl, CacheManager, CacheRegion, Completion, FlushOutcome, SegmentCache,
    SegmentCacheEvent, SegmentEventKind, SegmentFuture,
};
pub use starcache_error::{Result, StarCacheError};
pub use starcache_index::SegmentIndex;
pub use starcache_loader::{
    AggMatch, AggTableDesc, AggregateMatcher, ColumnType, GroupingSetSpec, NoAggregates,
    RowCursor, SegmentLoader, SqlExecutor, SqlPool, SqlRow, StaticAggregateMatcher,
};
pub use starcache_predicate::{ColumnPredicate, CompoundDisjunct, CompoundPredicate};
pub use starcache_segment::{
    BodyCells, Segment, SegmentBody, SegmentDataset, SegmentHeader, SegmentWithData,
};
pub use starcache_types::{
    BitKey, CacheConfig, CellKey, CellValue, ColumnDesc, Datum, DialectCaps, ExecutionContext,
    MeasureExpr, RollupAggregator, Star, StarId,
};
