//! The per-statement batch reader.
//!
//! One reader per statement; no state is shared between evaluators. The
//! reader answers per-cell probes from its statement-local segments,
//! records misses, and converts the backlog into loads through a single
//! cache manager command. `load_aggregations` is the only point at which
//! an evaluator thread blocks.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use starcache_cache::{CacheManager, ManagerState, SegmentFuture};
use starcache_error::{Result, StarCacheError};
use starcache_loader::{GroupingSetSpec, LoadColumn, SegmentLoader};
use starcache_segment::SegmentWithData;
use starcache_types::{CellValue, DialectCaps, ExecutionContext};
use tracing::debug;

use crate::grouping::{Batch, LoadUnit, group_batches, split_distinct};
use crate::optimizer::optimize_predicates;
use crate::request::{AggregationKey, CellRequest};

/// Outcome of a per-cell probe.
#[derive(Debug, Clone, PartialEq)]
pub enum CellLookup {
    /// The cell's value, served from a statement-local segment.
    Value(CellValue),
    /// The cell is known and empty: a matching segment is present but no
    /// fact rows produced this coordinate, or the request was
    /// unsatisfiable.
    Null,
    /// Not resolvable yet; the caller re-runs after `load_aggregations`.
    NotReady,
}

/// Collects cell requests for one statement and resolves them in bulk.
pub struct BatchReader {
    manager: CacheManager,
    loader: Arc<SegmentLoader>,
    caps: DialectCaps,
    quantum: usize,
    local: Vec<Arc<SegmentWithData>>,
    requests: Vec<CellRequest>,
    seen: HashSet<(AggregationKey, String, Vec<(u32, starcache_types::Datum)>)>,
    recorded: usize,
    hit_count: usize,
    miss_count: usize,
    pending_count: usize,
}

impl std::fmt::Debug for BatchReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchReader")
            .field("local_segments", &self.local.len())
            .field("outstanding", &self.requests.len())
            .field("hits", &self.hit_count)
            .field("misses", &self.miss_count)
            .finish()
    }
}

impl BatchReader {
    /// Reader over a manager, a loader, and the dialect capabilities.
    #[must_use]
    pub fn new(
        manager: CacheManager,
        loader: Arc<SegmentLoader>,
        caps: DialectCaps,
        quantum: usize,
    ) -> Self {
        Self {
            manager,
            loader,
            caps,
            quantum: quantum.max(1),
            local: Vec::new(),
            requests: Vec::new(),
            seen: HashSet::new(),
            recorded: 0,
            hit_count: 0,
            miss_count: 0,
            pending_count: 0,
        }
    }

    /// Probe one cell.
    ///
    /// Misses are recorded for the next `load_aggregations`; every
    /// `quantum` recorded requests the probe fails with `QuantumExceeded`
    /// so the evaluator can flush a batch early. The request is recorded
    /// before the signal, so nothing is lost.
    pub fn get(&mut self, request: &CellRequest) -> Result<CellLookup> {
        if request.unsatisfiable {
            return Ok(CellLookup::Null);
        }

        let compound_keys = request.compound_keys();
        for segment in &self.local {
            let header = segment.header();
            let usable = header.matches_prefix(
                request.star.id(),
                &request.star.id().fact_table,
                &request.constrained,
            ) && header.measure_name == request.measure.name
                && header.compound_equivalent(&compound_keys)
                && header.can_serve(&request.coords);
            if usable {
                self.hit_count += 1;
                // A servable segment without the cell means the fact table
                // holds no rows there: the cell is empty, not missing.
                return Ok(segment
                    .get(&request.coords)
                    .map_or(CellLookup::Null, |value| CellLookup::Value(value.clone())));
            }
        }

        if self.seen.insert(request.dedup_key()) {
            self.requests.push(request.clone());
            self.miss_count += 1;
            self.recorded += 1;
            if self.recorded % self.quantum == 0 {
                return Err(StarCacheError::QuantumExceeded(self.recorded));
            }
        }
        Ok(CellLookup::NotReady)
    }

    /// Whether requests are outstanding.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.requests.is_empty()
    }

    /// Cells served from statement-local segments.
    #[must_use]
    pub const fn hit_count(&self) -> usize {
        self.hit_count
    }

    /// Recorded cache misses.
    #[must_use]
    pub const fn miss_count(&self) -> usize {
        self.miss_count
    }

    /// Requests satisfied by waiting on another statement's load.
    #[must_use]
    pub const fn pending_count(&self) -> usize {
        self.pending_count
    }

    /// Resolve every outstanding request.
    ///
    /// Returns `false` when there was nothing to do. Otherwise submits one
    /// manager command that turns the backlog into already-satisfied
    /// segments, futures of in-flight loads, and new batched loads; then
    /// blocks on every future and installs the results locally.
    pub fn load_aggregations(&mut self, ctx: &ExecutionContext) -> Result<bool> {
        if self.requests.is_empty() {
            return Ok(false);
        }
        ctx.check_cancel_or_timeout()?;

        let requests = std::mem::take(&mut self.requests);
        self.seen.clear();
        self.recorded = 0;

        let loader = Arc::clone(&self.loader);
        let caps = self.caps;
        let command_ctx = ctx.clone();
        let (satisfied, futures, pending) = self
            .manager
            .execute(move |state| {
                convert_and_load(state, &requests, &loader, caps, &command_ctx)
            })??;

        self.pending_count += pending;
        for segment in satisfied {
            self.install(segment);
        }
        for future in futures {
            ctx.check_cancel_or_timeout()?;
            let segment = future.get()??;
            self.install(segment);
        }
        Ok(true)
    }

    fn install(&mut self, segment: Arc<SegmentWithData>) {
        let fingerprint = segment.header().fingerprint();
        if self
            .local
            .iter()
            .all(|s| s.header().fingerprint() != fingerprint)
        {
            self.local.push(segment);
        }
    }
}

type ConvertResult = (Vec<Arc<SegmentWithData>>, Vec<SegmentFuture>, usize);

/// The single command that converts a request backlog into loads. Runs on
/// the cache manager thread.
fn convert_and_load(
    state: &mut ManagerState,
    requests: &[CellRequest],
    loader: &SegmentLoader,
    caps: DialectCaps,
    ctx: &ExecutionContext,
) -> Result<ConvertResult> {
    let mut satisfied = Vec::new();
    let mut satisfied_fingerprints = HashSet::new();
    let mut futures: Vec<SegmentFuture> = Vec::new();
    let mut pending = 0_usize;
    let mut buckets: HashMap<AggregationKey, Batch> = HashMap::new();

    for request in requests {
        let star_id = request.star.id();
        let compound_keys = request.compound_keys();
        let fact_table = star_id.fact_table.clone();
        if let Some(segment) = state.find_ready_segment(
            star_id,
            &fact_table,
            &request.constrained,
            &request.coords,
            &compound_keys,
            &request.measure.name,
        ) {
            if satisfied_fingerprints.insert(segment.header().fingerprint()) {
                satisfied.push(segment);
            }
            continue;
        }
        if let Some(future) = state.find_loading(
            star_id,
            &star_id.fact_table,
            &request.constrained,
            &request.coords,
            &compound_keys,
            &request.measure.name,
        ) {
            pending += 1;
            futures.push(future);
            continue;
        }
        buckets
            .entry(request.aggregation_key())
            .or_insert_with(|| {
                Batch::new(
                    request.aggregation_key(),
                    Arc::clone(&request.star),
                    request.compound.clone(),
                )
            })
            .add_request(request);
    }

    // Deterministic batch order drives reproducible SQL.
    let mut batches: Vec<Batch> = buckets.into_values().collect();
    batches.sort_by(Batch::batch_cmp);

    let batches: Vec<Batch> = batches
        .into_iter()
        .flat_map(|batch| split_distinct(batch, &caps))
        .collect();

    // Grouping-set fusion is only sound against the fact table; with
    // aggregate targeting enabled each batch picks its own table.
    let fuse = state.config.enable_grouping_sets
        && caps.supports_grouping_sets
        && !state.config.use_aggregates;
    let units: Vec<LoadUnit> = if fuse {
        group_batches(batches)
    } else {
        batches.into_iter().map(LoadUnit::Single).collect()
    };

    debug!(
        requests = requests.len(),
        satisfied = satisfied.len(),
        pending,
        loads = units.len(),
        "request backlog converted"
    );

    for unit in units {
        let star = Arc::clone(&unit.detailed().star);
        let compound = unit.detailed().compound.clone();
        let specs: Vec<GroupingSetSpec> = unit
            .batches()
            .into_iter()
            .map(|batch| {
                let mut sql_predicates = optimize_predicates(batch, &state.config);
                GroupingSetSpec {
                    bitkey: batch.key.bitkey.clone(),
                    columns: batch
                        .value_sets
                        .iter()
                        .map(|(bit, values)| LoadColumn {
                            bit: *bit,
                            name: star
                                .column(*bit)
                                .map_or_else(|| format!("col{bit}"), |c| c.name.clone()),
                            values: values.clone(),
                            sql_predicate: sql_predicates
                                .remove(bit)
                                .unwrap_or(starcache_predicate::ColumnPredicate::True),
                        })
                        .collect(),
                    measures: batch.measures.clone(),
                }
            })
            .collect();
        futures.extend(loader.load(state, &star, &specs, &compound, ctx)?);
    }

    Ok((satisfied, futures, pending))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use starcache_loader::{ColumnType, NoAggregates, RowCursor, SqlExecutor, SqlPool, SqlRow};
    use starcache_types::{
        CacheConfig, ColumnDesc, Datum, MeasureExpr, RollupAggregator, Star, StarId,
    };

    struct ScriptedCursor {
        rows: Vec<SqlRow>,
    }

    impl RowCursor for ScriptedCursor {
        fn next_row(&mut self) -> Result<Option<SqlRow>> {
            Ok(if self.rows.is_empty() {
                None
            } else {
                Some(self.rows.remove(0))
            })
        }

        fn cancel(&mut self) {}
    }

    /// Executor that answers every statement with the same scripted rows
    /// and records the SQL it saw.
    struct ScriptedExecutor {
        rows: Vec<SqlRow>,
        statements: Arc<Mutex<Vec<String>>>,
    }

    impl SqlExecutor for ScriptedExecutor {
        fn execute(&self, sql: &str, _column_types: &[ColumnType]) -> Result<Box<dyn RowCursor>> {
            self.statements.lock().push(sql.to_owned());
            Ok(Box::new(ScriptedCursor {
                rows: self.rows.clone(),
            }))
        }
    }

    fn test_star() -> Arc<Star> {
        Arc::new(Star::new(
            StarId::new("sales", "schema-v1", "Sales", "sales_fact"),
            vec![ColumnDesc::plain("year", 10), ColumnDesc::plain("state", 50)],
        ))
    }

    fn unit_sales() -> MeasureExpr {
        MeasureExpr::new("Unit Sales", "unit_sales", RollupAggregator::Sum)
    }

    fn reader_with_rows(
        rows: Vec<SqlRow>,
    ) -> (BatchReader, Arc<Mutex<Vec<String>>>, CacheManager) {
        let statements = Arc::new(Mutex::new(Vec::new()));
        let executor = Arc::new(ScriptedExecutor {
            rows,
            statements: Arc::clone(&statements),
        });
        let manager = CacheManager::new(CacheConfig::default(), Vec::new());
        let loader = Arc::new(SegmentLoader::new(
            executor,
            Arc::new(SqlPool::new(2)),
            manager.clone(),
            Arc::new(NoAggregates),
        ));
        let reader = BatchReader::new(manager.clone(), loader, DialectCaps::default(), 5000);
        (reader, statements, manager)
    }

    fn year_state_rows() -> Vec<SqlRow> {
        [
            (1997, "CA", 10),
            (1997, "WA", 20),
            (1998, "CA", 30),
            (1998, "WA", 40),
        ]
        .into_iter()
        .map(|(year, state, value)| SqlRow {
            grouping_set: 0,
            columns: vec![Some(Datum::Int(year)), Some(Datum::from(state))],
            measures: vec![Some(CellValue::Int(value))],
        })
        .collect()
    }

    fn request(star: &Arc<Star>, year: i64, state: &str) -> CellRequest {
        CellRequest::new(
            Arc::clone(star),
            unit_sales(),
            [(0, Datum::Int(year)), (1, Datum::from(state))],
            Vec::new(),
        )
    }

    #[test]
    fn test_miss_then_load_then_hit() {
        let (mut reader, statements, manager) = reader_with_rows(year_state_rows());
        let star = test_star();
        let ctx = ExecutionContext::new();

        let probe = request(&star, 1997, "CA");
        assert_eq!(reader.get(&probe).expect("probe"), CellLookup::NotReady);
        assert!(reader.is_dirty());

        assert!(reader.load_aggregations(&ctx).expect("loads"));
        assert!(!reader.is_dirty());
        assert_eq!(statements.lock().len(), 1, "one bulk statement");

        assert_eq!(
            reader.get(&probe).expect("probe"),
            CellLookup::Value(CellValue::Int(10))
        );
        assert_eq!(reader.hit_count(), 1);
        manager.shutdown();
    }

    #[test]
    fn test_requests_deduplicate() {
        let (mut reader, _, manager) = reader_with_rows(year_state_rows());
        let star = test_star();
        let probe = request(&star, 1997, "CA");
        for _ in 0..10 {
            let _ = reader.get(&probe);
        }
        assert_eq!(reader.miss_count(), 1, "identical probes record once");
        manager.shutdown();
    }

    #[test]
    fn test_quantum_signal_after_configured_misses() {
        let (manager_reader, _, manager) = reader_with_rows(Vec::new());
        let mut reader = manager_reader;
        reader.quantum = 3;
        let star = test_star();
        assert!(reader.get(&request(&star, 1990, "CA")).is_ok());
        assert!(reader.get(&request(&star, 1991, "CA")).is_ok());
        let err = reader
            .get(&request(&star, 1992, "CA"))
            .expect_err("third distinct miss raises the quantum signal");
        assert_eq!(err, StarCacheError::QuantumExceeded(3));
        // The request was recorded before the signal fired.
        assert_eq!(reader.miss_count(), 3);
        manager.shutdown();
    }

    #[test]
    fn test_in_range_cell_with_no_rows_is_null() {
        // Only 3 of the 4 requested coordinates have fact rows.
        let mut rows = year_state_rows();
        rows.pop();
        let (mut reader, _, manager) = reader_with_rows(rows);
        let star = test_star();
        let ctx = ExecutionContext::new();

        for (year, state) in [(1997, "CA"), (1997, "WA"), (1998, "CA"), (1998, "WA")] {
            let _ = reader.get(&request(&star, year, state));
        }
        reader.load_aggregations(&ctx).expect("loads");

        assert_eq!(
            reader.get(&request(&star, 1998, "WA")).expect("probe"),
            CellLookup::Null,
            "requested coordinate without fact rows is an empty cell"
        );
        manager.shutdown();
    }

    #[test]
    fn test_load_aggregations_without_requests_is_noop() {
        let (mut reader, statements, manager) = reader_with_rows(Vec::new());
        let ctx = ExecutionContext::new();
        assert!(!reader.load_aggregations(&ctx).expect("noop"));
        assert!(statements.lock().is_empty());
        manager.shutdown();
    }

    #[test]
    fn test_unsatisfiable_request_short_circuits() {
        let (mut reader, _, manager) = reader_with_rows(Vec::new());
        let star = test_star();
        let probe = CellRequest::unsatisfiable(star, unit_sales());
        assert_eq!(reader.get(&probe).expect("probe"), CellLookup::Null);
        assert!(!reader.is_dirty());
        manager.shutdown();
    }

    #[test]
    fn test_cancelled_context_aborts_load() {
        let (mut reader, _, manager) = reader_with_rows(year_state_rows());
        let star = test_star();
        let ctx = ExecutionContext::new();
        let _ = reader.get(&request(&star, 1997, "CA"));
        ctx.cancel();
        assert_eq!(
            reader.load_aggregations(&ctx),
            Err(StarCacheError::Cancelled)
        );
        manager.shutdown();
    }
}
