//! The segment loader: one SQL statement per load invocation.

use std::collections::BTreeSet;
use std::sync::Arc;

use starcache_cache::{CacheManager, ManagerState, SegmentFuture};
use starcache_error::{Result, StarCacheError};
use starcache_predicate::{ColumnPredicate, CompoundPredicate};
use starcache_segment::{
    DatasetBuilder, Segment, SegmentAxis, SegmentHeader, SegmentWithData,
};
use starcache_types::{BitKey, CellKey, Datum, ExecutionContext, MeasureExpr, Star};
use tracing::{debug, error, info};

use crate::agg::AggregateMatcher;
use crate::pool::SqlPool;
use crate::sql::{ColumnType, SqlExecutor};

/// Rows between cooperative cancellation checks while streaming.
const CANCEL_CHECK_INTERVAL: usize = 256;

/// One constrained column of a grouping set.
#[derive(Debug, Clone)]
pub struct LoadColumn {
    pub bit: u32,
    pub name: String,
    /// Requested coordinate values; these become the segment axis keys, so
    /// they are fixed before the SQL runs.
    pub values: BTreeSet<Datum>,
    /// Constraint actually emitted into the WHERE clause. The optimizer
    /// may widen this to `True` while `values` stays precise.
    pub sql_predicate: ColumnPredicate,
}

/// One grouping set of a load: its columns (bit order) and measures.
#[derive(Debug, Clone)]
pub struct GroupingSetSpec {
    pub bitkey: BitKey,
    pub columns: Vec<LoadColumn>,
    pub measures: Vec<MeasureExpr>,
}

struct SetPlan {
    axes: Vec<SegmentAxis>,
    headers: Vec<Arc<SegmentHeader>>,
    futures: Vec<SegmentFuture>,
}

/// Executes bulk fact queries and hydrates segments from their rows.
pub struct SegmentLoader {
    executor: Arc<dyn SqlExecutor>,
    sql_pool: Arc<SqlPool>,
    manager: CacheManager,
    matcher: Arc<dyn AggregateMatcher>,
}

impl std::fmt::Debug for SegmentLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentLoader").finish_non_exhaustive()
    }
}

impl SegmentLoader {
    /// Loader over an executor, a SQL pool, and the manager that owns
    /// registration.
    #[must_use]
    pub fn new(
        executor: Arc<dyn SqlExecutor>,
        sql_pool: Arc<SqlPool>,
        manager: CacheManager,
        matcher: Arc<dyn AggregateMatcher>,
    ) -> Self {
        Self {
            executor,
            sql_pool,
            manager,
            matcher,
        }
    }

    /// Dispatch one load covering every grouping set in `sets` (the first
    /// entry is the detailed set). Runs inside a cache manager command:
    /// it registers the in-flight headers, queues the SQL job, and returns
    /// one future per (grouping set, measure) without blocking.
    pub fn load(
        &self,
        state: &mut ManagerState,
        star: &Arc<Star>,
        sets: &[GroupingSetSpec],
        compound: &[CompoundPredicate],
        ctx: &ExecutionContext,
    ) -> Result<Vec<SegmentFuture>> {
        let Some(detailed) = sets.first() else {
            return Ok(Vec::new());
        };

        let table = if state.config.use_aggregates {
            self.matcher
                .find_agg(&detailed.bitkey, &detailed.measures)
                .map_or_else(
                    || star.id().fact_table.clone(),
                    |found| {
                        debug!(table = %found.table, rollup = found.rollup, "targeting aggregate table");
                        found.table
                    },
                )
        } else {
            star.id().fact_table.clone()
        };

        let (sql, column_types) = generate_sql(star, sets, compound, &table);
        if state.config.generate_aggregate_sql {
            info!(
                target: "starcache::aggregate_ddl",
                suggestion = %suggest_aggregate_ddl(star, detailed),
                "aggregate table suggestion"
            );
        }

        let mut plans = Vec::with_capacity(sets.len());
        let mut all_futures = Vec::new();
        let mut loading_fingerprints = Vec::new();
        for set in sets {
            let axes: Vec<SegmentAxis> = set
                .columns
                .iter()
                .map(|column| {
                    SegmentAxis::new(
                        &column.name,
                        column.bit,
                        ColumnPredicate::values(column.values.iter().cloned()),
                        column.values.iter().cloned(),
                    )
                })
                .collect();
            let mut headers = Vec::with_capacity(set.measures.len());
            let mut futures = Vec::with_capacity(set.measures.len());
            for measure in &set.measures {
                let header = Arc::new(SegmentHeader::new(
                    star,
                    measure,
                    set.columns
                        .iter()
                        .map(|c| (c.bit, ColumnPredicate::values(c.values.iter().cloned())))
                        .collect(),
                    compound,
                ));
                let future = SegmentFuture::new();
                loading_fingerprints.push(header.fingerprint());
                state.register_loading(Arc::clone(&header), future.clone());
                all_futures.push(future.clone());
                headers.push(header);
                futures.push(future);
            }
            plans.push(SetPlan {
                axes,
                headers,
                futures,
            });
        }

        debug!(
            sets = sets.len(),
            futures = all_futures.len(),
            sql = %sql,
            "dispatching segment load"
        );

        let job = LoadJob {
            executor: Arc::clone(&self.executor),
            manager: self.manager.clone(),
            sql,
            column_types,
            sets: sets.to_vec(),
            plans,
            ctx: ctx.clone(),
            density_threshold: state.config.density_threshold,
        };
        if let Err(err) = self.sql_pool.submit(move || job.run()) {
            // The pool is gone; fail every future of the invocation now.
            for future in &all_futures {
                let _ = future.complete(Err(err.clone()));
            }
            for fingerprint in loading_fingerprints {
                state.fail_loading(fingerprint);
            }
            return Err(err);
        }
        Ok(all_futures)
    }
}

struct LoadJob {
    executor: Arc<dyn SqlExecutor>,
    manager: CacheManager,
    sql: String,
    column_types: Vec<ColumnType>,
    sets: Vec<GroupingSetSpec>,
    plans: Vec<SetPlan>,
    ctx: ExecutionContext,
    density_threshold: f64,
}

impl LoadJob {
    fn run(self) {
        let Self {
            executor,
            manager,
            sql,
            column_types,
            sets,
            plans,
            ctx,
            density_threshold,
        } = self;

        let outcome = stream_rows(
            executor.as_ref(),
            &sql,
            &column_types,
            &sets,
            &plans,
            &ctx,
            density_threshold,
        );

        match outcome {
            Ok(segments) => {
                for (plan, plan_segments) in plans.iter().zip(segments) {
                    for ((future, header), segment) in
                        plan.futures.iter().zip(&plan.headers).zip(plan_segments)
                    {
                        let segment = Arc::new(segment);
                        let registered = manager.execute({
                            let segment = Arc::clone(&segment);
                            move |state| state.register_segment(&segment)
                        });
                        match registered {
                            Ok(Ok(())) | Err(StarCacheError::Shutdown) => {
                                let _ = future.complete(Ok(segment));
                            }
                            Ok(Err(err)) => {
                                error!(%err, measure = %header.measure_name, "segment registration failed");
                                let _ = future.complete(Err(err));
                            }
                            Err(err) => {
                                let _ = future.complete(Err(err));
                            }
                        }
                    }
                }
            }
            Err(err) => {
                error!(%err, "segment load failed; failing every future of the invocation");
                for plan in &plans {
                    for (future, header) in plan.futures.iter().zip(&plan.headers) {
                        let _ = future.complete(Err(err.clone()));
                        let fingerprint = header.fingerprint();
                        let _ = manager.submit(move |state| state.fail_loading(fingerprint));
                    }
                }
            }
        }
    }
}

fn stream_rows(
    executor: &dyn SqlExecutor,
    sql: &str,
    column_types: &[ColumnType],
    sets: &[GroupingSetSpec],
    plans: &[SetPlan],
    ctx: &ExecutionContext,
    density_threshold: f64,
) -> Result<Vec<Vec<SegmentWithData>>> {
    ctx.check_cancel_or_timeout()?;
    let mut cursor = executor.execute(sql, column_types)?;

    // Column positions of each set's columns within the detailed list.
    let detailed = &sets[0];
    let positions: Vec<Vec<usize>> = sets
        .iter()
        .map(|set| {
            set.columns
                .iter()
                .map(|column| {
                    detailed
                        .columns
                        .iter()
                        .position(|d| d.bit == column.bit)
                        .unwrap_or(usize::MAX)
                })
                .collect()
        })
        .collect();

    let mut builders: Vec<Vec<DatasetBuilder>> = plans
        .iter()
        .map(|plan| {
            let shape: Vec<usize> = plan.axes.iter().map(SegmentAxis::len).collect();
            plan.headers
                .iter()
                .map(|_| DatasetBuilder::new(shape.clone()))
                .collect()
        })
        .collect();

    let mut row_count = 0_usize;
    'rows: while let Some(row) = cursor.next_row()? {
        row_count += 1;
        if row_count % CANCEL_CHECK_INTERVAL == 0 {
            if let Err(err) = ctx.check_cancel_or_timeout() {
                cursor.cancel();
                return Err(err);
            }
        }

        let set_idx = row.grouping_set;
        if set_idx >= sets.len() {
            cursor.cancel();
            return Err(StarCacheError::SqlExecution(format!(
                "row reported grouping set {set_idx}, only {} requested",
                sets.len()
            )));
        }

        let plan = &plans[set_idx];
        let mut ordinals = Vec::with_capacity(plan.axes.len());
        for (axis, position) in plan.axes.iter().zip(&positions[set_idx]) {
            let Some(Some(value)) = row.columns.get(*position) else {
                continue 'rows;
            };
            match axis.ordinal_of(value) {
                Some(ordinal) => ordinals.push(ordinal),
                // A widened constraint can return coordinates nobody
                // asked for; they have no slot in the segment.
                None => continue 'rows,
            }
        }
        let key = CellKey::new(ordinals);
        for (measure_idx, value) in row.measures.iter().enumerate() {
            if let Some(value) = value {
                builders[set_idx][measure_idx].accumulate(key.clone(), value.clone());
            }
        }
    }
    debug!(rows = row_count, "segment load streamed");

    let mut all = Vec::with_capacity(plans.len());
    for (plan, plan_builders) in plans.iter().zip(builders) {
        let mut segments = Vec::with_capacity(plan.headers.len());
        for (header, builder) in plan.headers.iter().zip(plan_builders) {
            let shell = Segment::new(Arc::clone(header), plan.axes.clone())?;
            let segment =
                SegmentWithData::from_dataset(shell, builder.build(density_threshold))?;
            segments.push(segment);
        }
        all.push(segments);
    }
    Ok(all)
}

// ---------------------------------------------------------------------------
// SQL generation
// ---------------------------------------------------------------------------

/// Render the load statement. Deterministic: columns in bit order, values
/// in sorted order, grouping sets in the order supplied.
#[must_use]
pub fn generate_sql(
    star: &Star,
    sets: &[GroupingSetSpec],
    compound: &[CompoundPredicate],
    table: &str,
) -> (String, Vec<ColumnType>) {
    let detailed = &sets[0];

    let mut select = Vec::new();
    let mut column_types = Vec::new();
    for column in &detailed.columns {
        select.push(column.name.clone());
        column_types.push(
            column
                .values
                .iter()
                .next()
                .map_or(ColumnType::Str, |value| match value {
                    Datum::Int(_) => ColumnType::Int,
                    Datum::Double(_) => ColumnType::Double,
                    Datum::Str(_) => ColumnType::Str,
                }),
        );
    }
    for measure in &detailed.measures {
        select.push(measure.aggregator.sql(&measure.expression));
    }

    let mut conditions: Vec<String> = detailed
        .columns
        .iter()
        .filter_map(|column| column.sql_predicate.sql(&column.name))
        .collect();
    for predicate in compound {
        if let Some(clause) = predicate.sql(|bit| {
            star.column(bit)
                .map_or_else(|| format!("col{bit}"), |c| c.name.clone())
        }) {
            conditions.push(clause);
        }
    }

    let mut sql = format!("SELECT {} FROM {table}", select.join(", "));
    if !conditions.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&conditions.join(" AND "));
    }
    if sets.len() > 1 {
        let groups: Vec<String> = sets
            .iter()
            .map(|set| {
                let names: Vec<&str> =
                    set.columns.iter().map(|c| c.name.as_str()).collect();
                format!("({})", names.join(", "))
            })
            .collect();
        sql.push_str(" GROUP BY GROUPING SETS (");
        sql.push_str(&groups.join(", "));
        sql.push(')');
    } else if !detailed.columns.is_empty() {
        let names: Vec<&str> = detailed.columns.iter().map(|c| c.name.as_str()).collect();
        sql.push_str(" GROUP BY ");
        sql.push_str(&names.join(", "));
    }
    (sql, column_types)
}

/// Sketch of a summary table that would satisfy this load directly.
fn suggest_aggregate_ddl(star: &Star, detailed: &GroupingSetSpec) -> String {
    let columns: Vec<&str> = detailed.columns.iter().map(|c| c.name.as_str()).collect();
    let measures: Vec<String> = detailed
        .measures
        .iter()
        .map(|m| m.aggregator.sql(&m.expression))
        .collect();
    format!(
        "CREATE TABLE agg_{}_{} AS SELECT {}, {} FROM {} GROUP BY {}",
        star.id().fact_table,
        columns.join("_"),
        columns.join(", "),
        measures.join(", "),
        star.id().fact_table,
        columns.join(", ")
    )
}
