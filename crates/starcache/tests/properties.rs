//! Cross-cutting properties of the pipeline: determinism, ground truth,
//! eviction caps, serialization enforcement, shutdown behavior.

mod common;

use std::sync::Arc;

use common::{engine_over, fact_row, ground_truth, sales_rows, sales_star, year_state_request};
use starcache::{
    CacheConfig, CellLookup, CellRequest, CellValue, ColumnDesc, Datum, DialectCaps,
    ExecutionContext, MeasureExpr, RollupAggregator, Star, StarCacheError, StarId,
};

#[test]
fn test_identical_evaluations_emit_identical_sql() {
    let run = || {
        // A single SQL worker keeps the statement log in dispatch order;
        // dispatch order itself is what must be deterministic.
        let (engine, table) = engine_over(
            sales_rows(),
            CacheConfig::default()
                .with_grouping_sets(true)
                .with_sql_pool_size(1),
            DialectCaps::default(),
        );
        let star = sales_star();
        let mut reader = engine.reader();
        let ctx = ExecutionContext::new();
        for year in [1998, 1997] {
            for state in ["WA", "CA", "OR"] {
                let _ = reader.get(&year_state_request(&star, year, state));
            }
        }
        let narrow = CellRequest::new(
            Arc::clone(&star),
            common::unit_sales(),
            [(0, Datum::Int(1997))],
            Vec::new(),
        );
        let _ = reader.get(&narrow);
        reader.load_aggregations(&ctx).expect("loads");
        let statements = table.statements();
        engine.shutdown();
        statements
    };

    let first = run();
    let second = run();
    assert!(!first.is_empty());
    assert_eq!(first, second, "two empty-cache runs emit byte-identical SQL");
}

#[test]
fn test_cached_values_match_fact_table_ground_truth() {
    let (engine, _table) = engine_over(
        sales_rows(),
        CacheConfig::default(),
        DialectCaps::default(),
    );
    let star = sales_star();
    let mut reader = engine.reader();
    let ctx = ExecutionContext::new();

    for year in [1997, 1998] {
        for state in ["CA", "WA", "OR"] {
            let _ = reader.get(&year_state_request(&star, year, state));
        }
    }
    reader.load_aggregations(&ctx).expect("loads");

    for year in [1997, 1998] {
        for state in ["CA", "WA", "OR"] {
            let expected = ground_truth(Some(year), None, Some(state));
            assert_eq!(
                reader
                    .get(&year_state_request(&star, year, state))
                    .expect("probe"),
                CellLookup::Value(CellValue::Int(expected)),
                "cell ({year}, {state}) must equal direct fact-table aggregation"
            );
        }
    }
    engine.shutdown();
}

#[test]
fn test_in_memory_worker_never_exceeds_entry_cap() {
    let (engine, _table) = engine_over(
        sales_rows(),
        CacheConfig::default().with_cache_max_entries(2),
        DialectCaps::default(),
    );
    let star = sales_star();
    let ctx = ExecutionContext::new();

    // Four loads producing four distinct segments, one per round.
    for (year, state) in [(1997, "CA"), (1997, "WA"), (1998, "CA"), (1998, "OR")] {
        let mut reader = engine.reader();
        let _ = reader.get(&year_state_request(&star, year, state));
        reader.load_aggregations(&ctx).expect("loads");

        let resident = engine
            .manager()
            .execute(|state| state.pool.memory().map_or(0, |memory| memory.len()))
            .expect("inspect worker");
        assert!(resident <= 2, "cap exceeded: {resident} resident segments");
    }
    engine.shutdown();
}

#[test]
fn test_non_serializable_load_fails_at_put_time() {
    // A NaN aggregate cannot round-trip the JSON codec; the put must fail
    // and the failure must reach the waiting statement.
    let star = Arc::new(Star::new(
        StarId::new("sales", "schema-v1", "Sales", "sales_fact"),
        vec![ColumnDesc::plain("year", 10)],
    ));
    let rows = vec![fact_row(&[
        ("year", Datum::Int(1997)),
        ("unit_sales", Datum::Double(f64::NAN)),
    ])];
    let (engine, _table) = engine_over(rows, CacheConfig::default(), DialectCaps::default());
    let ctx = ExecutionContext::new();

    let mut reader = engine.reader();
    let request = CellRequest::new(
        Arc::clone(&star),
        MeasureExpr::new("Unit Sales", "unit_sales", RollupAggregator::Sum),
        [(0, Datum::Int(1997))],
        Vec::new(),
    );
    let _ = reader.get(&request);
    let err = reader
        .load_aggregations(&ctx)
        .expect_err("non-serializable body must fail the load");
    assert!(matches!(err, StarCacheError::NotSerializable(_)));
    engine.shutdown();
}

#[test]
fn test_shutdown_rejects_further_loads() {
    let (engine, _table) = engine_over(
        sales_rows(),
        CacheConfig::default(),
        DialectCaps::default(),
    );
    let star = sales_star();
    let ctx = ExecutionContext::new();

    let mut reader = engine.reader();
    let _ = reader.get(&year_state_request(&star, 1997, "CA"));
    engine.shutdown();
    engine.shutdown();

    assert_eq!(
        reader.load_aggregations(&ctx),
        Err(StarCacheError::Shutdown),
        "loads after shutdown fail explicitly"
    );
}

#[test]
fn test_second_statement_reuses_cached_segment() {
    let (engine, table) = engine_over(
        sales_rows(),
        CacheConfig::default(),
        DialectCaps::default(),
    );
    let star = sales_star();
    let ctx = ExecutionContext::new();

    let mut first = engine.reader();
    let _ = first.get(&year_state_request(&star, 1997, "CA"));
    first.load_aggregations(&ctx).expect("loads");
    assert_eq!(table.statement_count(), 1);

    // A different statement hits the shared cache, not the fact table.
    let mut second = engine.reader();
    let _ = second.get(&year_state_request(&star, 1997, "CA"));
    second.load_aggregations(&ctx).expect("loads");
    assert_eq!(table.statement_count(), 1, "no second statement issued");
    assert_eq!(
        second
            .get(&year_state_request(&star, 1997, "CA"))
            .expect("probe"),
        CellLookup::Value(CellValue::Int(ground_truth(Some(1997), None, Some("CA"))))
    );
    engine.shutdown();
}
