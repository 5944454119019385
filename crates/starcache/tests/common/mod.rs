//! Shared fixtures for the integration suites.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use starcache::testing::InMemoryFactTable;
use starcache::{
    AggregationEngine, CacheConfig, CellRequest, ColumnDesc, Datum, DialectCaps, MeasureExpr,
    RollupAggregator, Star, StarId,
};

/// Star over `sales_fact`: year (card 10), quarter (card 2), state
/// (card 50).
pub fn sales_star() -> Arc<Star> {
    Arc::new(Star::new(
        StarId::new("sales", "schema-v1", "Sales", "sales_fact"),
        vec![
            ColumnDesc::plain("year", 10),
            ColumnDesc::plain("quarter", 2),
            ColumnDesc::plain("state", 50),
        ],
    ))
}

pub fn unit_sales() -> MeasureExpr {
    MeasureExpr::new("Unit Sales", "unit_sales", RollupAggregator::Sum)
}

pub fn fact_row(entries: &[(&str, Datum)]) -> BTreeMap<String, Datum> {
    entries
        .iter()
        .map(|(k, v)| ((*k).to_owned(), v.clone()))
        .collect()
}

/// One row per (year, quarter, state) combination with a value that
/// encodes its coordinates, so sums are easy to predict.
pub fn sales_rows() -> Vec<BTreeMap<String, Datum>> {
    let mut rows = Vec::new();
    for (year_idx, year) in [1997_i64, 1998].into_iter().enumerate() {
        for (quarter_idx, quarter) in ["Q1", "Q2"].into_iter().enumerate() {
            for (state_idx, state) in ["CA", "OR", "WA"].into_iter().enumerate() {
                let value = 100 * (year_idx as i64 + 1) + 10 * (quarter_idx as i64 + 1)
                    + state_idx as i64
                    + 1;
                rows.push(fact_row(&[
                    ("year", Datum::Int(year)),
                    ("quarter", Datum::from(quarter)),
                    ("state", Datum::from(state)),
                    ("unit_sales", Datum::Int(value)),
                ]));
            }
        }
    }
    rows
}

/// Ground-truth sum over [`sales_rows`] for the given coordinates; `None`
/// entries roll the column up.
pub fn ground_truth(year: Option<i64>, quarter: Option<&str>, state: Option<&str>) -> i64 {
    sales_rows()
        .iter()
        .filter(|row| {
            year.is_none_or(|y| row.get("year") == Some(&Datum::Int(y)))
                && quarter.is_none_or(|q| row.get("quarter") == Some(&Datum::from(q)))
                && state.is_none_or(|s| row.get("state") == Some(&Datum::from(s)))
        })
        .map(|row| match row.get("unit_sales") {
            Some(Datum::Int(v)) => *v,
            _ => 0,
        })
        .sum()
}

pub fn engine_over(
    rows: Vec<BTreeMap<String, Datum>>,
    config: CacheConfig,
    caps: DialectCaps,
) -> (AggregationEngine, Arc<InMemoryFactTable>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let table = Arc::new(InMemoryFactTable::new(rows));
    let executor: Arc<dyn starcache::SqlExecutor> = table.clone() as Arc<dyn starcache::SqlExecutor>;
    let engine = AggregationEngine::new(config, caps, executor, Vec::new());
    (engine, table)
}

/// Request on `{year, state}`.
pub fn year_state_request(star: &Arc<Star>, year: i64, state: &str) -> CellRequest {
    CellRequest::new(
        Arc::clone(star),
        unit_sales(),
        [(0, Datum::Int(year)), (2, Datum::from(state))],
        Vec::new(),
    )
}

/// Request on `{year, quarter, state}`.
pub fn year_quarter_state_request(
    star: &Arc<Star>,
    year: i64,
    quarter: &str,
    state: &str,
) -> CellRequest {
    CellRequest::new(
        Arc::clone(star),
        unit_sales(),
        [
            (0, Datum::Int(year)),
            (1, Datum::from(quarter)),
            (2, Datum::from(state)),
        ],
        Vec::new(),
    )
}
