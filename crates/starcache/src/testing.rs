//! Test support: an in-memory fact table behind the executor seam, and an
//! in-process implementation of the segment cache SPI.
//!
//! The fact table understands exactly the statement shape the loader
//! emits (single-table SELECT with IN/equality constraints and optional
//! GROUPING SETS), which lets integration tests verify emitted SQL and
//! ground-truth values without a database.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use starcache_cache::{
    Completion, ListenerId, SegmentCache, SegmentCacheEvent, SegmentEventKind, SpiListener,
};
use starcache_error::{Result, StarCacheError};
use starcache_loader::{ColumnType, RowCursor, SqlExecutor, SqlRow};
use starcache_segment::{SegmentBody, SegmentHeader};
use starcache_types::{CellValue, Datum};

// ---------------------------------------------------------------------------
// In-memory fact table
// ---------------------------------------------------------------------------

/// Executes loader SQL against rows held in memory and records every
/// statement it sees.
pub struct InMemoryFactTable {
    rows: Vec<BTreeMap<String, Datum>>,
    statements: Mutex<Vec<String>>,
}

impl InMemoryFactTable {
    /// Fact table over the given rows; dimension and measure columns are
    /// both plain values keyed by column name.
    #[must_use]
    pub fn new(rows: Vec<BTreeMap<String, Datum>>) -> Self {
        Self {
            rows,
            statements: Mutex::new(Vec::new()),
        }
    }

    /// Every statement executed so far, in order.
    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().clone()
    }

    /// Number of statements executed so far.
    #[must_use]
    pub fn statement_count(&self) -> usize {
        self.statements.lock().len()
    }
}

impl SqlExecutor for InMemoryFactTable {
    fn execute(&self, sql: &str, _column_types: &[ColumnType]) -> Result<Box<dyn RowCursor>> {
        self.statements.lock().push(sql.to_owned());
        let query = Query::parse(sql)?;
        let rows = query.run(&self.rows);
        Ok(Box::new(VecCursor { rows }))
    }
}

struct VecCursor {
    rows: Vec<SqlRow>,
}

impl RowCursor for VecCursor {
    fn next_row(&mut self) -> Result<Option<SqlRow>> {
        Ok(if self.rows.is_empty() {
            None
        } else {
            Some(self.rows.remove(0))
        })
    }

    fn cancel(&mut self) {
        self.rows.clear();
    }
}

#[derive(Debug)]
struct Aggregate {
    func: String,
    distinct: bool,
    expr: String,
}

#[derive(Debug)]
enum Cond {
    Never,
    Eq(String, Datum),
    In(String, Vec<Datum>),
    /// OR of conjunctions.
    Or(Vec<Vec<Cond>>),
}

impl Cond {
    fn matches(&self, row: &BTreeMap<String, Datum>) -> bool {
        match self {
            Self::Never => false,
            Self::Eq(column, literal) => row.get(column) == Some(literal),
            Self::In(column, literals) => {
                row.get(column).is_some_and(|value| literals.contains(value))
            }
            Self::Or(disjuncts) => disjuncts
                .iter()
                .any(|conjunction| conjunction.iter().all(|cond| cond.matches(row))),
        }
    }
}

#[derive(Debug)]
struct Query {
    columns: Vec<String>,
    aggregates: Vec<Aggregate>,
    conditions: Vec<Cond>,
    sets: Vec<Vec<String>>,
}

impl Query {
    fn parse(sql: &str) -> Result<Self> {
        let bad = |what: &str| StarCacheError::SqlExecution(format!("unparsable {what}: {sql}"));

        let rest = sql.strip_prefix("SELECT ").ok_or_else(|| bad("statement"))?;
        let from = find_top_level(rest, " FROM ").ok_or_else(|| bad("statement"))?;
        let (select_part, mut rest) = (&rest[..from], &rest[from + " FROM ".len()..]);

        let mut where_part = None;
        let mut group_part = None;
        if let Some(idx) = find_top_level(rest, " WHERE ") {
            let tail = &rest[idx + " WHERE ".len()..];
            rest = &rest[..idx];
            if let Some(group_idx) = find_top_level(tail, " GROUP BY ") {
                where_part = Some(&tail[..group_idx]);
                group_part = Some(&tail[group_idx + " GROUP BY ".len()..]);
            } else {
                where_part = Some(tail);
            }
        } else if let Some(idx) = find_top_level(rest, " GROUP BY ") {
            group_part = Some(&rest[idx + " GROUP BY ".len()..]);
            rest = &rest[..idx];
        }
        let _table = rest.trim();

        let mut columns = Vec::new();
        let mut aggregates = Vec::new();
        for item in split_top_level(select_part, ", ") {
            if let Some(open) = item.find('(') {
                let func = item[..open].to_owned();
                let inner = item[open + 1..item.len() - 1].trim();
                let (distinct, expr) = inner.strip_prefix("DISTINCT ").map_or_else(
                    || (false, inner.to_owned()),
                    |stripped| (true, stripped.to_owned()),
                );
                aggregates.push(Aggregate {
                    func,
                    distinct,
                    expr,
                });
            } else {
                columns.push(item.trim().to_owned());
            }
        }

        let conditions = match where_part {
            None => Vec::new(),
            Some(clause) => split_top_level(clause, " AND ")
                .into_iter()
                .map(|cond| parse_cond(cond, sql))
                .collect::<Result<Vec<_>>>()?,
        };

        let sets = match group_part {
            None => vec![Vec::new()],
            Some(clause) => {
                if let Some(inner) = clause
                    .strip_prefix("GROUPING SETS (")
                    .and_then(|s| s.strip_suffix(')'))
                {
                    split_top_level(inner, ", ")
                        .into_iter()
                        .map(|set| {
                            let set = set
                                .strip_prefix('(')
                                .and_then(|s| s.strip_suffix(')'))
                                .unwrap_or(set);
                            if set.trim().is_empty() {
                                Vec::new()
                            } else {
                                set.split(", ").map(str::to_owned).collect()
                            }
                        })
                        .collect()
                } else {
                    vec![clause.split(", ").map(str::to_owned).collect()]
                }
            }
        };

        Ok(Self {
            columns,
            aggregates,
            conditions,
            sets,
        })
    }

    fn run(&self, rows: &[BTreeMap<String, Datum>]) -> Vec<SqlRow> {
        let filtered: Vec<&BTreeMap<String, Datum>> = rows
            .iter()
            .filter(|row| self.conditions.iter().all(|cond| cond.matches(row)))
            .collect();

        let mut out = Vec::new();
        for (set_idx, set_columns) in self.sets.iter().enumerate() {
            let mut groups: BTreeMap<Vec<Datum>, Vec<&BTreeMap<String, Datum>>> = BTreeMap::new();
            'rows: for row in &filtered {
                let mut key = Vec::with_capacity(set_columns.len());
                for column in set_columns {
                    match row.get(column) {
                        Some(value) => key.push(value.clone()),
                        None => continue 'rows,
                    }
                }
                groups.entry(key).or_default().push(row);
            }

            for (key, group) in groups {
                let columns = self
                    .columns
                    .iter()
                    .map(|column| {
                        set_columns
                            .iter()
                            .position(|c| c == column)
                            .map(|position| key[position].clone())
                    })
                    .collect();
                let measures = self
                    .aggregates
                    .iter()
                    .map(|aggregate| compute_aggregate(aggregate, &group))
                    .collect();
                out.push(SqlRow {
                    grouping_set: set_idx,
                    columns,
                    measures,
                });
            }
        }
        out
    }
}

fn compute_aggregate(
    aggregate: &Aggregate,
    group: &[&BTreeMap<String, Datum>],
) -> Option<CellValue> {
    let values: Vec<&Datum> = group
        .iter()
        .filter_map(|row| row.get(&aggregate.expr))
        .collect();
    if values.is_empty() {
        return None;
    }
    match (aggregate.func.as_str(), aggregate.distinct) {
        ("COUNT", true) => {
            let distinct: BTreeSet<&Datum> = values.into_iter().collect();
            Some(CellValue::Int(distinct.len() as i64))
        }
        ("COUNT", false) => Some(CellValue::Int(values.len() as i64)),
        ("SUM", _) => {
            if values.iter().all(|v| matches!(v, Datum::Int(_))) {
                let total: i64 = values
                    .iter()
                    .map(|v| if let Datum::Int(i) = v { *i } else { 0 })
                    .sum();
                Some(CellValue::Int(total))
            } else {
                let total: f64 = values.iter().map(|v| datum_as_f64(v)).sum();
                Some(CellValue::Double(total))
            }
        }
        ("MIN", _) => values.into_iter().min().and_then(datum_to_cell),
        ("MAX", _) => values.into_iter().max().and_then(datum_to_cell),
        _ => None,
    }
}

fn datum_as_f64(value: &Datum) -> f64 {
    match value {
        Datum::Int(v) => *v as f64,
        Datum::Double(v) => *v,
        Datum::Str(_) => 0.0,
    }
}

fn datum_to_cell(value: &Datum) -> Option<CellValue> {
    match value {
        Datum::Int(v) => Some(CellValue::Int(*v)),
        Datum::Double(v) => Some(CellValue::Double(*v)),
        Datum::Str(_) => None,
    }
}

fn parse_cond(cond: &str, sql: &str) -> Result<Cond> {
    let cond = cond.trim();
    if cond == "1 = 0" {
        return Ok(Cond::Never);
    }
    if cond.starts_with('(') && matching_paren(cond) == Some(cond.len() - 1) {
        let inner = &cond[1..cond.len() - 1];
        let disjuncts = split_top_level(inner, " OR ")
            .into_iter()
            .map(|disjunct| {
                let disjunct = disjunct.trim();
                let disjunct = if disjunct.starts_with('(')
                    && matching_paren(disjunct) == Some(disjunct.len() - 1)
                {
                    &disjunct[1..disjunct.len() - 1]
                } else {
                    disjunct
                };
                split_top_level(disjunct, " AND ")
                    .into_iter()
                    .map(|part| parse_cond(part, sql))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;
        return Ok(Cond::Or(disjuncts));
    }
    if let Some(idx) = cond.find(" IN (") {
        let column = cond[..idx].to_owned();
        let list = &cond[idx + " IN (".len()..cond.len() - 1];
        let literals = split_top_level(list, ", ")
            .into_iter()
            .map(parse_literal)
            .collect();
        return Ok(Cond::In(column, literals));
    }
    if let Some(idx) = cond.find(" = ") {
        let column = cond[..idx].to_owned();
        let literal = parse_literal(&cond[idx + " = ".len()..]);
        return Ok(Cond::Eq(column, literal));
    }
    Err(StarCacheError::SqlExecution(format!(
        "unparsable condition `{cond}` in: {sql}"
    )))
}

fn parse_literal(text: &str) -> Datum {
    let text = text.trim();
    if let Some(inner) = text.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')) {
        return Datum::Str(inner.replace("''", "'"));
    }
    if let Ok(int) = text.parse::<i64>() {
        return Datum::Int(int);
    }
    if let Ok(float) = text.parse::<f64>() {
        return Datum::Double(float);
    }
    Datum::Str(text.to_owned())
}

/// Offset of `needle` at paren depth zero outside quotes, if any.
fn find_top_level(haystack: &str, needle: &str) -> Option<usize> {
    let bytes = haystack.as_bytes();
    let mut depth = 0_i32;
    let mut in_quote = false;
    for i in 0..bytes.len() {
        match bytes[i] {
            b'\'' => in_quote = !in_quote,
            b'(' if !in_quote => depth += 1,
            b')' if !in_quote => depth -= 1,
            _ => {}
        }
        if !in_quote && depth == 0 && haystack[i..].starts_with(needle) {
            return Some(i);
        }
    }
    None
}

fn split_top_level<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    let bytes = text.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0_i32;
    let mut in_quote = false;
    let mut start = 0_usize;
    let mut i = 0_usize;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => in_quote = !in_quote,
            b'(' if !in_quote => depth += 1,
            b')' if !in_quote => depth -= 1,
            _ => {}
        }
        if !in_quote && depth == 0 && text[i..].starts_with(separator) {
            parts.push(&text[start..i]);
            i += separator.len();
            start = i;
            continue;
        }
        i += 1;
    }
    parts.push(&text[start..]);
    parts
}

/// Index of the paren matching the opening paren at position 0.
fn matching_paren(text: &str) -> Option<usize> {
    let mut depth = 0_i32;
    let mut in_quote = false;
    for (i, byte) in text.bytes().enumerate() {
        match byte {
            b'\'' => in_quote = !in_quote,
            b'(' if !in_quote => depth += 1,
            b')' if !in_quote => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

// ---------------------------------------------------------------------------
// In-process segment cache SPI
// ---------------------------------------------------------------------------

/// A `SegmentCache` living in this process. Announcing a segment through
/// [`announce`] emits a non-local `Created` event, mimicking a remote
/// peer populating a shared cache.
///
/// [`announce`]: LocalSegmentCache::announce
pub struct LocalSegmentCache {
    entries: Mutex<HashMap<u64, (SegmentHeader, SegmentBody)>>,
    listeners: Mutex<Vec<(ListenerId, SpiListener)>>,
    next_listener: AtomicU64,
    rich_index: bool,
}

impl Default for LocalSegmentCache {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalSegmentCache {
    /// Cache with a queryable index.
    #[must_use]
    pub fn new() -> Self {
        Self::with_rich_index(true)
    }

    /// Cache that optionally denies `supports_rich_index`, forcing the
    /// startup enumeration fallback.
    #[must_use]
    pub fn with_rich_index(rich_index: bool) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(0),
            rich_index,
        }
    }

    /// Number of stored segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Store a segment as if a remote peer created it, and notify
    /// listeners with a non-local `Created` event.
    pub fn announce(&self, header: SegmentHeader, body: SegmentBody) {
        self.entries
            .lock()
            .insert(header.fingerprint(), (header.clone(), body));
        let event = SegmentCacheEvent {
            is_local: false,
            source: Arc::new(header),
            kind: SegmentEventKind::Created,
        };
        for (_, listener) in self.listeners.lock().iter() {
            listener(&event);
        }
    }
}

impl SegmentCache for LocalSegmentCache {
    fn contains(&self, header: &SegmentHeader) -> Completion<bool> {
        Completion::satisfied(self.entries.lock().contains_key(&header.fingerprint()))
    }

    fn get(&self, header: &SegmentHeader) -> Completion<Option<SegmentBody>> {
        Completion::satisfied(
            self.entries
                .lock()
                .get(&header.fingerprint())
                .map(|(_, body)| body.clone()),
        )
    }

    fn put(&self, header: SegmentHeader, body: SegmentBody) -> Completion<bool> {
        self.entries
            .lock()
            .insert(header.fingerprint(), (header, body));
        Completion::satisfied(true)
    }

    fn remove(&self, header: &SegmentHeader) -> Completion<bool> {
        Completion::satisfied(
            self.entries
                .lock()
                .remove(&header.fingerprint())
                .is_some(),
        )
    }

    fn segment_headers(&self) -> Completion<Vec<SegmentHeader>> {
        Completion::satisfied(
            self.entries
                .lock()
                .values()
                .map(|(header, _)| header.clone())
                .collect(),
        )
    }

    fn add_listener(&self, listener: SpiListener) -> ListenerId {
        let id = self.next_listener.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().push((id, listener));
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners.lock().retain(|(lid, _)| *lid != id);
    }

    fn supports_rich_index(&self) -> bool {
        self.rich_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(entries: &[(&str, Datum)]) -> BTreeMap<String, Datum> {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_owned(), v.clone()))
            .collect()
    }

    fn sales_rows() -> Vec<BTreeMap<String, Datum>> {
        vec![
            row(&[
                ("year", Datum::Int(1997)),
                ("state", Datum::from("CA")),
                ("unit_sales", Datum::Int(10)),
            ]),
            row(&[
                ("year", Datum::Int(1997)),
                ("state", Datum::from("CA")),
                ("unit_sales", Datum::Int(5)),
            ]),
            row(&[
                ("year", Datum::Int(1998)),
                ("state", Datum::from("WA")),
                ("unit_sales", Datum::Int(7)),
            ]),
        ]
    }

    fn collect(mut cursor: Box<dyn RowCursor>) -> Vec<SqlRow> {
        let mut rows = Vec::new();
        while let Some(sql_row) = cursor.next_row().expect("cursor") {
            rows.push(sql_row);
        }
        rows
    }

    #[test]
    fn test_group_by_with_in_constraint() {
        let table = InMemoryFactTable::new(sales_rows());
        let cursor = table
            .execute(
                "SELECT year, state, SUM(unit_sales) FROM sales_fact \
                 WHERE year IN (1997, 1998) AND state IN ('CA', 'WA') \
                 GROUP BY year, state",
                &[],
            )
            .expect("parses");
        let rows = collect(cursor);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].measures[0], Some(CellValue::Int(15)));
        assert_eq!(rows[1].measures[0], Some(CellValue::Int(7)));
    }

    #[test]
    fn test_grouping_sets_emit_set_ids() {
        let table = InMemoryFactTable::new(sales_rows());
        let cursor = table
            .execute(
                "SELECT year, state, SUM(unit_sales) FROM sales_fact \
                 GROUP BY GROUPING SETS ((year, state), (year))",
                &[],
            )
            .expect("parses");
        let rows = collect(cursor);
        let detailed: Vec<&SqlRow> = rows.iter().filter(|r| r.grouping_set == 0).collect();
        let summary: Vec<&SqlRow> = rows.iter().filter(|r| r.grouping_set == 1).collect();
        assert_eq!(detailed.len(), 2);
        assert_eq!(summary.len(), 2);
        assert!(
            summary.iter().all(|r| r.columns[1].is_none()),
            "summary rows roll up the state column"
        );
        let year_1997 = summary
            .iter()
            .find(|r| r.columns[0] == Some(Datum::Int(1997)))
            .expect("1997 summary");
        assert_eq!(year_1997.measures[0], Some(CellValue::Int(15)));
    }

    #[test]
    fn test_count_distinct() {
        let table = InMemoryFactTable::new(vec![
            row(&[("year", Datum::Int(1997)), ("customer_id", Datum::Int(1))]),
            row(&[("year", Datum::Int(1997)), ("customer_id", Datum::Int(1))]),
            row(&[("year", Datum::Int(1997)), ("customer_id", Datum::Int(2))]),
        ]);
        let cursor = table
            .execute(
                "SELECT year, COUNT(DISTINCT customer_id) FROM f GROUP BY year",
                &[],
            )
            .expect("parses");
        let rows = collect(cursor);
        assert_eq!(rows[0].measures[0], Some(CellValue::Int(2)));
    }

    #[test]
    fn test_compound_or_condition() {
        let table = InMemoryFactTable::new(sales_rows());
        let cursor = table
            .execute(
                "SELECT year, SUM(unit_sales) FROM f \
                 WHERE ((year = 1997 AND state = 'CA') OR (year = 1998 AND state = 'WA')) \
                 GROUP BY year",
                &[],
            )
            .expect("parses");
        let rows = collect(cursor);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].measures[0], Some(CellValue::Int(15)));
    }

    #[test]
    fn test_quoted_literal_with_embedded_comma() {
        let table = InMemoryFactTable::new(vec![row(&[
            ("city", Datum::from("Portland, OR")),
            ("unit_sales", Datum::Int(3)),
        ])]);
        let cursor = table
            .execute(
                "SELECT city, SUM(unit_sales) FROM f WHERE city IN ('Portland, OR') GROUP BY city",
                &[],
            )
            .expect("parses");
        let rows = collect(cursor);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].measures[0], Some(CellValue::Int(3)));
    }

    #[test]
    fn test_local_segment_cache_listener_flow() {
        use starcache_predicate::ColumnPredicate;
        use starcache_types::{ColumnDesc, MeasureExpr, RollupAggregator, Star, StarId};

        let star = Star::new(
            StarId::new("sales", "schema-v1", "Sales", "sales_fact"),
            vec![ColumnDesc::plain("year", 10)],
        );
        let measure = MeasureExpr::new("Unit Sales", "unit_sales", RollupAggregator::Sum);
        let header = SegmentHeader::new(
            &star,
            &measure,
            vec![(0, ColumnPredicate::ValueEq(Datum::Int(1997)))],
            &[],
        );
        let body = SegmentBody {
            axis_keys: vec![vec![Datum::Int(1997)]],
            cells: starcache_segment::BodyCells::Sparse(vec![(
                starcache_types::CellKey::new([0]),
                CellValue::Int(1),
            )]),
        };

        let cache = LocalSegmentCache::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            cache.add_listener(Arc::new(move |event: &SegmentCacheEvent| {
                seen.lock().push((event.is_local, event.kind));
            }));
        }
        cache.announce(header.clone(), body);
        assert_eq!(cache.len(), 1);
        assert_eq!(*seen.lock(), vec![(false, SegmentEventKind::Created)]);
        assert_eq!(cache.contains(&header).get(), Ok(true));
    }
}
