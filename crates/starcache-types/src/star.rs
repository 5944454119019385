//! Star identity, column metadata, and measure expressions.
//!
//! A star names one fact source. Columns within a star are addressed by a
//! stable bit position assigned from schema column order; all bit keys in
//! the pipeline share that addressing.

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

use crate::bitkey::BitKey;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Identity of a fact source: schema, schema checksum, cube, fact table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StarId {
    pub schema_name: String,
    pub schema_checksum: u64,
    pub cube_name: String,
    pub fact_table: String,
}

impl StarId {
    /// Build an identity, deriving the checksum from a schema description.
    #[must_use]
    pub fn new(schema_name: &str, schema_desc: &str, cube_name: &str, fact_table: &str) -> Self {
        Self {
            schema_name: schema_name.to_owned(),
            schema_checksum: schema_checksum(schema_desc),
            cube_name: cube_name.to_owned(),
            fact_table: fact_table.to_owned(),
        }
    }
}

/// Stable checksum of a schema description.
#[must_use]
pub fn schema_checksum(schema_desc: &str) -> u64 {
    xxh3_64(schema_desc.as_bytes())
}

// ---------------------------------------------------------------------------
// Columns
// ---------------------------------------------------------------------------

/// Column description supplied by the schema layer when building a star.
///
/// Bit positions are assigned from the order of these descriptions.
#[derive(Debug, Clone)]
pub struct ColumnDesc {
    pub name: String,
    /// Raw distinct-value cardinality of the column.
    pub cardinality: u64,
    /// Cached cardinality of the hierarchy level mapped to this column.
    pub level_cardinality: Option<u64>,
    /// Cached child count of the common parent member, when known.
    pub parent_child_count: Option<u64>,
    /// Whether the column belongs to a parent-child closure table.
    pub is_closure: bool,
}

impl ColumnDesc {
    /// Plain dimension column with a raw cardinality.
    #[must_use]
    pub fn plain(name: &str, cardinality: u64) -> Self {
        Self {
            name: name.to_owned(),
            cardinality,
            level_cardinality: None,
            parent_child_count: None,
            is_closure: false,
        }
    }
}

/// A column of a star with its assigned bit position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    pub bit: u32,
    pub cardinality: u64,
    pub level_cardinality: Option<u64>,
    pub parent_child_count: Option<u64>,
}

// ---------------------------------------------------------------------------
// Star
// ---------------------------------------------------------------------------

/// A fact source with addressable columns.
#[derive(Debug, Clone)]
pub struct Star {
    id: StarId,
    columns: Vec<ColumnMeta>,
    closure_columns: BitKey,
}

impl Star {
    /// Build a star, assigning bit positions from description order.
    #[must_use]
    pub fn new(id: StarId, columns: Vec<ColumnDesc>) -> Self {
        let width = columns.len() as u32;
        let mut closure_columns = BitKey::new(width.max(1));
        let columns = columns
            .into_iter()
            .enumerate()
            .map(|(i, desc)| {
                let bit = i as u32;
                if desc.is_closure {
                    closure_columns.set(bit);
                }
                ColumnMeta {
                    name: desc.name,
                    bit,
                    cardinality: desc.cardinality,
                    level_cardinality: desc.level_cardinality,
                    parent_child_count: desc.parent_child_count,
                }
            })
            .collect();
        Self {
            id,
            columns,
            closure_columns,
        }
    }

    /// Fact source identity.
    #[must_use]
    pub const fn id(&self) -> &StarId {
        &self.id
    }

    /// Bit width for keys of this star.
    #[must_use]
    pub fn width(&self) -> u32 {
        (self.columns.len() as u32).max(1)
    }

    /// Empty bit key sized for this star.
    #[must_use]
    pub fn empty_key(&self) -> BitKey {
        BitKey::new(self.width())
    }

    /// All columns in bit order.
    #[must_use]
    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    /// Column at a bit position.
    #[must_use]
    pub fn column(&self, bit: u32) -> Option<&ColumnMeta> {
        self.columns.get(bit as usize)
    }

    /// Column by name.
    #[must_use]
    pub fn column_by_name(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Columns participating in parent-child closures.
    ///
    /// Rolling up over a closure column is unsound: the ALL-level member of
    /// a closure is not the sum of its children.
    #[must_use]
    pub const fn closure_columns(&self) -> &BitKey {
        &self.closure_columns
    }
}

// ---------------------------------------------------------------------------
// Measures
// ---------------------------------------------------------------------------

/// Rollup aggregation applied to a measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RollupAggregator {
    Sum,
    Count,
    Min,
    Max,
    DistinctCount,
}

impl RollupAggregator {
    /// Whether this aggregator is a distinct count.
    #[must_use]
    pub const fn is_distinct(&self) -> bool {
        matches!(self, Self::DistinctCount)
    }

    /// Render a SQL aggregate over an expression.
    #[must_use]
    pub fn sql(&self, expression: &str) -> String {
        match self {
            Self::Sum => format!("SUM({expression})"),
            Self::Count => format!("COUNT({expression})"),
            Self::Min => format!("MIN({expression})"),
            Self::Max => format!("MAX({expression})"),
            Self::DistinctCount => format!("COUNT(DISTINCT {expression})"),
        }
    }
}

/// A measure over the fact table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MeasureExpr {
    pub name: String,
    /// SQL expression of the measured column.
    pub expression: String,
    pub aggregator: RollupAggregator,
    /// Whether the expression is itself a query. Distinct measures whose
    /// expression is a query cannot share a statement with other distinct
    /// measures.
    pub expression_is_query: bool,
}

impl MeasureExpr {
    /// Plain measure over a fact column.
    #[must_use]
    pub fn new(name: &str, expression: &str, aggregator: RollupAggregator) -> Self {
        Self {
            name: name.to_owned(),
            expression: expression.to_owned(),
            aggregator,
            expression_is_query: false,
        }
    }
}
