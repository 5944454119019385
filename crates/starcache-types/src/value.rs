//! Column values, measure values, and cell coordinates.
//!
//! [`Datum`] is a column (axis) value: the coordinates of a cell and the
//! literals inside predicates. [`CellValue`] is a measure value stored in a
//! segment dataset. [`CellKey`] addresses a cell by per-axis ordinals.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

// ---------------------------------------------------------------------------
// Datum
// ---------------------------------------------------------------------------

/// A column value: integer, floating point, or string.
///
/// `Datum` is totally ordered (doubles via `total_cmp`) so axis key arrays
/// can be binary-searched and value sets iterate deterministically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Datum {
    Int(i64),
    Double(f64),
    Str(String),
}

impl Datum {
    /// Rank used to order across variants.
    const fn rank(&self) -> u8 {
        match self {
            Self::Int(_) => 0,
            Self::Double(_) => 1,
            Self::Str(_) => 2,
        }
    }

    /// SQL literal rendering: strings are single-quoted with quote doubling.
    #[must_use]
    pub fn sql_literal(&self) -> String {
        match self {
            Self::Int(v) => v.to_string(),
            Self::Double(v) => format!("{v:?}"),
            Self::Str(v) => format!("'{}'", v.replace('\'', "''")),
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v:?}"),
            Self::Str(v) => write!(f, "{v}"),
        }
    }
}

impl PartialEq for Datum {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Datum {}

impl PartialOrd for Datum {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Datum {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Double(a), Self::Double(b)) => a.total_cmp(b),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for Datum {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Self::Int(v) => v.hash(state),
            Self::Double(v) => v.to_bits().hash(state),
            Self::Str(v) => v.hash(state),
        }
    }
}

impl From<i64> for Datum {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for Datum {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

// ---------------------------------------------------------------------------
// CellValue
// ---------------------------------------------------------------------------

/// A measure value held in a segment dataset.
///
/// Integer, decimal, and double are distinct types. Addition widens to the
/// widest input (`Int` → `Decimal` → `Double`); integer overflow promotes to
/// `Double` rather than wrapping. Absent cells are represented outside this
/// type (`Option<CellValue>`) and never contaminate a sum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CellValue {
    Int(i64),
    Decimal { unscaled: i64, scale: u32 },
    Double(f64),
}

impl CellValue {
    /// Decimal constructor.
    #[must_use]
    pub const fn decimal(unscaled: i64, scale: u32) -> Self {
        Self::Decimal { unscaled, scale }
    }

    /// Approximate numeric value as `f64`.
    #[must_use]
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Int(v) => *v as f64,
            Self::Decimal { unscaled, scale } => *unscaled as f64 / 10f64.powi(*scale as i32),
            Self::Double(v) => *v,
        }
    }

    /// Widening addition: the result takes the widest input type.
    #[must_use]
    pub fn widen_add(&self, other: &Self) -> Self {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a
                .checked_add(*b)
                .map_or_else(|| Self::Double(*a as f64 + *b as f64), Self::Int),
            (Self::Double(_), _) | (_, Self::Double(_)) => {
                Self::Double(self.as_f64() + other.as_f64())
            }
            (Self::Decimal { .. }, _) | (_, Self::Decimal { .. }) => {
                let (au, asc) = self.as_decimal_parts();
                let (bu, bsc) = other.as_decimal_parts();
                let scale = asc.max(bsc);
                let a_aligned = rescale(au, asc, scale);
                let b_aligned = rescale(bu, bsc, scale);
                match (a_aligned, b_aligned) {
                    (Some(a), Some(b)) => a.checked_add(b).map_or_else(
                        || Self::Double(self.as_f64() + other.as_f64()),
                        |sum| Self::Decimal {
                            unscaled: sum,
                            scale,
                        },
                    ),
                    _ => Self::Double(self.as_f64() + other.as_f64()),
                }
            }
        }
    }

    fn as_decimal_parts(&self) -> (i64, u32) {
        match self {
            Self::Int(v) => (*v, 0),
            Self::Decimal { unscaled, scale } => (*unscaled, *scale),
            Self::Double(_) => unreachable!("double handled before decimal widening"),
        }
    }
}

/// Scale `unscaled` from `from` fractional digits to `to`; `None` on overflow.
fn rescale(unscaled: i64, from: u32, to: u32) -> Option<i64> {
    let mut value = unscaled;
    for _ in from..to {
        value = value.checked_mul(10)?;
    }
    Some(value)
}

impl PartialEq for CellValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a == b,
            (
                Self::Decimal {
                    unscaled: au,
                    scale: asc,
                },
                Self::Decimal {
                    unscaled: bu,
                    scale: bsc,
                },
            ) => au == bu && asc == bsc,
            (Self::Double(a), Self::Double(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}

impl Eq for CellValue {}

// ---------------------------------------------------------------------------
// CellKey
// ---------------------------------------------------------------------------

/// Cell coordinate: one ordinal per segment axis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellKey(SmallVec<[u32; 4]>);

impl CellKey {
    /// Key from per-axis ordinals.
    #[must_use]
    pub fn new(ordinals: impl IntoIterator<Item = u32>) -> Self {
        Self(ordinals.into_iter().collect())
    }

    /// Number of axes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the key has no axes (a zero-dimensional segment).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Ordinal on axis `axis`.
    #[must_use]
    pub fn ordinal(&self, axis: usize) -> u32 {
        self.0[axis]
    }

    /// Per-axis ordinals in axis order.
    #[must_use]
    pub fn ordinals(&self) -> &[u32] {
        &self.0
    }
}

impl FromIterator<u32> for CellKey {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
