//! Single-column predicates.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use starcache_types::Datum;

/// A member constraint: a value plus its hierarchical position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemberPredicate {
    /// Column value of the member.
    pub value: Datum,
    /// Key path of ancestors, root first.
    pub parent_path: Vec<Datum>,
    /// Depth of the member's level.
    pub level_depth: u32,
    /// Whether this is the ALL member, which accepts every value.
    pub is_all: bool,
}

impl MemberPredicate {
    /// Leaf member constraint with no hierarchy context.
    #[must_use]
    pub fn leaf(value: Datum) -> Self {
        Self {
            value,
            parent_path: Vec::new(),
            level_depth: 0,
            is_all: false,
        }
    }
}

/// A decidable constraint over one column's values.
///
/// `List` is a disjunction of its parts. Construction through [`or`] and
/// [`and`] keeps predicates in a normalized shape: single-element
/// enumerations become `ValueEq`, nested lists are flattened, and value
/// enumerations are merged.
///
/// [`or`]: ColumnPredicate::or
/// [`and`]: ColumnPredicate::and
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnPredicate {
    /// Accepts every value.
    True,
    /// Accepts no value.
    False,
    /// Accepts exactly one literal.
    ValueEq(Datum),
    /// Accepts an enumerated set of literals.
    ValueIn(BTreeSet<Datum>),
    /// Accepts the values of one hierarchy member.
    Member(MemberPredicate),
    /// Disjunction of the contained predicates.
    List(Vec<ColumnPredicate>),
}

impl ColumnPredicate {
    /// Enumeration predicate over the given literals.
    #[must_use]
    pub fn values(values: impl IntoIterator<Item = Datum>) -> Self {
        Self::ValueIn(values.into_iter().collect()).normalized()
    }

    /// Whether the predicate accepts `value`.
    #[must_use]
    pub fn evaluate(&self, value: &Datum) -> bool {
        match self {
            Self::True => true,
            Self::False => false,
            Self::ValueEq(v) => v == value,
            Self::ValueIn(set) => set.contains(value),
            Self::Member(member) => member.is_all || member.value == *value,
            Self::List(parts) => parts.iter().any(|p| p.evaluate(value)),
        }
    }

    /// The enumerated value set, when the constraint is enumerable.
    ///
    /// `None` means the predicate cannot be enumerated (`True`, or an ALL
    /// member). `False` enumerates to the empty set.
    #[must_use]
    pub fn enumerated(&self) -> Option<BTreeSet<Datum>> {
        match self {
            Self::True => None,
            Self::False => Some(BTreeSet::new()),
            Self::ValueEq(v) => Some(std::iter::once(v.clone()).collect()),
            Self::ValueIn(set) => Some(set.clone()),
            Self::Member(member) => {
                if member.is_all {
                    None
                } else {
                    Some(std::iter::once(member.value.clone()).collect())
                }
            }
            Self::List(parts) => {
                let mut union = BTreeSet::new();
                for part in parts {
                    union.append(&mut part.enumerated()?);
                }
                Some(union)
            }
        }
    }

    /// Number of enumerated values, when enumerable.
    #[must_use]
    pub fn constrained_cardinality(&self) -> Option<usize> {
        self.enumerated().map(|set| set.len())
    }

    /// Whether `self` and `other` can accept a common value.
    ///
    /// Conservative: answers `true` unless disjointness is provable.
    #[must_use]
    pub fn might_intersect(&self, other: &Self) -> bool {
        if matches!(self, Self::False) || matches!(other, Self::False) {
            return false;
        }
        if matches!(self, Self::True) || matches!(other, Self::True) {
            return true;
        }
        match (self.enumerated(), other.enumerated()) {
            (Some(a), Some(b)) => a.intersection(&b).next().is_some(),
            _ => true,
        }
    }

    /// `self AND NOT other`.
    ///
    /// Exact when `self` is enumerable. Non-enumerable predicates return
    /// `self` unchanged; the caller is expected to carry exactness through
    /// an excluded region.
    #[must_use]
    pub fn minus(&self, other: &Self) -> Self {
        if matches!(other, Self::False) {
            return self.clone();
        }
        if matches!(other, Self::True) {
            return Self::False;
        }
        match self.enumerated() {
            Some(set) => {
                Self::ValueIn(set.into_iter().filter(|v| !other.evaluate(v)).collect())
                    .normalized()
            }
            None => self.clone(),
        }
    }

    /// Structural equality of the constraints, after normalization.
    #[must_use]
    pub fn equal_constraint(&self, other: &Self) -> bool {
        match (self.enumerated(), other.enumerated()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.clone().normalized() == other.clone().normalized(),
            _ => false,
        }
    }

    /// Disjunction with another predicate.
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        match (self, other) {
            (Self::True, _) | (_, Self::True) => Self::True,
            (Self::False, p) | (p, Self::False) => p,
            (a, b) => match (a.enumerated(), b.enumerated()) {
                (Some(mut left), Some(mut right)) => {
                    left.append(&mut right);
                    Self::ValueIn(left).normalized()
                }
                _ => Self::List(vec![a, b]),
            },
        }
    }

    /// Conjunction with another predicate.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::False, _) | (_, Self::False) => Self::False,
            (Self::True, p) | (p, Self::True) => p,
            (a, b) => match (a.enumerated(), b.enumerated()) {
                (Some(left), Some(right)) => {
                    Self::ValueIn(left.intersection(&right).cloned().collect()).normalized()
                }
                // Keep the enumerable side; it is the tighter description.
                (Some(_), None) => a,
                _ => b,
            },
        }
    }

    /// Collapse degenerate shapes.
    #[must_use]
    pub fn normalized(self) -> Self {
        match self {
            Self::ValueIn(set) => match set.len() {
                0 => Self::False,
                1 => Self::ValueEq(set.into_iter().next().unwrap_or(Datum::Int(0))),
                _ => Self::ValueIn(set),
            },
            Self::List(parts) => {
                let parts: Vec<Self> = parts.into_iter().map(Self::normalized).collect();
                match parts.len() {
                    0 => Self::False,
                    1 => parts.into_iter().next().unwrap_or(Self::False),
                    _ => Self::List(parts),
                }
            }
            other => other,
        }
    }

    /// SQL rendering against a column name. `True` renders as no constraint.
    #[must_use]
    pub fn sql(&self, column: &str) -> Option<String> {
        match self {
            Self::True => None,
            Self::False => Some("1 = 0".to_owned()),
            Self::ValueEq(v) => Some(format!("{column} = {}", v.sql_literal())),
            Self::ValueIn(set) => {
                let literals: Vec<String> = set.iter().map(Datum::sql_literal).collect();
                Some(format!("{column} IN ({})", literals.join(", ")))
            }
            Self::Member(member) => {
                if member.is_all {
                    None
                } else {
                    Some(format!("{column} = {}", member.value.sql_literal()))
                }
            }
            Self::List(parts) => {
                let clauses: Vec<String> = parts.iter().filter_map(|p| p.sql(column)).collect();
                if clauses.len() < parts.len() {
                    // An unconstrained disjunct swallows the whole OR.
                    None
                } else {
                    Some(format!("({})", clauses.join(" OR ")))
                }
            }
        }
    }
}

impl fmt::Display for ColumnPredicate {
    /// Canonical text form, used for batch-equality keys.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::True => write!(f, "*"),
            Self::False => write!(f, "!"),
            Self::ValueEq(v) => write!(f, "={v}"),
            Self::ValueIn(set) => {
                write!(f, "in[")?;
                for (i, v) in set.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Self::Member(member) => {
                if member.is_all {
                    write!(f, "member:all")
                } else {
                    write!(f, "member:{}@{}", member.value, member.level_depth)
                }
            }
            Self::List(parts) => {
                for (i, p) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, "|")?;
                    }
                    write!(f, "{p}")?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn int(v: i64) -> Datum {
        Datum::Int(v)
    }

    #[test]
    fn test_evaluate_variants() {
        assert!(ColumnPredicate::True.evaluate(&int(1)));
        assert!(!ColumnPredicate::False.evaluate(&int(1)));
        assert!(ColumnPredicate::ValueEq(int(1997)).evaluate(&int(1997)));
        assert!(!ColumnPredicate::ValueEq(int(1997)).evaluate(&int(1998)));
        let in_pred = ColumnPredicate::values([int(1), int(2)]);
        assert!(in_pred.evaluate(&int(2)));
        assert!(!in_pred.evaluate(&int(3)));
    }

    #[test]
    fn test_all_member_accepts_everything() {
        let all = ColumnPredicate::Member(MemberPredicate {
            value: int(0),
            parent_path: Vec::new(),
            level_depth: 0,
            is_all: true,
        });
        assert!(all.evaluate(&int(42)));
        assert!(all.enumerated().is_none());
    }

    #[test]
    fn test_minus_on_enumeration_is_exact() {
        let years = ColumnPredicate::values([int(1997), int(1998)]);
        let gone = ColumnPredicate::ValueEq(int(1997));
        let kept = years.minus(&gone);
        assert_eq!(kept, ColumnPredicate::ValueEq(int(1998)));
        assert_eq!(
            ColumnPredicate::ValueEq(int(1998)).minus(&ColumnPredicate::ValueEq(int(1998))),
            ColumnPredicate::False
        );
    }

    #[test]
    fn test_minus_true_keeps_self() {
        let everything = ColumnPredicate::True;
        let tightened = everything.minus(&ColumnPredicate::ValueEq(int(1)));
        assert_eq!(tightened, ColumnPredicate::True);
    }

    #[test]
    fn test_might_intersect() {
        let a = ColumnPredicate::values([int(1), int(2)]);
        let b = ColumnPredicate::values([int(2), int(3)]);
        let c = ColumnPredicate::values([int(4)]);
        assert!(a.might_intersect(&b));
        assert!(!a.might_intersect(&c));
        assert!(a.might_intersect(&ColumnPredicate::True));
        assert!(!a.might_intersect(&ColumnPredicate::False));
    }

    #[test]
    fn test_or_merges_enumerations() {
        let merged =
            ColumnPredicate::ValueEq(int(1)).or(ColumnPredicate::values([int(2), int(3)]));
        assert_eq!(merged, ColumnPredicate::values([int(1), int(2), int(3)]));
    }

    #[test]
    fn test_and_intersects_enumerations() {
        let met = ColumnPredicate::values([int(1), int(2)])
            .and(ColumnPredicate::values([int(2), int(3)]));
        assert_eq!(met, ColumnPredicate::ValueEq(int(2)));
    }

    #[test]
    fn test_equal_constraint_ignores_shape() {
        let eq = ColumnPredicate::ValueEq(int(5));
        let single_in = ColumnPredicate::ValueIn([int(5)].into_iter().collect());
        assert!(eq.equal_constraint(&single_in));
    }

    #[test]
    fn test_sql_rendering() {
        assert_eq!(ColumnPredicate::True.sql("year"), None);
        assert_eq!(
            ColumnPredicate::ValueEq(int(1997)).sql("year"),
            Some("year = 1997".to_owned())
        );
        assert_eq!(
            ColumnPredicate::values([int(1997), int(1998)]).sql("year"),
            Some("year IN (1997, 1998)".to_owned())
        );
    }

    proptest! {
        #[test]
        fn prop_minus_never_accepts_removed_values(
            keep in proptest::collection::btree_set(0i64..50, 1..10),
            remove in proptest::collection::btree_set(0i64..50, 1..10),
        ) {
            let this = ColumnPredicate::values(keep.iter().map(|v| int(*v)));
            let other = ColumnPredicate::values(remove.iter().map(|v| int(*v)));
            let diff = this.minus(&other);
            for v in &remove {
                prop_assert!(!diff.evaluate(&int(*v)));
            }
            for v in keep.difference(&remove) {
                prop_assert!(diff.evaluate(&int(*v)));
            }
        }
    }
}
