//! Lookups and Q objects for building filters.
//!
//! A [`Lookup`] is a single column comparison. A [`Q`] combines lookups with
//! AND, OR, and NOT and converts into a [`WhereNode`](super::WhereNode) for
//! a [`Condition`](super::Condition).
//!
//! # Examples
//!
//! ```
//! use relorm_db::query::lookups::{Q, Lookup};
//! use relorm_db::value::Value;
//!
//! // brand = "BMW" AND owner_id > 1
//! let q = Q::filter("brand", Lookup::Exact(Value::from("BMW")))
//!     & Q::filter("owner_id", Lookup::Gt(Value::from(1)));
//!
//! // NOT(brand = "AEG")
//! let negated = !Q::filter("brand", Lookup::Exact(Value::from("AEG")));
//! ```

use std::ops;

use crate::value::Value;

/// A sub-select producing one column, used by [`Lookup::InSubquery`].
#[derive(Debug, Clone, PartialEq)]
pub struct Subquery {
    /// The table to select from.
    pub table: String,
    /// The single column selected.
    pub column: String,
    /// The sub-select's filter.
    pub filter: Box<Q>,
}

impl Subquery {
    /// Creates `SELECT column FROM table WHERE filter`.
    pub fn new(table: impl Into<String>, column: impl Into<String>, filter: Q) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            filter: Box::new(filter),
        }
    }
}

/// A column-level lookup operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// Exact match (`column = value`); a null value compiles to `IS NULL`.
    Exact(Value),
    /// Membership test (`column IN (values...)`).
    In(Vec<Value>),
    /// Membership in a sub-select (`column IN (SELECT ...)`).
    InSubquery(Subquery),
    /// Greater than.
    Gt(Value),
    /// Greater than or equal.
    Gte(Value),
    /// Less than.
    Lt(Value),
    /// Less than or equal.
    Lte(Value),
    /// Substring match (`LIKE '%value%'`).
    Contains(String),
    /// Prefix match.
    StartsWith(String),
    /// Suffix match.
    EndsWith(String),
    /// Range test (`BETWEEN low AND high`).
    Range(Value, Value),
    /// NULL test (`IS NULL` when `true`, `IS NOT NULL` when `false`).
    IsNull(bool),
}

/// A composable filter.
///
/// `Q` objects combine with `&` (AND), `|` (OR), and `!` (NOT).
#[derive(Debug, Clone, PartialEq)]
pub enum Q {
    /// A single column lookup.
    Filter {
        /// The column name.
        field: String,
        /// The lookup operation.
        lookup: Lookup,
    },
    /// Raw SQL with its own parameters, inserted verbatim.
    Raw(String, Vec<Value>),
    /// Logical AND of multiple conditions.
    And(Vec<Q>),
    /// Logical OR of multiple conditions.
    Or(Vec<Q>),
    /// Logical negation of a condition.
    Not(Box<Q>),
}

impl Q {
    /// Creates a new filter.
    pub fn filter(field: impl Into<String>, lookup: Lookup) -> Self {
        Self::Filter {
            field: field.into(),
            lookup,
        }
    }

    /// Shorthand for `Q::filter(field, Lookup::Exact(value))`.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::filter(field, Lookup::Exact(value.into()))
    }

    /// Creates a raw SQL fragment.
    pub fn raw(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self::Raw(sql.into(), params)
    }

    /// Returns `true` if this is an empty AND/OR.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::And(children) | Self::Or(children) => children.is_empty(),
            _ => false,
        }
    }
}

impl ops::BitAnd for Q {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            (Self::And(mut left), Self::And(right)) => {
                left.extend(right);
                Self::And(left)
            }
            (Self::And(mut left), other) => {
                left.push(other);
                Self::And(left)
            }
            (other, Self::And(mut right)) => {
                right.insert(0, other);
                Self::And(right)
            }
            (left, right) => Self::And(vec![left, right]),
        }
    }
}

impl ops::BitOr for Q {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        match (self, rhs) {
            (Self::Or(mut left), Self::Or(right)) => {
                left.extend(right);
                Self::Or(left)
            }
            (Self::Or(mut left), other) => {
                left.push(other);
                Self::Or(left)
            }
            (other, Self::Or(mut right)) => {
                right.insert(0, other);
                Self::Or(right)
            }
            (left, right) => Self::Or(vec![left, right]),
        }
    }
}

impl ops::Not for Q {
    type Output = Self;

    fn not(self) -> Self::Output {
        match self {
            Self::Not(inner) => *inner,
            other => Self::Not(Box::new(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eq_shorthand() {
        assert_eq!(
            Q::eq("brand", "BMW"),
            Q::filter("brand", Lookup::Exact(Value::from("BMW")))
        );
    }

    #[test]
    fn test_and_flattening() {
        let combined = (Q::eq("a", 1) & Q::eq("b", 2)) & Q::eq("c", 3);
        match &combined {
            Q::And(children) => assert_eq!(children.len(), 3),
            _ => panic!("Expected And with 3 children"),
        }
    }

    #[test]
    fn test_or_flattening() {
        let combined = Q::eq("a", 1) | (Q::eq("b", 2) | Q::eq("c", 3));
        match &combined {
            Q::Or(children) => assert_eq!(children.len(), 3),
            _ => panic!("Expected Or with 3 children"),
        }
    }

    #[test]
    fn test_double_negation() {
        let q = Q::eq("active", true);
        assert_eq!(!!q.clone(), q);
    }

    #[test]
    fn test_subquery_lookup() {
        let sub = Subquery::new("car_drivers", "driver_id", Q::eq("car_id", 1));
        let q = Q::filter("id", Lookup::InSubquery(sub.clone()));
        match q {
            Q::Filter { lookup: Lookup::InSubquery(s), .. } => assert_eq!(s, sub),
            _ => panic!("Expected InSubquery"),
        }
    }

    #[test]
    fn test_q_is_empty() {
        assert!(Q::And(vec![]).is_empty());
        assert!(!Q::raw("1=1", vec![]).is_empty());
    }
}
