//! Query conditions: WHERE predicates plus ordering and limit.
//!
//! A [`Condition`] is what callers hand to find, update, and delete, and what
//! the loader builds for each relation fetch. Its serialized WHERE clause
//! ([`Condition::where_sql`]) doubles as the fingerprint used by loop
//! detection.

use super::compiler::{DatabaseBackendType, OrderBy, SqlCompiler, WhereNode};
use super::lookups::{Lookup, Q};
use crate::value::Value;

/// A WHERE predicate list (ANDed), ordering, and limit.
///
/// # Examples
///
/// ```
/// use relorm_db::query::Condition;
///
/// let cond = Condition::new().eq("id", 1).eq("brand", "BMW");
/// assert_eq!(cond.where_sql(), "(\"id\" = ? AND \"brand\" = ?) [1, BMW]");
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Condition {
    nodes: Vec<WhereNode>,
    order_by: Vec<OrderBy>,
    limit: Option<usize>,
}

impl Condition {
    /// Creates an empty condition (matches everything).
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `column = value`.
    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.nodes.push(WhereNode::eq(column, value.into()));
        self
    }

    /// Adds a lookup on a column.
    pub fn filter(mut self, column: impl Into<String>, lookup: Lookup) -> Self {
        self.nodes.push(WhereNode::Condition {
            column: column.into(),
            lookup,
        });
        self
    }

    /// Adds a composed `Q` filter.
    pub fn q(mut self, q: &Q) -> Self {
        self.nodes.push(WhereNode::from_q(q));
        self
    }

    /// Adds a raw SQL predicate with `?` placeholders.
    pub fn raw(mut self, sql: impl Into<String>, params: Vec<Value>) -> Self {
        self.nodes.push(WhereNode::Raw(sql.into(), params));
        self
    }

    /// Merges another condition into this one; predicates are ANDed, the
    /// other's ordering is appended, and its limit wins when set.
    pub fn and(mut self, other: Self) -> Self {
        self.nodes.extend(other.nodes);
        self.order_by.extend(other.order_by);
        if other.limit.is_some() {
            self.limit = other.limit;
        }
        self
    }

    /// Appends an ordering.
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    /// Sets the row limit.
    pub const fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Adds a predicate in place.
    pub fn push(&mut self, node: WhereNode) {
        self.nodes.push(node);
    }

    /// Returns `true` when there is no predicate.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the combined WHERE node, or `None` for an empty condition.
    pub fn where_node(&self) -> Option<WhereNode> {
        match self.nodes.as_slice() {
            [] => None,
            [only] => Some(only.clone()),
            many => Some(WhereNode::And(many.to_vec())),
        }
    }

    /// Returns the orderings.
    pub fn orders(&self) -> &[OrderBy] {
        &self.order_by
    }

    /// Returns the row limit.
    pub const fn limit_value(&self) -> Option<usize> {
        self.limit
    }

    /// Serializes the WHERE clause with its parameters.
    ///
    /// Two conditions with the same predicates produce the same string.
    pub fn where_sql(&self) -> String {
        let Some(node) = self.where_node() else {
            return String::new();
        };
        let (sql, params) = SqlCompiler::new(DatabaseBackendType::SQLite).compile_where(&node);
        let rendered: Vec<String> = params.iter().map(ToString::to_string).collect();
        format!("{sql} [{}]", rendered.join(", "))
    }
}
