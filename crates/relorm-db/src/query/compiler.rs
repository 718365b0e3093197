//! SQL statement AST and compiler.
//!
//! [`Query`] describes a SELECT; [`SqlCompiler`] turns it, and INSERT /
//! UPDATE / DELETE requests, into parameterized SQL. Identifiers are always
//! double-quoted. Placeholders are `?` (SQLite) or `$n` (PostgreSQL).

use relorm_core::OrmError;

use super::lookups::{Lookup, Q};
use crate::value::Value;

/// The type of database backend, used to pick the placeholder style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseBackendType {
    /// PostgreSQL (uses `$1, $2, ...` placeholders).
    PostgreSQL,
    /// SQLite (uses `?` placeholders).
    SQLite,
}

/// A column ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    /// The column to order by.
    pub column: String,
    /// Whether to sort in descending order.
    pub descending: bool,
}

impl OrderBy {
    /// Creates an ascending order.
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }

    /// Creates a descending order.
    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }
}

/// A column to select.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectColumn {
    /// A plain column.
    Column(String),
    /// A raw SQL expression selected as `(expr) AS "alias"`.
    Expression(String, String),
    /// All columns (`*`).
    Star,
}

/// A WHERE clause node.
#[derive(Debug, Clone, PartialEq)]
pub enum WhereNode {
    /// A single column condition.
    Condition {
        /// The column name.
        column: String,
        /// The lookup type.
        lookup: Lookup,
    },
    /// Raw SQL with `?` placeholders and their parameters.
    Raw(String, Vec<Value>),
    /// Logical AND of conditions.
    And(Vec<WhereNode>),
    /// Logical OR of conditions.
    Or(Vec<WhereNode>),
    /// Logical NOT of a condition.
    Not(Box<WhereNode>),
}

impl WhereNode {
    /// Converts a `Q` object into a `WhereNode`.
    pub fn from_q(q: &Q) -> Self {
        match q {
            Q::Filter { field, lookup } => Self::Condition {
                column: field.clone(),
                lookup: lookup.clone(),
            },
            Q::Raw(sql, params) => Self::Raw(sql.clone(), params.clone()),
            Q::And(children) => Self::And(children.iter().map(Self::from_q).collect()),
            Q::Or(children) => Self::Or(children.iter().map(Self::from_q).collect()),
            Q::Not(inner) => Self::Not(Box::new(Self::from_q(inner))),
        }
    }

    /// Converts back into a `Q` object, for embedding in a sub-select.
    pub fn to_q(&self) -> Q {
        match self {
            Self::Condition { column, lookup } => Q::filter(column.clone(), lookup.clone()),
            Self::Raw(sql, params) => Q::raw(sql.clone(), params.clone()),
            Self::And(children) => Q::And(children.iter().map(Self::to_q).collect()),
            Self::Or(children) => Q::Or(children.iter().map(Self::to_q).collect()),
            Self::Not(inner) => Q::Not(Box::new(inner.to_q())),
        }
    }

    /// Creates `column = value`.
    pub fn eq(column: impl Into<String>, value: Value) -> Self {
        Self::Condition {
            column: column.into(),
            lookup: Lookup::Exact(value),
        }
    }
}

/// A SELECT statement.
#[derive(Debug, Clone)]
pub struct Query {
    /// The table to select from.
    pub table: String,
    /// Selected columns; empty means `*`.
    pub select: Vec<SelectColumn>,
    /// The WHERE clause.
    pub where_clause: Option<WhereNode>,
    /// ORDER BY columns.
    pub order_by: Vec<OrderBy>,
    /// LIMIT.
    pub limit: Option<usize>,
    /// OFFSET.
    pub offset: Option<usize>,
}

impl Query {
    /// Creates a `SELECT * FROM table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            select: Vec::new(),
            where_clause: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }
}

/// A generic database row.
///
/// `Row` holds column names and their values and provides typed access via
/// [`get`](Row::get).
#[derive(Debug, Clone)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Creates a new row from column names and values.
    ///
    /// # Panics
    ///
    /// Panics if the number of columns does not match the number of values.
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        assert_eq!(
            columns.len(),
            values.len(),
            "Row column count must match value count"
        );
        Self { columns, values }
    }

    /// Returns the column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns `true` if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Gets a typed value by column name.
    ///
    /// # Errors
    ///
    /// Returns an error if the column does not exist or the value cannot be
    /// converted to the requested type.
    pub fn get<T: FromValue>(&self, column: &str) -> Result<T, OrmError> {
        let value = self.get_value(column).ok_or_else(|| {
            OrmError::DatabaseError(format!("Column '{column}' not found in row"))
        })?;
        T::from_value(value)
    }

    /// Returns a reference to the raw value at the given column name.
    pub fn get_value(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| &self.values[idx])
    }

    /// Moves the value of a column out of the row, leaving `Null`.
    pub fn take_value(&mut self, column: &str) -> Option<Value> {
        let idx = self.columns.iter().position(|c| c == column)?;
        Some(std::mem::replace(&mut self.values[idx], Value::Null))
    }
}

/// Trait for converting a [`Value`] to a concrete Rust type.
pub trait FromValue: Sized {
    /// Attempts to convert a value reference to this type.
    fn from_value(value: &Value) -> Result<Self, OrmError>;
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self, OrmError> {
        match value {
            Value::Int(i) => Ok(*i),
            _ => Err(OrmError::DatabaseError(format!("Expected Int, got {value:?}"))),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, OrmError> {
        match value {
            Value::String(s) => Ok(s.clone()),
            _ => Err(OrmError::DatabaseError(format!(
                "Expected String, got {value:?}"
            ))),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, OrmError> {
        match value {
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            _ => Err(OrmError::DatabaseError(format!("Expected Bool, got {value:?}"))),
        }
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, OrmError> {
        Ok(value.clone())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, OrmError> {
        match value {
            Value::Null => Ok(None),
            _ => T::from_value(value).map(Some),
        }
    }
}

/// Quotes an identifier, doubling embedded quotes.
///
/// # Examples
///
/// ```
/// use relorm_db::query::compiler::quote_ident;
///
/// assert_eq!(quote_ident("cars"), "\"cars\"");
/// assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
/// ```
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// The SQL compiler.
#[derive(Debug, Clone, Copy)]
pub struct SqlCompiler {
    backend: DatabaseBackendType,
}

impl SqlCompiler {
    /// Creates a new compiler for the given backend type.
    pub const fn new(backend: DatabaseBackendType) -> Self {
        Self { backend }
    }

    /// Returns a parameter placeholder for the given 1-based index.
    fn placeholder(&self, index: usize) -> String {
        match self.backend {
            DatabaseBackendType::PostgreSQL => format!("${index}"),
            DatabaseBackendType::SQLite => "?".to_string(),
        }
    }

    fn push_param(&self, value: &Value, params: &mut Vec<Value>) -> String {
        params.push(value.clone());
        self.placeholder(params.len())
    }

    /// Compiles a SELECT query into SQL and parameters.
    pub fn compile_select(&self, query: &Query) -> (String, Vec<Value>) {
        let mut params: Vec<Value> = Vec::new();
        let mut sql = String::from("SELECT ");

        let select_parts: Vec<String> = if query.select.is_empty() {
            vec!["*".to_string()]
        } else {
            query
                .select
                .iter()
                .map(|col| match col {
                    SelectColumn::Column(name) => quote_ident(name),
                    SelectColumn::Expression(expr, alias) => {
                        format!("({expr}) AS {}", quote_ident(alias))
                    }
                    SelectColumn::Star => "*".to_string(),
                })
                .collect()
        };
        sql.push_str(&select_parts.join(", "));
        sql.push_str(&format!(" FROM {}", quote_ident(&query.table)));

        if let Some(ref where_clause) = query.where_clause {
            sql.push_str(" WHERE ");
            self.compile_where_node(where_clause, &mut sql, &mut params);
        }

        if !query.order_by.is_empty() {
            let orders: Vec<String> = query
                .order_by
                .iter()
                .map(|o| {
                    let dir = if o.descending { " DESC" } else { " ASC" };
                    format!("{}{dir}", quote_ident(&o.column))
                })
                .collect();
            sql.push_str(&format!(" ORDER BY {}", orders.join(", ")));
        }

        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = query.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }

        (sql, params)
    }

    /// Compiles a (possibly multi-row) INSERT statement.
    ///
    /// Every row must have one value per column.
    pub fn compile_insert(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        let tuples: Vec<String> = rows
            .iter()
            .map(|row| {
                let phs: Vec<String> = row
                    .iter()
                    .map(|val| self.push_param(val, &mut params))
                    .collect();
                format!("({})", phs.join(", "))
            })
            .collect();

        let sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            quote_ident(table),
            cols.join(", "),
            tuples.join(", ")
        );
        (sql, params)
    }

    /// Compiles an UPDATE statement.
    pub fn compile_update(
        &self,
        table: &str,
        fields: &[(String, Value)],
        where_clause: &WhereNode,
    ) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let set_parts: Vec<String> = fields
            .iter()
            .map(|(name, val)| {
                let ph = self.push_param(val, &mut params);
                format!("{} = {ph}", quote_ident(name))
            })
            .collect();

        let mut sql = format!(
            "UPDATE {} SET {} WHERE ",
            quote_ident(table),
            set_parts.join(", ")
        );
        self.compile_where_node(where_clause, &mut sql, &mut params);
        (sql, params)
    }

    /// Compiles a DELETE statement.
    pub fn compile_delete(&self, table: &str, where_clause: &WhereNode) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {} WHERE ", quote_ident(table));
        self.compile_where_node(where_clause, &mut sql, &mut params);
        (sql, params)
    }

    /// Compiles a WHERE clause on its own.
    pub fn compile_where(&self, node: &WhereNode) -> (String, Vec<Value>) {
        let mut sql = String::new();
        let mut params = Vec::new();
        self.compile_where_node(node, &mut sql, &mut params);
        (sql, params)
    }

    fn compile_where_node(&self, node: &WhereNode, sql: &mut String, params: &mut Vec<Value>) {
        match node {
            WhereNode::Condition { column, lookup } => {
                self.compile_lookup(column, lookup, sql, params);
            }
            WhereNode::Raw(raw, raw_params) => {
                sql.push('(');
                match self.backend {
                    DatabaseBackendType::SQLite => {
                        sql.push_str(raw);
                        params.extend(raw_params.iter().cloned());
                    }
                    DatabaseBackendType::PostgreSQL => {
                        let mut it = raw_params.iter();
                        for ch in raw.chars() {
                            if ch == '?' {
                                if let Some(v) = it.next() {
                                    sql.push_str(&self.push_param(v, params));
                                    continue;
                                }
                            }
                            sql.push(ch);
                        }
                    }
                }
                sql.push(')');
            }
            WhereNode::And(children) => {
                self.compile_junction(children, " AND ", "1=1", sql, params);
            }
            WhereNode::Or(children) => {
                self.compile_junction(children, " OR ", "1=0", sql, params);
            }
            WhereNode::Not(inner) => {
                sql.push_str("NOT (");
                self.compile_where_node(inner, sql, params);
                sql.push(')');
            }
        }
    }

    fn compile_junction(
        &self,
        children: &[WhereNode],
        sep: &str,
        empty: &str,
        sql: &mut String,
        params: &mut Vec<Value>,
    ) {
        match children {
            [] => sql.push_str(empty),
            [only] => self.compile_where_node(only, sql, params),
            _ => {
                sql.push('(');
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(sep);
                    }
                    self.compile_where_node(child, sql, params);
                }
                sql.push(')');
            }
        }
    }

    fn compile_lookup(&self, column: &str, lookup: &Lookup, sql: &mut String, params: &mut Vec<Value>) {
        let col = quote_ident(column);
        match lookup {
            Lookup::Exact(val) => {
                if val.is_null() {
                    sql.push_str(&format!("{col} IS NULL"));
                } else {
                    let ph = self.push_param(val, params);
                    sql.push_str(&format!("{col} = {ph}"));
                }
            }
            Lookup::In(vals) => {
                if vals.is_empty() {
                    sql.push_str("1=0");
                    return;
                }
                let phs: Vec<String> = vals.iter().map(|v| self.push_param(v, params)).collect();
                sql.push_str(&format!("{col} IN ({})", phs.join(", ")));
            }
            Lookup::InSubquery(sub) => {
                sql.push_str(&format!(
                    "{col} IN (SELECT {} FROM {} WHERE ",
                    quote_ident(&sub.column),
                    quote_ident(&sub.table)
                ));
                self.compile_where_node(&WhereNode::from_q(&sub.filter), sql, params);
                sql.push(')');
            }
            Lookup::Gt(val) => {
                let ph = self.push_param(val, params);
                sql.push_str(&format!("{col} > {ph}"));
            }
            Lookup::Gte(val) => {
                let ph = self.push_param(val, params);
                sql.push_str(&format!("{col} >= {ph}"));
            }
            Lookup::Lt(val) => {
                let ph = self.push_param(val, params);
                sql.push_str(&format!("{col} < {ph}"));
            }
            Lookup::Lte(val) => {
                let ph = self.push_param(val, params);
                sql.push_str(&format!("{col} <= {ph}"));
            }
            Lookup::Contains(val) => {
                let ph = self.push_param(&Value::String(format!("%{val}%")), params);
                sql.push_str(&format!("{col} LIKE {ph}"));
            }
            Lookup::StartsWith(val) => {
                let ph = self.push_param(&Value::String(format!("{val}%")), params);
                sql.push_str(&format!("{col} LIKE {ph}"));
            }
            Lookup::EndsWith(val) => {
                let ph = self.push_param(&Value::String(format!("%{val}")), params);
                sql.push_str(&format!("{col} LIKE {ph}"));
            }
            Lookup::Range(low, high) => {
                let ph_low = self.push_param(low, params);
                let ph_high = self.push_param(high, params);
                sql.push_str(&format!("{col} BETWEEN {ph_low} AND {ph_high}"));
            }
            Lookup::IsNull(true) => sql.push_str(&format!("{col} IS NULL")),
            Lookup::IsNull(false) => sql.push_str(&format!("{col} IS NOT NULL")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::lookups::Subquery;

    fn sqlite() -> SqlCompiler {
        SqlCompiler::new(DatabaseBackendType::SQLite)
    }

    #[test]
    fn test_select_columns_and_expression() {
        let mut q = Query::new("cars");
        q.select = vec![
            SelectColumn::Column("id".into()),
            SelectColumn::Expression("SELECT COUNT(*) FROM wheels".into(), "wheel_count".into()),
        ];
        q.where_clause = Some(WhereNode::eq("id", Value::Int(1)));
        q.limit = Some(1);
        let (sql, params) = sqlite().compile_select(&q);
        assert_eq!(
            sql,
            "SELECT \"id\", (SELECT COUNT(*) FROM wheels) AS \"wheel_count\" FROM \"cars\" WHERE \"id\" = ? LIMIT 1"
        );
        assert_eq!(params, vec![Value::Int(1)]);
    }

    #[test]
    fn test_select_order_by() {
        let mut q = Query::new("wheels");
        q.order_by = vec![OrderBy::asc("car_id"), OrderBy::desc("id")];
        let (sql, _) = sqlite().compile_select(&q);
        assert_eq!(sql, "SELECT * FROM \"wheels\" ORDER BY \"car_id\" ASC, \"id\" DESC");
    }

    #[test]
    fn test_batch_insert() {
        let cols = vec!["car_id".to_string(), "brand".to_string()];
        let rows = vec![
            vec![Value::Int(1), Value::from("Goodyear")],
            vec![Value::Int(1), Value::from("Pirelli")],
        ];
        let (sql, params) = sqlite().compile_insert("wheels", &cols, &rows);
        assert_eq!(
            sql,
            "INSERT INTO \"wheels\" (\"car_id\", \"brand\") VALUES (?, ?), (?, ?)"
        );
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn test_update_postgres_placeholders() {
        let compiler = SqlCompiler::new(DatabaseBackendType::PostgreSQL);
        let (sql, params) = compiler.compile_update(
            "cars",
            &[("brand".to_string(), Value::from("BMW2"))],
            &WhereNode::eq("id", Value::Int(1)),
        );
        assert_eq!(sql, "UPDATE \"cars\" SET \"brand\" = $1 WHERE \"id\" = $2");
        assert_eq!(params, vec![Value::from("BMW2"), Value::Int(1)]);
    }

    #[test]
    fn test_delete_in() {
        let (sql, params) = sqlite().compile_delete(
            "wheels",
            &WhereNode::Condition {
                column: "id".into(),
                lookup: Lookup::In(vec![Value::Int(2), Value::Int(3)]),
            },
        );
        assert_eq!(sql, "DELETE FROM \"wheels\" WHERE \"id\" IN (?, ?)");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_empty_in_is_false() {
        let (sql, params) = sqlite().compile_where(&WhereNode::Condition {
            column: "id".into(),
            lookup: Lookup::In(vec![]),
        });
        assert_eq!(sql, "1=0");
        assert!(params.is_empty());
    }

    #[test]
    fn test_in_subquery() {
        let node = WhereNode::Condition {
            column: "id".into(),
            lookup: Lookup::InSubquery(Subquery::new(
                "car_drivers",
                "driver_id",
                Q::eq("car_id", 1),
            )),
        };
        let (sql, params) = sqlite().compile_where(&node);
        assert_eq!(
            sql,
            "\"id\" IN (SELECT \"driver_id\" FROM \"car_drivers\" WHERE \"car_id\" = ?)"
        );
        assert_eq!(params, vec![Value::Int(1)]);
    }

    #[test]
    fn test_null_exact_is_is_null() {
        let (sql, params) = sqlite().compile_where(&WhereNode::eq("deleted_at", Value::Null));
        assert_eq!(sql, "\"deleted_at\" IS NULL");
        assert!(params.is_empty());
    }

    #[test]
    fn test_and_or_not() {
        let node = WhereNode::And(vec![
            WhereNode::eq("a", Value::Int(1)),
            WhereNode::Or(vec![
                WhereNode::eq("b", Value::Int(2)),
                WhereNode::Not(Box::new(WhereNode::eq("c", Value::Int(3)))),
            ]),
        ]);
        let (sql, _) = sqlite().compile_where(&node);
        assert_eq!(sql, "(\"a\" = ? AND (\"b\" = ? OR NOT (\"c\" = ?)))");
    }

    #[test]
    fn test_single_child_junction_has_no_parens() {
        let (sql, _) = sqlite().compile_where(&WhereNode::And(vec![WhereNode::eq("a", Value::Int(1))]));
        assert_eq!(sql, "\"a\" = ?");
    }

    #[test]
    fn test_raw_postgres_renumbering() {
        let compiler = SqlCompiler::new(DatabaseBackendType::PostgreSQL);
        let node = WhereNode::And(vec![
            WhereNode::eq("a", Value::Int(1)),
            WhereNode::Raw("b > ? AND c < ?".into(), vec![Value::Int(2), Value::Int(3)]),
        ]);
        let (sql, params) = compiler.compile_where(&node);
        assert_eq!(sql, "(\"a\" = $1 AND (b > $2 AND c < $3))");
        assert_eq!(params.len(), 3);
    }

    #[test]
    fn test_row_access() {
        let mut row = Row::new(
            vec!["id".into(), "brand".into()],
            vec![Value::Int(1), Value::from("BMW")],
        );
        assert_eq!(row.get::<i64>("id").unwrap(), 1);
        assert_eq!(row.get::<String>("brand").unwrap(), "BMW");
        assert!(row.get::<i64>("missing").is_err());
        assert_eq!(row.take_value("brand"), Some(Value::from("BMW")));
        assert_eq!(row.get_value("brand"), Some(&Value::Null));
    }
}
