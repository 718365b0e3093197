//! The database executor trait.
//!
//! [`DbExecutor`] is the query-builder collaborator the mapper talks to: it
//! runs compiled statements, describes tables, lists their foreign keys, and
//! drives transactions. Backends (e.g. `SqliteBackend` in
//! `relorm-db-backends`) implement it; the mapper only ever holds an
//! `Arc<dyn DbExecutor>`.

use relorm_core::{OrmError, OrmResult};

use crate::query::compiler::{DatabaseBackendType, Row};
use crate::value::Value;

/// One column as reported by [`DbExecutor::describe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    /// The column name.
    pub name: String,
    /// The declared SQL type, e.g. `VARCHAR(20)` or `INTEGER`.
    pub data_type: String,
    /// Whether the column rejects NULL.
    pub not_null: bool,
    /// Whether the column has a DEFAULT clause.
    pub has_default: bool,
    /// Whether the column is part of the primary key.
    pub primary_key: bool,
    /// Whether the database generates the value on insert.
    pub autoincrement: bool,
}

impl ColumnInfo {
    /// Creates a nullable, non-key column.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            not_null: false,
            has_default: false,
            primary_key: false,
            autoincrement: false,
        }
    }

    /// Marks the column as an autoincrement primary key.
    pub fn auto_pk(mut self) -> Self {
        self.primary_key = true;
        self.autoincrement = true;
        self.not_null = true;
        self
    }

    /// Marks the column as part of the primary key.
    pub fn pk(mut self) -> Self {
        self.primary_key = true;
        self.not_null = true;
        self
    }

    /// Marks the column NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    /// Marks the column as having a DEFAULT.
    pub fn with_default(mut self) -> Self {
        self.has_default = true;
        self
    }
}

/// One foreign-key constraint as reported by [`DbExecutor::foreign_keys`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyInfo {
    /// The referencing column on the described table.
    pub column: String,
    /// The referenced table.
    pub referenced_table: String,
    /// The referenced column.
    pub referenced_column: String,
}

impl ForeignKeyInfo {
    /// Creates a foreign key description.
    pub fn new(
        column: impl Into<String>,
        referenced_table: impl Into<String>,
        referenced_column: impl Into<String>,
    ) -> Self {
        Self {
            column: column.into(),
            referenced_table: referenced_table.into(),
            referenced_column: referenced_column.into(),
        }
    }
}

/// Synchronous database executor.
///
/// All operations run on the calling thread and may block on I/O.
pub trait DbExecutor: Send + Sync {
    /// Returns the backend type for SQL compilation.
    fn backend_type(&self) -> DatabaseBackendType;

    /// Runs a statement that does not return rows and returns the number of
    /// rows affected.
    fn execute_sql(&self, sql: &str, params: &[Value]) -> OrmResult<u64>;

    /// Runs a query and returns all result rows.
    fn query(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Row>>;

    /// Runs a query and returns exactly one row.
    ///
    /// Returns `DoesNotExist` if no rows, `MultipleObjectsReturned` if more
    /// than one.
    fn query_one(&self, sql: &str, params: &[Value]) -> OrmResult<Row> {
        let mut rows = self.query(sql, params)?;
        match rows.len() {
            0 => Err(OrmError::DoesNotExist("No rows returned".to_string())),
            1 => rows
                .pop()
                .ok_or_else(|| OrmError::DoesNotExist("No rows returned".to_string())),
            n => Err(OrmError::MultipleObjectsReturned(format!(
                "Expected 1 row, got {n}"
            ))),
        }
    }

    /// Executes an INSERT and returns the generated row id.
    fn insert_returning_id(&self, sql: &str, params: &[Value]) -> OrmResult<Value>;

    /// Executes a multi-row INSERT of `rows` rows and returns the generated
    /// ids in row order.
    ///
    /// Backends that cannot report ids return an empty vector.
    fn insert_batch(&self, sql: &str, params: &[Value], rows: usize) -> OrmResult<Vec<Value>> {
        let _ = rows;
        self.execute_sql(sql, params)?;
        Ok(Vec::new())
    }

    /// Describes the columns of a table, in table order. A missing table
    /// yields an empty list.
    fn describe(&self, database: &str, table: &str) -> OrmResult<Vec<ColumnInfo>>;

    /// Lists the foreign keys declared on a table.
    fn foreign_keys(&self, database: &str, table: &str) -> OrmResult<Vec<ForeignKeyInfo>>;

    /// Returns `true` if the table exists.
    fn table_exists(&self, database: &str, table: &str) -> OrmResult<bool> {
        Ok(!self.describe(database, table)?.is_empty())
    }

    /// Opens a transaction.
    fn begin(&self) -> OrmResult<()>;

    /// Commits the open transaction.
    fn commit(&self) -> OrmResult<()>;

    /// Rolls back the open transaction.
    fn rollback(&self) -> OrmResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct OneRow;

    impl DbExecutor for OneRow {
        fn backend_type(&self) -> DatabaseBackendType {
            DatabaseBackendType::SQLite
        }
        fn execute_sql(&self, _sql: &str, _params: &[Value]) -> OrmResult<u64> {
            Ok(1)
        }
        fn query(&self, sql: &str, _params: &[Value]) -> OrmResult<Vec<Row>> {
            let n = if sql.contains("many") { 2 } else if sql.contains("none") { 0 } else { 1 };
            Ok((0..n)
                .map(|i| Row::new(vec!["id".into()], vec![Value::Int(i)]))
                .collect())
        }
        fn insert_returning_id(&self, _sql: &str, _params: &[Value]) -> OrmResult<Value> {
            Ok(Value::Int(1))
        }
        fn describe(&self, _database: &str, table: &str) -> OrmResult<Vec<ColumnInfo>> {
            if table == "cars" {
                Ok(vec![ColumnInfo::new("id", "INTEGER").auto_pk()])
            } else {
                Ok(Vec::new())
            }
        }
        fn foreign_keys(&self, _database: &str, _table: &str) -> OrmResult<Vec<ForeignKeyInfo>> {
            Ok(Vec::new())
        }
        fn begin(&self) -> OrmResult<()> {
            Ok(())
        }
        fn commit(&self) -> OrmResult<()> {
            Ok(())
        }
        fn rollback(&self) -> OrmResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_query_one_default() {
        let db = OneRow;
        assert!(db.query_one("one", &[]).is_ok());
        assert!(db.query_one("none", &[]).unwrap_err().is_not_found());
        assert!(matches!(
            db.query_one("many", &[]),
            Err(OrmError::MultipleObjectsReturned(_))
        ));
    }

    #[test]
    fn test_table_exists_default() {
        let db = OneRow;
        assert!(db.table_exists("main", "cars").unwrap());
        assert!(!db.table_exists("main", "car_drivers").unwrap());
    }

    #[test]
    fn test_insert_batch_default_reports_no_ids() {
        let db = OneRow;
        assert!(db.insert_batch("INSERT", &[], 2).unwrap().is_empty());
    }

    #[test]
    fn test_column_info_builders() {
        let c = ColumnInfo::new("id", "INTEGER").auto_pk();
        assert!(c.primary_key && c.autoincrement && c.not_null);
        let c = ColumnInfo::new("brand", "VARCHAR(20)").not_null().with_default();
        assert!(c.not_null && c.has_default && !c.primary_key);
    }
}
