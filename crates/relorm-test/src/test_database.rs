//! Test database utilities for relorm.
//!
//! Provides [`TestDatabase`], an in-memory SQLite database wrapper for use in
//! tests. It implements [`DbExecutor`] so an [`Orm`](relorm_db::Orm) can run
//! on it, and records every statement it forwards so tests can assert on
//! the exact SQL and on statement counts.
//!
//! ## Example
//!
//! ```rust
//! use relorm_test::test_database::TestDatabase;
//!
//! let db = TestDatabase::new();
//! db.execute_raw("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
//!     .unwrap();
//! assert_eq!(db.query_count(), 1);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use relorm_core::OrmResult;
use relorm_db::executor::{ColumnInfo, DbExecutor, ForeignKeyInfo};
use relorm_db::query::compiler::{DatabaseBackendType, Row};
use relorm_db::value::Value;
use relorm_db_backends::sqlite::SqliteBackend;

/// An in-memory SQLite database for testing.
///
/// Wraps a [`SqliteBackend`] in an `Arc` so clones share one database, one
/// statement log and one counter. Every statement sent to the database is
/// counted, transaction control included; schema introspection
/// (`describe`, `foreign_keys`) is not.
///
/// The database is created fresh in memory for each `TestDatabase::new()`
/// call, providing complete test isolation.
#[derive(Clone)]
pub struct TestDatabase {
    backend: Arc<SqliteBackend>,
    query_count: Arc<AtomicUsize>,
    log: Arc<Mutex<Vec<String>>>,
}

impl TestDatabase {
    /// Creates a new in-memory SQLite test database.
    ///
    /// # Panics
    ///
    /// Panics if the in-memory database cannot be created.
    pub fn new() -> Self {
        let backend = SqliteBackend::memory().expect("Failed to create in-memory SQLite database");
        Self {
            backend: Arc::new(backend),
            query_count: Arc::new(AtomicUsize::new(0)),
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Creates a database and runs `schema` on it, then clears the log.
    ///
    /// # Panics
    ///
    /// Panics if the schema script fails.
    pub fn with_schema(schema: &str) -> Self {
        let db = Self::new();
        db.execute_raw(schema).expect("Failed to apply test schema");
        db.reset_query_count();
        db
    }

    /// Executes a raw SQL script with no parameters.
    ///
    /// The script may hold several `;`-separated statements; it counts as
    /// one query.
    ///
    /// # Errors
    ///
    /// Returns an error if the SQL execution fails.
    pub fn execute_raw(&self, sql: &str) -> OrmResult<()> {
        self.record(sql);
        self.backend.execute_batch(sql)
    }

    /// Drops all user-created tables in the database.
    ///
    /// # Errors
    ///
    /// Returns an error if the SQL execution fails.
    pub fn teardown(&self) -> OrmResult<()> {
        let rows = self.backend.query(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'",
            &[],
        )?;
        for row in &rows {
            let table_name: String = row.get("name")?;
            self.backend
                .execute_sql(&format!("DROP TABLE IF EXISTS \"{table_name}\""), &[])?;
        }
        Ok(())
    }

    /// Returns the current query count.
    pub fn query_count(&self) -> usize {
        self.query_count.load(Ordering::Relaxed)
    }

    /// Resets the query counter to zero and clears the statement log.
    pub fn reset_query_count(&self) {
        self.query_count.store(0, Ordering::Relaxed);
        self.lock_log().clear();
    }

    /// Returns the statements executed since the last reset, in order.
    pub fn statements(&self) -> Vec<String> {
        self.lock_log().clone()
    }

    /// Returns the logged statements that start with `SELECT`.
    pub fn selects(&self) -> Vec<String> {
        self.lock_log()
            .iter()
            .filter(|sql| sql.starts_with("SELECT"))
            .cloned()
            .collect()
    }

    /// Returns a reference to the inner `SqliteBackend`.
    pub fn backend(&self) -> &SqliteBackend {
        &self.backend
    }

    fn lock_log(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.log.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, sql: &str) {
        self.query_count.fetch_add(1, Ordering::Relaxed);
        self.lock_log().push(sql.to_string());
        tracing::trace!(sql, "test database statement");
    }
}

impl Default for TestDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TestDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestDatabase")
            .field("query_count", &self.query_count())
            .finish_non_exhaustive()
    }
}

impl DbExecutor for TestDatabase {
    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::SQLite
    }

    fn execute_sql(&self, sql: &str, params: &[Value]) -> OrmResult<u64> {
        self.record(sql);
        self.backend.execute_sql(sql, params)
    }

    fn query(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Row>> {
        self.record(sql);
        self.backend.query(sql, params)
    }

    fn insert_returning_id(&self, sql: &str, params: &[Value]) -> OrmResult<Value> {
        self.record(sql);
        self.backend.insert_returning_id(sql, params)
    }

    fn insert_batch(&self, sql: &str, params: &[Value], rows: usize) -> OrmResult<Vec<Value>> {
        self.record(sql);
        self.backend.insert_batch(sql, params, rows)
    }

    fn describe(&self, database: &str, table: &str) -> OrmResult<Vec<ColumnInfo>> {
        self.backend.describe(database, table)
    }

    fn foreign_keys(&self, database: &str, table: &str) -> OrmResult<Vec<ForeignKeyInfo>> {
        self.backend.foreign_keys(database, table)
    }

    fn begin(&self) -> OrmResult<()> {
        self.record("BEGIN");
        self.backend.begin()
    }

    fn commit(&self) -> OrmResult<()> {
        self.record("COMMIT");
        self.backend.commit()
    }

    fn rollback(&self) -> OrmResult<()> {
        self.record("ROLLBACK");
        self.backend.rollback()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_creates_database() {
        let db = TestDatabase::new();
        assert_eq!(db.backend_type(), DatabaseBackendType::SQLite);
        assert_eq!(db.query_count(), 0);
    }

    #[test]
    fn test_execute_raw_script() {
        let db = TestDatabase::new();
        db.execute_raw(
            "CREATE TABLE a (id INTEGER PRIMARY KEY);
             CREATE TABLE b (id INTEGER PRIMARY KEY, a_id INTEGER REFERENCES a(id));",
        )
        .unwrap();
        assert_eq!(db.query_count(), 1);
        assert!(db.table_exists("main", "b").unwrap());
    }

    #[test]
    fn test_with_schema_starts_clean() {
        let db = TestDatabase::with_schema("CREATE TABLE t (id INTEGER PRIMARY KEY)");
        assert_eq!(db.query_count(), 0);
        assert!(db.statements().is_empty());
    }

    #[test]
    fn test_statement_log() {
        let db = TestDatabase::with_schema("CREATE TABLE t (id INTEGER PRIMARY KEY, val TEXT)");
        db.execute_sql("INSERT INTO t (val) VALUES (?)", &[Value::from("x")])
            .unwrap();
        db.query("SELECT val FROM t", &[]).unwrap();
        assert_eq!(
            db.statements(),
            vec!["INSERT INTO t (val) VALUES (?)", "SELECT val FROM t"]
        );
        assert_eq!(db.selects(), vec!["SELECT val FROM t"]);

        db.reset_query_count();
        assert!(db.statements().is_empty());
    }

    #[test]
    fn test_introspection_is_not_counted() {
        let db = TestDatabase::with_schema("CREATE TABLE t (id INTEGER PRIMARY KEY)");
        db.describe("main", "t").unwrap();
        db.foreign_keys("main", "t").unwrap();
        assert_eq!(db.query_count(), 0);
    }

    #[test]
    fn test_transactions_are_logged() {
        let db = TestDatabase::with_schema("CREATE TABLE t (id INTEGER PRIMARY KEY)");
        db.begin().unwrap();
        db.execute_sql("INSERT INTO t (id) VALUES (?)", &[Value::from(1)])
            .unwrap();
        db.rollback().unwrap();
        assert_eq!(db.statements()[0], "BEGIN");
        assert_eq!(db.statements()[2], "ROLLBACK");
        assert!(db.backend().query("SELECT id FROM t", &[]).unwrap().is_empty());
    }

    #[test]
    fn test_teardown_drops_tables() {
        let db = TestDatabase::new();
        db.execute_raw("CREATE TABLE a (id INTEGER PRIMARY KEY); CREATE TABLE b (id INTEGER PRIMARY KEY);")
            .unwrap();
        db.teardown().unwrap();
        let result = db.execute_sql("INSERT INTO a (id) VALUES (?)", &[Value::from(1)]);
        assert!(result.is_err());
    }

    #[test]
    fn test_clone_shares_state() {
        let db = TestDatabase::new();
        let db2 = db.clone();
        db.execute_raw("CREATE TABLE shared (id INTEGER PRIMARY KEY)")
            .unwrap();
        assert!(db2.query("SELECT * FROM shared", &[]).is_ok());
        assert_eq!(db.query_count(), 2);
        assert_eq!(db.query_count(), db2.query_count());
    }
}
