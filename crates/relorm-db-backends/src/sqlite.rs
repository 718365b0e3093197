//! SQLite executor using `rusqlite`.
//!
//! This module provides the [`SqliteBackend`] which implements
//! [`DbExecutor`] on one `rusqlite` connection guarded by a `Mutex`.
//!
//! Features:
//! - In-memory database support via `:memory:` path (great for testing)
//! - Table metadata from `PRAGMA table_info` and `PRAGMA foreign_key_list`
//! - Generated ids for multi-row INSERTs derived from `last_insert_rowid()`

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use relorm_core::{OrmError, OrmResult};
use relorm_db::executor::{ColumnInfo, DbExecutor, ForeignKeyInfo};
use relorm_db::query::compiler::{quote_ident, DatabaseBackendType, Row};
use relorm_db::value::Value;
use rusqlite::types::ValueRef;

/// A SQLite database executor.
///
/// Statements run on the calling thread. The connection is shared behind a
/// `Mutex`, so one backend can serve several threads one statement at a
/// time.
pub struct SqliteBackend {
    /// The path to the database file (or ":memory:").
    path: PathBuf,
    conn: Mutex<rusqlite::Connection>,
}

fn db_error(e: &rusqlite::Error) -> OrmError {
    OrmError::DatabaseError(e.to_string())
}

impl SqliteBackend {
    /// Opens a SQLite database at the given path.
    ///
    /// If the path is `:memory:`, an in-memory database is created.
    /// Foreign-key enforcement is switched on.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open(path: impl Into<PathBuf>) -> OrmResult<Self> {
        let path = path.into();
        let conn = if path.to_str() == Some(":memory:") {
            rusqlite::Connection::open_in_memory()
        } else {
            rusqlite::Connection::open(&path)
        }
        .map_err(|e| OrmError::OperationalError(format!("SQLite open failed: {e}")))?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| OrmError::OperationalError(format!("Failed to set pragmas: {e}")))?;
        tracing::debug!(path = %path.display(), "sqlite database opened");

        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    /// Opens an in-memory database.
    pub fn memory() -> OrmResult<Self> {
        Self::open(":memory:")
    }

    /// Returns the database file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn conn(&self) -> MutexGuard<'_, rusqlite::Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs a batch of `;`-separated statements without parameters, e.g. a
    /// schema script.
    pub fn execute_batch(&self, sql: &str) -> OrmResult<()> {
        self.conn().execute_batch(sql).map_err(|e| db_error(&e))
    }

    /// Binds `Value`s to a prepared statement.
    fn bind_params(stmt: &mut rusqlite::Statement<'_>, params: &[Value]) -> OrmResult<()> {
        for (i, param) in params.iter().enumerate() {
            let idx = i + 1;
            match param {
                Value::Null => stmt.raw_bind_parameter(idx, rusqlite::types::Null),
                Value::Bool(b) => stmt.raw_bind_parameter(idx, b),
                Value::Int(v) => stmt.raw_bind_parameter(idx, v),
                Value::Float(v) => stmt.raw_bind_parameter(idx, v),
                Value::String(s) => stmt.raw_bind_parameter(idx, s.as_str()),
                Value::Bytes(b) => stmt.raw_bind_parameter(idx, b.as_slice()),
                Value::Date(d) => stmt.raw_bind_parameter(idx, d.to_string()),
                Value::DateTime(dt) => stmt.raw_bind_parameter(idx, dt.to_string()),
                Value::Time(t) => stmt.raw_bind_parameter(idx, t.to_string()),
                Value::Uuid(u) => stmt.raw_bind_parameter(idx, u.to_string()),
                Value::Json(j) => stmt.raw_bind_parameter(idx, j.to_string()),
                Value::List(vals) => {
                    let rendered: Vec<String> = vals.iter().map(ToString::to_string).collect();
                    let json = serde_json::to_string(&rendered)
                        .map_err(|e| OrmError::DatabaseError(format!("Bind error: {e}")))?;
                    stmt.raw_bind_parameter(idx, json)
                }
            }
            .map_err(|e| OrmError::DatabaseError(format!("Bind error: {e}")))?;
        }
        Ok(())
    }

    fn convert_value(value: ValueRef<'_>) -> Value {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(v) => Value::Int(v),
            ValueRef::Real(v) => Value::Float(v),
            ValueRef::Text(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
            ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
        }
    }

    fn run(conn: &rusqlite::Connection, sql: &str, params: &[Value]) -> OrmResult<u64> {
        let mut stmt = conn.prepare(sql).map_err(|e| db_error(&e))?;
        Self::bind_params(&mut stmt, params)?;
        let count = stmt.raw_execute().map_err(|e| db_error(&e))?;
        Ok(count as u64)
    }

    fn select(conn: &rusqlite::Connection, sql: &str, params: &[Value]) -> OrmResult<Vec<Row>> {
        let mut stmt = conn.prepare(sql).map_err(|e| db_error(&e))?;
        let column_names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        Self::bind_params(&mut stmt, params)?;

        let mut raw_rows = stmt.raw_query();
        let mut rows = Vec::new();
        while let Some(row) = raw_rows.next().map_err(|e| db_error(&e))? {
            let values = (0..column_names.len())
                .map(|i| row.get_ref(i).map(Self::convert_value).map_err(|e| db_error(&e)))
                .collect::<OrmResult<Vec<Value>>>()?;
            rows.push(Row::new(column_names.clone(), values));
        }
        Ok(rows)
    }

    fn pragma(&self, database: &str, pragma: &str, table: &str) -> OrmResult<Vec<Row>> {
        let sql = if database.is_empty() {
            format!("PRAGMA {pragma}({})", quote_ident(table))
        } else {
            format!("PRAGMA {}.{pragma}({})", quote_ident(database), quote_ident(table))
        };
        Self::select(&self.conn(), &sql, &[])
    }
}

impl DbExecutor for SqliteBackend {
    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::SQLite
    }

    fn execute_sql(&self, sql: &str, params: &[Value]) -> OrmResult<u64> {
        Self::run(&self.conn(), sql, params)
    }

    fn query(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Row>> {
        Self::select(&self.conn(), sql, params)
    }

    fn insert_returning_id(&self, sql: &str, params: &[Value]) -> OrmResult<Value> {
        let conn = self.conn();
        Self::run(&conn, sql, params)?;
        Ok(Value::Int(conn.last_insert_rowid()))
    }

    /// Rows of one multi-row INSERT get consecutive rowids, so the ids are
    /// the `rows` values ending at `last_insert_rowid()`.
    fn insert_batch(&self, sql: &str, params: &[Value], rows: usize) -> OrmResult<Vec<Value>> {
        let conn = self.conn();
        let inserted = Self::run(&conn, sql, params)?;
        if inserted != rows as u64 {
            tracing::warn!(expected = rows, inserted, "batch insert row count mismatch; ids not reported");
            return Ok(Vec::new());
        }
        let last = conn.last_insert_rowid();
        let first = last - i64::try_from(rows).map_err(|e| OrmError::DatabaseError(e.to_string()))? + 1;
        Ok((first..=last).map(Value::Int).collect())
    }

    fn describe(&self, database: &str, table: &str) -> OrmResult<Vec<ColumnInfo>> {
        let rows = self.pragma(database, "table_info", table)?;
        let pk_count = rows
            .iter()
            .filter(|r| r.get::<i64>("pk").is_ok_and(|pk| pk > 0))
            .count();
        rows.iter()
            .map(|r| -> OrmResult<ColumnInfo> {
                let name: String = r.get("name")?;
                let data_type: String = r.get("type")?;
                let primary_key = r.get::<i64>("pk")? > 0;
                let has_default = !r.get::<Value>("dflt_value")?.is_null();
                // A lone INTEGER primary key aliases the rowid.
                let autoincrement =
                    primary_key && pk_count == 1 && data_type.eq_ignore_ascii_case("INTEGER");
                Ok(ColumnInfo {
                    name,
                    data_type,
                    not_null: r.get::<i64>("notnull")? != 0 || primary_key,
                    has_default,
                    primary_key,
                    autoincrement,
                })
            })
            .collect()
    }

    fn foreign_keys(&self, database: &str, table: &str) -> OrmResult<Vec<ForeignKeyInfo>> {
        let rows = self.pragma(database, "foreign_key_list", table)?;
        rows.iter()
            .map(|r| -> OrmResult<ForeignKeyInfo> {
                let column: String = r.get("from")?;
                let referenced_table: String = r.get("table")?;
                // A reference without a column targets the primary key.
                let referenced_column = match r.get::<Option<String>>("to")? {
                    Some(to) => to,
                    None => self
                        .describe(database, &referenced_table)?
                        .into_iter()
                        .find(|c| c.primary_key)
                        .map(|c| c.name)
                        .ok_or_else(|| OrmError::DatabaseError(format!(
                            "{referenced_table} has no primary key"
                        )))?,
                };
                Ok(ForeignKeyInfo::new(column, referenced_table, referenced_column))
            })
            .collect()
    }

    fn begin(&self) -> OrmResult<()> {
        self.execute_batch("BEGIN")
    }

    fn commit(&self) -> OrmResult<()> {
        self.execute_batch("COMMIT")
    }

    fn rollback(&self) -> OrmResult<()> {
        self.execute_batch("ROLLBACK")
    }
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
