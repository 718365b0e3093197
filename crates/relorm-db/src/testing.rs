//! Test support: a scripted executor and a small entity zoo.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use relorm_core::OrmResult;

use crate::executor::{ColumnInfo, DbExecutor, ForeignKeyInfo};
use crate::model::{Entity, EntityDecl};
use crate::query::{DatabaseBackendType, Row};
use crate::value::{Value, ValueType};

type Table = (Vec<ColumnInfo>, Vec<ForeignKeyInfo>);

/// An executor backed by canned table metadata and canned query results.
///
/// Every statement is logged; `describe` and `foreign_keys` are not.
pub(crate) struct MockExecutor {
    tables: HashMap<String, Table>,
    rows: Mutex<Vec<(String, Vec<Row>)>>,
    log: Mutex<Vec<(String, Vec<Value>)>>,
    next_id: AtomicI64,
    affected: AtomicU64,
    backend: DatabaseBackendType,
}

impl MockExecutor {
    pub(crate) fn new() -> Self {
        Self {
            tables: HashMap::new(),
            rows: Mutex::new(Vec::new()),
            log: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
            affected: AtomicU64::new(1),
            backend: DatabaseBackendType::SQLite,
        }
    }

    /// Reports `backend` as the placeholder dialect.
    pub(crate) fn with_backend(mut self, backend: DatabaseBackendType) -> Self {
        self.backend = backend;
        self
    }

    pub(crate) fn with_table(
        mut self,
        name: &str,
        columns: Vec<ColumnInfo>,
        fks: Vec<ForeignKeyInfo>,
    ) -> Self {
        self.tables.insert(name.to_string(), (columns, fks));
        self
    }

    /// Queries whose SQL contains `fragment` return `rows`. Later
    /// registrations win.
    pub(crate) fn on_query(&self, fragment: &str, columns: &[&str], rows: Vec<Vec<Value>>) {
        let columns: Vec<String> = columns.iter().map(ToString::to_string).collect();
        let rows = rows
            .into_iter()
            .map(|values| Row::new(columns.clone(), values))
            .collect();
        self.rows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(0, (fragment.to_string(), rows));
    }

    /// Sets the affected-row count reported by `execute_sql`.
    pub(crate) fn set_affected(&self, n: u64) {
        self.affected.store(n, Ordering::SeqCst);
    }

    pub(crate) fn statements(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(sql, _)| sql.clone())
            .collect()
    }

    pub(crate) fn params(&self) -> Vec<Vec<Value>> {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, p)| p.clone())
            .collect()
    }

    fn record(&self, sql: &str, params: &[Value]) {
        self.log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((sql.to_string(), params.to_vec()));
    }
}

impl DbExecutor for MockExecutor {
    fn backend_type(&self) -> DatabaseBackendType {
        self.backend
    }

    fn execute_sql(&self, sql: &str, params: &[Value]) -> OrmResult<u64> {
        self.record(sql, params);
        Ok(self.affected.load(Ordering::SeqCst))
    }

    fn query(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Row>> {
        self.record(sql, params);
        let canned = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(canned
            .iter()
            .find(|(fragment, _)| sql.contains(fragment.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }

    fn insert_returning_id(&self, sql: &str, params: &[Value]) -> OrmResult<Value> {
        self.record(sql, params);
        Ok(Value::Int(self.next_id.fetch_add(1, Ordering::SeqCst)))
    }

    fn insert_batch(&self, sql: &str, params: &[Value], rows: usize) -> OrmResult<Vec<Value>> {
        self.record(sql, params);
        let first = self.next_id.fetch_add(rows as i64, Ordering::SeqCst);
        Ok((0..rows as i64).map(|i| Value::Int(first + i)).collect())
    }

    fn describe(&self, _database: &str, table: &str) -> OrmResult<Vec<ColumnInfo>> {
        Ok(self.tables.get(table).map(|t| t.0.clone()).unwrap_or_default())
    }

    fn foreign_keys(&self, _database: &str, table: &str) -> OrmResult<Vec<ForeignKeyInfo>> {
        Ok(self.tables.get(table).map(|t| t.1.clone()).unwrap_or_default())
    }

    fn begin(&self) -> OrmResult<()> {
        self.record("BEGIN", &[]);
        Ok(())
    }

    fn commit(&self) -> OrmResult<()> {
        self.record("COMMIT", &[]);
        Ok(())
    }

    fn rollback(&self) -> OrmResult<()> {
        self.record("ROLLBACK", &[]);
        Ok(())
    }
}

fn auto_pk() -> ColumnInfo {
    ColumnInfo::new("id", "INTEGER").auto_pk()
}

fn fk(column: &str, table: &str) -> ForeignKeyInfo {
    ForeignKeyInfo::new(column, table, "id")
}

/// The car/owner/wheel/driver/component/person schema.
pub(crate) fn car_schema() -> MockExecutor {
    MockExecutor::new()
        .with_table(
            "owners",
            vec![
                auto_pk(),
                ColumnInfo::new("name", "VARCHAR(50)").not_null(),
                ColumnInfo::new("created_at", "DATETIME"),
                ColumnInfo::new("updated_at", "DATETIME"),
            ],
            vec![],
        )
        .with_table(
            "cars",
            vec![
                auto_pk(),
                ColumnInfo::new("owner_id", "INTEGER"),
                ColumnInfo::new("brand", "VARCHAR(20)").not_null(),
                ColumnInfo::new("created_at", "DATETIME"),
                ColumnInfo::new("updated_at", "DATETIME"),
            ],
            vec![fk("owner_id", "owners")],
        )
        .with_table(
            "wheels",
            vec![
                auto_pk(),
                ColumnInfo::new("car_id", "INTEGER"),
                ColumnInfo::new("brand", "VARCHAR(20)"),
            ],
            vec![fk("car_id", "cars")],
        )
        .with_table(
            "drivers",
            vec![auto_pk(), ColumnInfo::new("name", "VARCHAR(50)")],
            vec![],
        )
        .with_table(
            "car_drivers",
            vec![
                ColumnInfo::new("car_id", "INTEGER").pk(),
                ColumnInfo::new("driver_id", "INTEGER").pk(),
            ],
            vec![fk("car_id", "cars"), fk("driver_id", "drivers")],
        )
        .with_table(
            "components",
            vec![
                auto_pk(),
                ColumnInfo::new("car_id", "INTEGER"),
                ColumnInfo::new("car_type", "VARCHAR(20)"),
                ColumnInfo::new("brand", "VARCHAR(20)"),
            ],
            vec![],
        )
        .with_table(
            "persons",
            vec![
                auto_pk(),
                ColumnInfo::new("name", "VARCHAR(50)"),
                ColumnInfo::new("parent_id", "INTEGER"),
                ColumnInfo::new("deleted_at", "DATETIME"),
            ],
            vec![fk("parent_id", "persons")],
        )
        .with_table(
            "friendships",
            vec![
                ColumnInfo::new("person_id", "INTEGER").pk(),
                ColumnInfo::new("friend_id", "INTEGER").pk(),
            ],
            vec![fk("person_id", "persons"), fk("friend_id", "persons")],
        )
}

pub(crate) struct Owner;

impl Entity for Owner {
    fn declare() -> EntityDecl {
        EntityDecl::new()
            .scalar("ID", ValueType::Int, "")
            .scalar("Name", ValueType::Text, "")
            .many::<Car>("Cars", r#"validate:"dive""#)
            .base_model()
    }
}

pub(crate) struct Car;

impl Entity for Car {
    fn declare() -> EntityDecl {
        EntityDecl::new()
            .scalar("ID", ValueType::Int, "")
            .nullable("OwnerID", ValueType::Int, "")
            .scalar("Brand", ValueType::Text, r#"validate:"max=20""#)
            .optional_one::<Owner>("Owner", "")
            .many::<Wheel>("Wheels", "")
            .many::<Driver>("Drivers", "")
            .optional_one::<Component>("Radio", r#"polymorphic:"Car" polymorphic_value:"radio""#)
            .optional_one::<Component>("Liquid", r#"polymorphic:"Car" polymorphic_value:"liquid""#)
            .base_model()
    }
}

pub(crate) struct Wheel;

impl Entity for Wheel {
    fn declare() -> EntityDecl {
        EntityDecl::new()
            .scalar("ID", ValueType::Int, "")
            .nullable("CarID", ValueType::Int, "")
            .scalar("Brand", ValueType::Text, "")
            .optional_one::<Car>("Car", "")
    }
}

pub(crate) struct Driver;

impl Entity for Driver {
    fn declare() -> EntityDecl {
        EntityDecl::new()
            .scalar("ID", ValueType::Int, "")
            .scalar("Name", ValueType::Text, "")
    }
}

pub(crate) struct Component;

impl Entity for Component {
    fn declare() -> EntityDecl {
        EntityDecl::new()
            .scalar("ID", ValueType::Int, "")
            .nullable("CarID", ValueType::Int, "")
            .nullable("CarType", ValueType::Text, "")
            .scalar("Brand", ValueType::Text, "")
    }
}

pub(crate) struct Person;

impl Entity for Person {
    fn declare() -> EntityDecl {
        EntityDecl::new()
            .scalar("ID", ValueType::Int, "")
            .scalar("Name", ValueType::Text, "")
            .nullable("ParentID", ValueType::Int, "")
            .nullable("DeletedAt", ValueType::DateTime, "")
            .optional_one::<Person>("Parent", "")
            .many::<Person>("Children", "")
            .many::<Person>("Friends", r#"orm:"join_table:friendships""#)
    }
}
