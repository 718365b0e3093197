//! Loading strategies.
//!
//! A [`LoadingStrategy`] executes the five top-level operations against a
//! [`Graph`]. The built-in [`eager::EagerLoader`] is registered as `eager`;
//! other strategies can be registered on the [`Orm`] and selected per entity.
//!
//! Every top-level operation runs in one [`Session`]. The session carries
//! what must not outlive the operation: the loop detector, the path of
//! levels loaded so far (used to install back references), and the set of
//! nodes currently being written.

pub mod eager;
mod persist;
pub mod validate;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use relorm_core::{OrmError, OrmResult, Settings};

use crate::changeset::Change;
use crate::executor::DbExecutor;
use crate::graph::{Graph, NodeId};
use crate::model::{EntityType, ModelDescriptor};
use crate::query::{Condition, Query, Row, SelectColumn, SqlCompiler, WhereNode};
use crate::registry::Orm;
use crate::scope::Scope;
use crate::value::{KeyValue, Value};

/// Executes reads and writes for one entity type.
pub trait LoadingStrategy: Send + Sync {
    /// Loads the single row matching `cond` into `node`, with its relations.
    ///
    /// Fails with [`OrmError::DoesNotExist`] when no row matches.
    fn find_one(
        &self,
        session: &mut Session<'_>,
        graph: &mut Graph,
        node: NodeId,
        scope: &Scope,
        cond: &Condition,
    ) -> OrmResult<()>;

    /// Loads every row matching `cond`, with relations batched per relation.
    fn find_many(
        &self,
        session: &mut Session<'_>,
        graph: &mut Graph,
        scope: &Scope,
        cond: &Condition,
    ) -> OrmResult<Vec<NodeId>>;

    /// Inserts `node` and its relations.
    fn create(
        &self,
        session: &mut Session<'_>,
        graph: &mut Graph,
        node: NodeId,
        scope: &Scope,
    ) -> OrmResult<()>;

    /// Diffs `node` against a fresh snapshot and applies the change-set.
    fn update(
        &self,
        session: &mut Session<'_>,
        graph: &mut Graph,
        node: NodeId,
        scope: &Scope,
        cond: Option<&Condition>,
    ) -> OrmResult<Vec<Change>>;

    /// Deletes the rows matching `cond` (or `node`'s primary key) and the
    /// rows of its owned relations.
    fn delete(
        &self,
        session: &mut Session<'_>,
        graph: &mut Graph,
        node: NodeId,
        scope: &Scope,
        cond: Option<&Condition>,
    ) -> OrmResult<()>;
}

/// Remembers which condition fingerprints each relation chain has fetched.
#[derive(Debug, Default)]
pub struct LoopDetector {
    seen: HashMap<String, HashSet<String>>,
}

impl LoopDetector {
    /// Records a fetch on `chain`; a repeated fingerprint is a loop.
    /// Returns the recorded fingerprint.
    pub fn check(&mut self, chain: &str, cond: &Condition) -> OrmResult<String> {
        let fingerprint = cond.where_sql();
        let seen = self.seen.entry(chain.to_string()).or_default();
        if seen.contains(&fingerprint) {
            return Err(OrmError::InfinityLoop {
                chain: chain.to_string(),
                fingerprint,
            });
        }
        tracing::trace!(chain, fingerprint = %fingerprint, "relation fetch recorded");
        seen.insert(fingerprint.clone());
        Ok(fingerprint)
    }

    /// Drops a recorded fetch.
    pub fn forget(&mut self, chain: &str, fingerprint: &str) {
        if let Some(seen) = self.seen.get_mut(chain) {
            seen.remove(fingerprint);
        }
    }
}

/// One level of loaded nodes and the relation chain that reached it.
#[derive(Debug)]
struct Level {
    nodes: Vec<NodeId>,
    via: Option<String>,
    // (chain, fingerprint) fetched for this level's nodes
    fetched: Vec<(String, String)>,
}

/// State of one top-level operation.
pub struct Session<'s> {
    orm: &'s Orm,
    db: &'s dyn DbExecutor,
    compiler: SqlCompiler,
    loops: LoopDetector,
    path: Vec<Level>,
    writing: Vec<NodeId>,
}

impl<'s> Session<'s> {
    /// Opens a session on the engine's query builder.
    pub fn new(orm: &'s Orm) -> OrmResult<Self> {
        let db: &'s dyn DbExecutor = orm.executor()?.as_ref();
        Ok(Self {
            orm,
            db,
            compiler: SqlCompiler::new(db.backend_type()),
            loops: LoopDetector::default(),
            path: Vec::new(),
            writing: Vec::new(),
        })
    }

    /// The engine.
    pub const fn orm(&self) -> &'s Orm {
        self.orm
    }

    /// The query builder.
    pub const fn db(&self) -> &'s dyn DbExecutor {
        self.db
    }

    /// The engine settings.
    pub const fn settings(&self) -> &'s Settings {
        self.orm.settings()
    }

    /// The descriptor of a related entity.
    pub fn descriptor(&self, entity: EntityType) -> OrmResult<Arc<ModelDescriptor>> {
        self.orm.descriptor_of(entity)
    }

    /// See [`LoopDetector::check`]. The fetch stays recorded while the
    /// innermost level is on the loaded path, so only a repeat further down
    /// the same path is a loop; a sibling branch may fetch it again.
    pub fn check_loop(&mut self, chain: &str, cond: &Condition) -> OrmResult<()> {
        let fingerprint = self.loops.check(chain, cond)?;
        if let Some(level) = self.path.last_mut() {
            level.fetched.push((chain.to_string(), fingerprint));
        }
        Ok(())
    }

    // ── Loaded path ──────────────────────────────────────────────────

    /// Pushes a level of freshly loaded nodes.
    pub fn enter(&mut self, nodes: Vec<NodeId>, via: Option<String>) {
        self.path.push(Level {
            nodes,
            via,
            fetched: Vec::new(),
        });
    }

    /// Pops the innermost level.
    pub fn leave(&mut self) {
        if let Some(level) = self.path.pop() {
            for (chain, fingerprint) in level.fetched {
                self.loops.forget(&chain, &fingerprint);
            }
        }
    }

    /// The relation chain that reached the innermost level.
    pub fn via(&self) -> Option<&str> {
        self.path.last().and_then(|l| l.via.as_deref())
    }

    /// Finds a node of `entity` already on the loaded path whose `attrs`
    /// hold `key`, innermost level first.
    pub fn loaded(
        &self,
        graph: &Graph,
        entity: EntityType,
        attrs: &[String],
        key: &[KeyValue],
    ) -> Option<NodeId> {
        self.path.iter().rev().find_map(|level| {
            level.nodes.iter().copied().find(|&n| {
                graph.node(n).entity == entity && attr_keys(graph, n, attrs).as_deref() == Some(key)
            })
        })
    }

    // ── Writes in progress ───────────────────────────────────────────

    /// Marks a node as being written.
    pub fn begin_write(&mut self, node: NodeId) {
        self.writing.push(node);
    }

    /// Clears the innermost write mark of a node.
    pub fn end_write(&mut self, node: NodeId) {
        if let Some(i) = self.writing.iter().rposition(|n| *n == node) {
            self.writing.remove(i);
        }
    }

    /// Returns `true` while the node is being written higher up.
    pub fn is_writing(&self, node: NodeId) -> bool {
        self.writing.contains(&node)
    }

    // ── Statements ───────────────────────────────────────────────────

    /// Selects the readable fields of `scope` matching `cond`.
    pub fn select(&self, scope: &Scope, cond: &Condition) -> OrmResult<Vec<Row>> {
        let columns = scope
            .readable_fields()
            .map(|f| match &f.select {
                Some(expr) => SelectColumn::Expression(expr.clone(), f.column.clone()),
                None => SelectColumn::Column(f.column.clone()),
            })
            .collect();
        self.run_select(&scope.desc().table, columns, cond)
    }

    /// Selects raw columns of a table.
    pub fn select_columns(
        &self,
        table: &str,
        columns: &[String],
        cond: &Condition,
    ) -> OrmResult<Vec<Row>> {
        let columns = columns.iter().cloned().map(SelectColumn::Column).collect();
        self.run_select(table, columns, cond)
    }

    fn run_select(
        &self,
        table: &str,
        select: Vec<SelectColumn>,
        cond: &Condition,
    ) -> OrmResult<Vec<Row>> {
        let query = Query {
            select,
            where_clause: cond.where_node(),
            order_by: cond.orders().to_vec(),
            limit: cond.limit_value(),
            ..Query::new(table)
        };
        let (sql, params) = self.compiler.compile_select(&query);
        tracing::debug!(sql = %sql, params = params.len(), "select");
        self.db.query(&sql, &params)
    }

    /// Inserts one row and returns the generated id.
    pub fn insert_returning_id(
        &self,
        table: &str,
        columns: &[String],
        values: Vec<Value>,
    ) -> OrmResult<Value> {
        let (sql, params) = self.compiler.compile_insert(table, columns, &[values]);
        tracing::debug!(sql = %sql, params = params.len(), "insert");
        self.db.insert_returning_id(&sql, &params)
    }

    /// Inserts rows without reading back ids.
    pub fn insert(&self, table: &str, columns: &[String], rows: &[Vec<Value>]) -> OrmResult<u64> {
        let (sql, params) = self.compiler.compile_insert(table, columns, rows);
        tracing::debug!(sql = %sql, rows = rows.len(), "insert");
        self.db.execute_sql(&sql, &params)
    }

    /// Inserts rows and returns the generated ids the backend reports.
    pub fn insert_batch(
        &self,
        table: &str,
        columns: &[String],
        rows: &[Vec<Value>],
    ) -> OrmResult<Vec<Value>> {
        let (sql, params) = self.compiler.compile_insert(table, columns, rows);
        tracing::debug!(sql = %sql, rows = rows.len(), "batch insert");
        self.db.insert_batch(&sql, &params, rows.len())
    }

    /// Updates the rows matching `cond`; returns the affected-row count.
    pub fn update(&self, table: &str, sets: &[(String, Value)], cond: &Condition) -> OrmResult<u64> {
        let (sql, params) = self.compiler.compile_update(table, sets, &where_or_all(cond));
        tracing::debug!(sql = %sql, params = params.len(), "update");
        self.db.execute_sql(&sql, &params)
    }

    /// Deletes the rows matching `cond`; returns the affected-row count.
    pub fn delete(&self, table: &str, cond: &Condition) -> OrmResult<u64> {
        let (sql, params) = self.compiler.compile_delete(table, &where_or_all(cond));
        tracing::debug!(sql = %sql, params = params.len(), "delete");
        self.db.execute_sql(&sql, &params)
    }
}

impl fmt::Debug for Session<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("loops", &self.loops)
            .field("path", &self.path)
            .field("writing", &self.writing)
            .finish_non_exhaustive()
    }
}

fn where_or_all(cond: &Condition) -> WhereNode {
    cond.where_node().unwrap_or_else(|| WhereNode::And(Vec::new()))
}

/// The normalized values of `attrs` on a node; `None` when any is unset.
pub(crate) fn attr_keys(graph: &Graph, node: NodeId, attrs: &[String]) -> Option<Vec<KeyValue>> {
    graph.key_of(node, attrs).and_then(|values| Value::keys(&values))
}

/// The equality condition on a node's primary key.
pub(crate) fn pk_condition(desc: &ModelDescriptor, graph: &Graph, node: NodeId) -> OrmResult<Condition> {
    let values = graph
        .key_of(node, &desc.primary_keys)
        .ok_or_else(|| OrmError::MissingPrimary(desc.short_name.clone()))?;
    Ok(desc
        .pk_fields()
        .zip(values)
        .fold(Condition::new(), |cond, (f, v)| cond.eq(f.column.clone(), v)))
}
