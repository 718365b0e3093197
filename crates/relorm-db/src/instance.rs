//! The model instance: one entity graph plus the per-call options of the
//! operations run on it.
//!
//! An [`Instance`] owns its [`Graph`]; the root node is the entity the
//! operations act on. Whitelists, blacklists and relation conditions apply to
//! every following operation until changed.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use relorm_core::logging::operation_span;
use relorm_core::{OrmError, OrmResult};

use crate::changeset::{Change, Differ};
use crate::graph::{Graph, NodeId, Record};
use crate::loader::{pk_condition, LoadingStrategy, Session};
use crate::model::ModelDescriptor;
use crate::query::Condition;
use crate::registry::Orm;
use crate::scope::Scope;
use crate::transactions::{atomic, Transaction};
use crate::value::Value;
use crate::wblist::WbList;

/// An entity of one model and the operations on it.
///
/// # Examples
///
/// ```ignore
/// let mut car = orm.model::<Car>()?;
/// car.set_whitelist(["Brand", "Owner.Name"]);
/// car.first(Condition::new().eq("id", 1))?;
/// car.set("Brand", "BMW")?;
/// car.update(None)?;
/// assert_eq!(car.changes()[0].field, "Brand");
/// ```
pub struct Instance<'o> {
    orm: &'o Orm,
    desc: Arc<ModelDescriptor>,
    graph: Graph,
    root: NodeId,
    list: Option<WbList>,
    conditions: BTreeMap<String, Condition>,
    external_tx: bool,
    changes: Vec<Change>,
}

impl<'o> Instance<'o> {
    pub(crate) fn new(orm: &'o Orm, desc: Arc<ModelDescriptor>) -> Self {
        let mut graph = Graph::new();
        let root = graph.add(desc.entity);
        Self {
            orm,
            desc,
            graph,
            root,
            list: None,
            conditions: BTreeMap::new(),
            external_tx: false,
            changes: Vec::new(),
        }
    }

    /// The model descriptor.
    pub fn descriptor(&self) -> &Arc<ModelDescriptor> {
        &self.desc
    }

    /// Restricts following operations to the named attributes (plus the keys
    /// they need). Dotted names address related entities.
    pub fn set_whitelist<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.list = Some(WbList::white(names));
    }

    /// Excludes the named attributes from following operations.
    pub fn set_blacklist<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.list = Some(WbList::black(names));
    }

    /// Drops any white/blacklist.
    pub fn clear_list(&mut self) {
        self.list = None;
    }

    /// Adds a predicate to the fetch of a relation, addressed by its path
    /// from this model (`Wheels`, `Owner.Cars`).
    pub fn set_relation_condition(&mut self, path: impl Into<String>, cond: Condition) {
        self.conditions.insert(path.into(), cond);
    }

    /// Runs following writes inside the caller's transaction.
    ///
    /// The engine never commits or rolls back that transaction.
    pub fn set_tx(&mut self, tx: &Transaction) {
        self.external_tx = tx.is_open();
    }

    /// Returns following writes to engine-managed transactions.
    pub fn clear_tx(&mut self) {
        self.external_tx = false;
    }

    // ── Entity access ────────────────────────────────────────────────

    /// The root node.
    pub const fn root(&self) -> NodeId {
        self.root
    }

    /// The entity graph.
    pub const fn graph(&self) -> &Graph {
        &self.graph
    }

    /// The entity graph, for building nested data by hand.
    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    fn unknown(&self, attribute: &str) -> OrmError {
        OrmError::UnknownAttribute {
            entity: self.desc.short_name.clone(),
            attribute: attribute.to_string(),
        }
    }

    /// Reads a scalar of the root entity.
    pub fn get(&self, attr: &str) -> OrmResult<&Value> {
        if self.desc.field(attr).is_none() {
            return Err(self.unknown(attr));
        }
        Ok(self.graph.get(self.root, attr))
    }

    /// Writes a scalar of the root entity, coerced to its declared type.
    pub fn set(&mut self, attr: &str, value: impl Into<Value>) -> OrmResult<()> {
        let field = self.desc.field(attr).ok_or_else(|| self.unknown(attr))?;
        let value = value.into().coerce(field.value_type);
        self.graph.set(self.root, attr, value);
        Ok(())
    }

    /// The node a one-shaped relation of the root points at.
    pub fn one(&self, rel: &str) -> OrmResult<Option<NodeId>> {
        match self.desc.relation(rel) {
            Some(r) if !r.shape.is_many() => Ok(self.graph.one(self.root, rel)),
            _ => Err(self.unknown(rel)),
        }
    }

    /// The nodes of a list relation of the root.
    pub fn many(&self, rel: &str) -> OrmResult<&[NodeId]> {
        match self.desc.relation(rel) {
            Some(r) if r.shape.is_many() => Ok(self.graph.many(self.root, rel)),
            _ => Err(self.unknown(rel)),
        }
    }

    /// Assigns nested data onto the root entity.
    ///
    /// Every name must be a declared attribute of its entity; scalars are
    /// coerced to the declared types.
    pub fn assign(&mut self, record: &Record) -> OrmResult<()> {
        let desc = Arc::clone(&self.desc);
        assign_node(self.orm, &mut self.graph, self.root, &desc, record)
    }

    // ── Operations ───────────────────────────────────────────────────

    fn scope(&self) -> OrmResult<Scope> {
        Scope::new(
            Arc::clone(&self.desc),
            self.list.as_ref(),
            self.conditions.clone(),
            &[],
        )
    }

    fn strategy(&self) -> OrmResult<Arc<dyn LoadingStrategy>> {
        self.orm.strategy(&self.desc.strategy)
    }

    fn reset(&mut self) {
        self.graph = Graph::new();
        self.root = self.graph.add(self.desc.entity);
    }

    /// Loads the first entity matching `cond` into a fresh root.
    pub fn first(&mut self, cond: Condition) -> OrmResult<()> {
        let span = operation_span("find_one", &self.desc.name);
        let _guard = span.enter();
        let scope = self.scope()?;
        let strategy = self.strategy()?;
        self.reset();
        let mut session = Session::new(self.orm)?;
        strategy.find_one(&mut session, &mut self.graph, self.root, &scope, &cond)
    }

    /// Loads every entity matching `cond`; the returned nodes live in
    /// [`graph`](Self::graph).
    pub fn all(&mut self, cond: Condition) -> OrmResult<Vec<NodeId>> {
        let span = operation_span("find_many", &self.desc.name);
        let _guard = span.enter();
        let scope = self.scope()?;
        let strategy = self.strategy()?;
        self.reset();
        let mut session = Session::new(self.orm)?;
        strategy.find_many(&mut session, &mut self.graph, &scope, &cond)
    }

    /// Inserts the root entity and its nested data.
    pub fn create(&mut self) -> OrmResult<()> {
        let span = operation_span("create", &self.desc.name);
        let _guard = span.enter();
        let scope = self.scope()?;
        let strategy = self.strategy()?;
        let db = self.orm.executor()?;
        let mut session = Session::new(self.orm)?;
        let (graph, root) = (&mut self.graph, self.root);
        atomic(db.as_ref(), self.external_tx, || {
            strategy.create(&mut session, graph, root, &scope)
        })
    }

    /// Writes the difference between the root entity and its stored row.
    ///
    /// Without `cond` the stored row is addressed by primary key. Returns the
    /// applied change-set, also kept for [`changes`](Self::changes).
    pub fn update(&mut self, cond: Option<Condition>) -> OrmResult<&[Change]> {
        let span = operation_span("update", &self.desc.name);
        let _guard = span.enter();
        let scope = self.scope()?;
        let strategy = self.strategy()?;
        let db = self.orm.executor()?;
        let mut session = Session::new(self.orm)?;
        let (graph, root) = (&mut self.graph, self.root);
        self.changes = atomic(db.as_ref(), self.external_tx, || {
            strategy.update(&mut session, graph, root, &scope, cond.as_ref())
        })?;
        Ok(&self.changes)
    }

    /// Deletes the stored row of the root entity, or the rows matching
    /// `cond`, with the rows it owns.
    pub fn delete(&mut self, cond: Option<Condition>) -> OrmResult<()> {
        let span = operation_span("delete", &self.desc.name);
        let _guard = span.enter();
        let scope = self.scope()?;
        let strategy = self.strategy()?;
        let db = self.orm.executor()?;
        let mut session = Session::new(self.orm)?;
        let (graph, root) = (&mut self.graph, self.root);
        atomic(db.as_ref(), self.external_tx, || {
            strategy.delete(&mut session, graph, root, &scope, cond.as_ref())
        })
    }

    /// The change-set applied by the last [`update`](Self::update).
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// Computes the change-set against the stored row without writing.
    pub fn diff(&self) -> OrmResult<Vec<Change>> {
        let span = operation_span("diff", &self.desc.name);
        let _guard = span.enter();
        let scope = self.scope()?;
        let cond = pk_condition(&self.desc, &self.graph, self.root)?;
        let mut snapshot = Graph::new();
        let old = snapshot.add(self.desc.entity);
        let mut session = Session::new(self.orm)?;
        self.strategy()?
            .find_one(&mut session, &mut snapshot, old, &scope, &cond)?;
        Differ::new(self.orm, &self.graph, &snapshot).diff(&scope, self.root, old)
    }
}

impl fmt::Debug for Instance<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("model", &self.desc.name)
            .field("nodes", &self.graph.len())
            .field("list", &self.list)
            .field("external_tx", &self.external_tx)
            .finish_non_exhaustive()
    }
}

fn assign_node(
    orm: &Orm,
    graph: &mut Graph,
    node: NodeId,
    desc: &ModelDescriptor,
    record: &Record,
) -> OrmResult<()> {
    let unknown = |attribute: &str| OrmError::UnknownAttribute {
        entity: desc.short_name.clone(),
        attribute: attribute.to_string(),
    };

    for (name, value) in record.values() {
        let field = desc.field(name).ok_or_else(|| unknown(name))?;
        graph.set(node, name.clone(), value.clone().coerce(field.value_type));
    }
    for (name, nested) in record.ones() {
        let relation = desc
            .relation(name)
            .filter(|r| !r.shape.is_many())
            .ok_or_else(|| unknown(name))?;
        let Some(nested) = nested else {
            graph.link_one(node, name.clone(), None);
            continue;
        };
        let target = orm.descriptor_of(relation.target)?;
        let child = graph.add(target.entity);
        assign_node(orm, graph, child, &target, nested)?;
        graph.link_one(node, name.clone(), Some(child));
    }
    for (name, list) in record.manys() {
        let relation = desc
            .relation(name)
            .filter(|r| r.shape.is_many())
            .ok_or_else(|| unknown(name))?;
        let target = orm.descriptor_of(relation.target)?;
        let mut children = Vec::with_capacity(list.len());
        for nested in list {
            let child = graph.add(target.entity);
            assign_node(orm, graph, child, &target, nested)?;
            children.push(child);
        }
        graph.set_many(node, name.clone(), children);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use relorm_core::Settings;

    use super::*;
    use crate::testing::{car_schema, Car, MockExecutor};

    fn setup() -> (Arc<MockExecutor>, Orm) {
        let db = Arc::new(car_schema());
        let orm = Orm::new(Settings::default()).with_executor(db.clone());
        (db, orm)
    }

    fn stored_car(db: &MockExecutor) {
        db.on_query(
            r#"FROM "cars""#,
            &["id", "owner_id", "brand", "created_at", "updated_at"],
            vec![vec![Value::Int(1), Value::Null, Value::from("Tesla"), Value::Null, Value::Null]],
        );
    }

    #[test]
    fn test_assign_builds_nested_nodes() {
        let (_db, orm) = setup();
        let mut car = orm.model::<Car>().unwrap();
        car.assign(
            &Record::new()
                .set("Brand", "BMW")
                .one("Owner", Record::new().set("Name", "John Doe"))
                .many("Wheels", vec![Record::new().set("Brand", "Pirelli"); 2]),
        )
        .unwrap();

        assert_eq!(car.get("Brand").unwrap(), &Value::from("BMW"));
        let owner = car.one("Owner").unwrap().unwrap();
        assert_eq!(car.graph().get(owner, "Name"), &Value::from("John Doe"));
        assert_eq!(car.many("Wheels").unwrap().len(), 2);
    }

    #[test]
    fn test_unknown_attributes_are_rejected() {
        let (_db, orm) = setup();
        let mut car = orm.model::<Car>().unwrap();
        assert!(matches!(
            car.assign(&Record::new().set("Colour", "red")),
            Err(OrmError::UnknownAttribute { ref attribute, .. }) if attribute == "Colour"
        ));
        assert!(car.get("Colour").is_err());
        assert!(car.set("Colour", 1).is_err());
        // A list relation is not one-shaped, and the other way round.
        assert!(car.one("Wheels").is_err());
        assert!(car.many("Owner").is_err());
    }

    #[test]
    fn test_set_coerces_to_declared_type() {
        let (_db, orm) = setup();
        let mut car = orm.model::<Car>().unwrap();
        car.set("CreatedAt", "2024-01-02 03:04:05").unwrap();
        let stamp = car.get("CreatedAt").unwrap().as_datetime().unwrap();
        assert_eq!(stamp.to_string(), "2024-01-02 03:04:05");
    }

    #[test]
    fn test_first_resets_the_graph() {
        let (db, orm) = setup();
        stored_car(&db);
        let mut car = orm.model::<Car>().unwrap();
        car.set("Brand", "stale").unwrap();
        car.first(Condition::new().eq("id", 1)).unwrap();
        assert_eq!(car.get("Brand").unwrap(), &Value::from("Tesla"));
        assert_eq!(car.get("ID").unwrap(), &Value::Int(1));
    }

    #[test]
    fn test_create_runs_in_a_transaction() {
        let (db, orm) = setup();
        let mut car = orm.model::<Car>().unwrap();
        car.set("Brand", "BMW").unwrap();
        car.create().unwrap();
        let sql = db.statements();
        assert_eq!(sql.first().map(String::as_str), Some("BEGIN"));
        assert_eq!(sql.last().map(String::as_str), Some("COMMIT"));
        assert_eq!(car.get("ID").unwrap(), &Value::Int(1));
    }

    #[test]
    fn test_failed_create_rolls_back() {
        let (db, orm) = setup();
        let mut car = orm.model::<Car>().unwrap();
        let err = car.create().unwrap_err();
        assert!(matches!(err, OrmError::ValidationFailed { .. }));
        assert_eq!(db.statements(), vec!["BEGIN", "ROLLBACK"]);
    }

    #[test]
    fn test_caller_transaction_is_left_alone() {
        let (db, orm) = setup();
        let tx = orm.begin().unwrap();
        let mut car = orm.model::<Car>().unwrap();
        car.set_tx(&tx);
        car.set("Brand", "BMW").unwrap();
        car.create().unwrap();
        assert_eq!(
            db.statements(),
            vec!["BEGIN", r#"INSERT INTO "cars" ("brand", "created_at") VALUES (?, ?)"#]
        );
        orm.commit(tx).unwrap();
        assert_eq!(db.statements().last().map(String::as_str), Some("COMMIT"));
    }

    #[test]
    fn test_update_keeps_change_set() {
        let (db, orm) = setup();
        stored_car(&db);
        let mut car = orm.model::<Car>().unwrap();
        car.set("ID", 1).unwrap();
        car.set("Brand", "BMW").unwrap();

        let preview = car.diff().unwrap();
        assert_eq!(preview.len(), 2);
        assert!(!db.statements().iter().any(|s| s.starts_with("UPDATE")));

        let applied = car.update(None).unwrap().len();
        assert_eq!(applied, 2);
        assert_eq!(car.changes()[0].field, "Brand");
        assert!(db.statements().iter().any(|s| s.starts_with(r#"UPDATE "cars""#)));
    }

    #[test]
    fn test_whitelist_applies_to_following_reads() {
        let (db, orm) = setup();
        stored_car(&db);
        let mut car = orm.model::<Car>().unwrap();
        car.set_whitelist(["Brand"]);
        car.first(Condition::new().eq("id", 1)).unwrap();
        let selects: Vec<String> = db
            .statements()
            .into_iter()
            .filter(|s| s.starts_with("SELECT"))
            .collect();
        assert_eq!(selects.len(), 1);
        assert!(car.get("OwnerID").unwrap().is_null());
    }
}
