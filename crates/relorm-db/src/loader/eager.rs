//! The eager loading strategy.
//!
//! Reads issue one SELECT for the owning rows and then, level by level, one
//! SELECT per readable relation for all owners of that level (two for
//! many-to-many when several owners are involved: the join table first, then
//! the related table). A relation whose owners all share one key uses
//! equality instead of `IN`, which is the single-entity form.
//!
//! Rows that are already on the loaded path are not loaded twice: a
//! one-shaped relation pointing back at an ancestor is linked without a
//! query, and any fetched row whose primary key matches an ancestor is
//! replaced by that ancestor and not descended into. A one-shaped
//! self-reference that keeps following itself (`Parent.Parent...`) gets no
//! substitution, so a cycle in the data surfaces as
//! [`OrmError::InfinityLoop`](relorm_core::OrmError::InfinityLoop).

use std::collections::HashMap;
use std::sync::Arc;

use relorm_core::{OrmError, OrmResult};

use super::{LoadingStrategy, Session};
use crate::changeset::Change;
use crate::graph::{Graph, NodeId};
use crate::model::ModelDescriptor;
use crate::query::{Condition, Lookup, OrderBy, Row, Subquery, Q};
use crate::relations::{JoinTable, Relation};
use crate::scope::Scope;
use crate::value::{KeyValue, Value};

/// Loads every readable relation with the owning rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct EagerLoader;

impl LoadingStrategy for EagerLoader {
    fn find_one(
        &self,
        session: &mut Session<'_>,
        graph: &mut Graph,
        node: NodeId,
        scope: &Scope,
        cond: &Condition,
    ) -> OrmResult<()> {
        let cond = if cond.limit_value().is_none() {
            cond.clone().limit(1)
        } else {
            cond.clone()
        };
        let mut rows = session.select(scope, &cond)?;
        if rows.is_empty() {
            return Err(OrmError::DoesNotExist(format!(
                "{} matching {}",
                scope.desc().short_name,
                cond.where_sql()
            )));
        }
        scan_into(graph, node, scope, rows.swap_remove(0));

        session.enter(vec![node], None);
        let result = self.hydrate(session, graph, &[node], scope);
        session.leave();
        result
    }

    fn find_many(
        &self,
        session: &mut Session<'_>,
        graph: &mut Graph,
        scope: &Scope,
        cond: &Condition,
    ) -> OrmResult<Vec<NodeId>> {
        let rows = session.select(scope, cond)?;
        let nodes: Vec<NodeId> = rows
            .into_iter()
            .map(|row| {
                let n = graph.add(scope.desc().entity);
                scan_into(graph, n, scope, row);
                n
            })
            .collect();
        tracing::debug!(model = %scope.desc().short_name, rows = nodes.len(), "owners loaded");
        if nodes.is_empty() {
            return Ok(nodes);
        }

        session.enter(nodes.clone(), None);
        let result = self.hydrate(session, graph, &nodes, scope);
        session.leave();
        result.map(|()| nodes)
    }

    fn create(
        &self,
        session: &mut Session<'_>,
        graph: &mut Graph,
        node: NodeId,
        scope: &Scope,
    ) -> OrmResult<()> {
        self.create_entity(session, graph, node, scope)
    }

    fn update(
        &self,
        session: &mut Session<'_>,
        graph: &mut Graph,
        node: NodeId,
        scope: &Scope,
        cond: Option<&Condition>,
    ) -> OrmResult<Vec<Change>> {
        self.update_entity(session, graph, node, scope, cond)
    }

    fn delete(
        &self,
        session: &mut Session<'_>,
        graph: &mut Graph,
        node: NodeId,
        scope: &Scope,
        cond: Option<&Condition>,
    ) -> OrmResult<()> {
        self.delete_entity(session, graph, node, scope, cond)
    }
}

impl EagerLoader {
    /// Loads the readable relations of a level of nodes, then runs their
    /// `after_find` hooks.
    fn hydrate(
        &self,
        session: &mut Session<'_>,
        graph: &mut Graph,
        nodes: &[NodeId],
        scope: &Scope,
    ) -> OrmResult<()> {
        for relation in scope.readable_relations() {
            self.load_relation(session, graph, nodes, scope, relation)?;
        }
        if let Some(hooks) = &scope.desc().hooks {
            for &n in nodes {
                hooks.after_find(graph, n)?;
            }
        }
        Ok(())
    }

    fn load_relation(
        &self,
        session: &mut Session<'_>,
        graph: &mut Graph,
        owners: &[NodeId],
        scope: &Scope,
        relation: &Relation,
    ) -> OrmResult<()> {
        let chain = relation.chain_id(&scope.desc().short_name);
        let target = session.descriptor(relation.target)?;
        let child = scope.child(relation, Arc::clone(&target))?;
        let many = relation.shape.is_many();
        let continues_self = relation.self_ref && !many && session.via() == Some(chain.as_str());

        // (owner, owner-side key) still needing a fetch
        let mut pending: Vec<(NodeId, KeyValue)> = Vec::new();
        for &owner in owners {
            if many {
                graph.set_many(owner, relation.name.clone(), Vec::new());
            } else {
                graph.link_one(owner, relation.name.clone(), None);
            }
            let value = graph.get(owner, &relation.fk);
            if value.is_zero() {
                continue;
            }
            let Some(key) = value.key() else {
                tracing::warn!(relation = %chain, value = %value, "key cannot identify a row; skipped");
                continue;
            };
            if !many && !continues_self {
                let (attrs, probe) = back_reference_probe(relation, &key);
                if let Some(ancestor) = session.loaded(graph, relation.target, &attrs, &probe) {
                    tracing::trace!(relation = %chain, "back reference installed");
                    graph.link_one(owner, relation.name.clone(), Some(ancestor));
                    continue;
                }
            }
            pending.push((owner, key));
        }
        if pending.is_empty() {
            return Ok(());
        }

        let mut keys: Vec<KeyValue> = pending.iter().map(|(_, k)| k.clone()).collect();
        keys.sort();
        keys.dedup();
        tracing::debug!(relation = %chain, kind = relation.kind.tag(), keys = keys.len(), "loading relation");

        let fresh = match relation.kind.join() {
            Some(join) => {
                let fetch = ManyToManyFetch {
                    relation,
                    join,
                    target: &target,
                    child: &child,
                    extra: scope.relation_condition(&relation.name),
                    chain: &chain,
                };
                fetch.run(session, graph, &pending, keys)?
            }
            None => {
                let mut cond = key_condition(&relation.afk_column, keys);
                if let Some(poly) = relation.kind.polymorphic() {
                    cond = cond.eq(poly.type_column.clone(), poly.value.clone());
                }
                if relation.kind.is_has_many() {
                    cond = cond.order_by(OrderBy::asc(relation.afk_column.clone()));
                    cond = order_by_pk(cond, &target);
                }
                if let Some(extra) = scope.relation_condition(&relation.name) {
                    cond = cond.and(extra.clone());
                }
                session.check_loop(&chain, &cond)?;

                let mut fresh = Vec::new();
                for row in session.select(&child, &cond)? {
                    let (node, is_new) =
                        materialize(session, graph, &target, &child, row, !continues_self);
                    if is_new {
                        fresh.push(node);
                    }
                    let Some(key) = graph.get(node, &relation.afk).key() else {
                        continue;
                    };
                    for (owner, _) in pending.iter().filter(|(_, k)| *k == key) {
                        attach(graph, *owner, relation, node);
                    }
                }
                fresh
            }
        };

        if fresh.is_empty() {
            return Ok(());
        }
        session.enter(fresh.clone(), Some(chain));
        let result = self.hydrate(session, graph, &fresh, &child);
        session.leave();
        result
    }
}

/// The two-step fetch of a many-to-many relation.
///
/// A self-referencing relation is symmetric: a join row `(a, b)` relates `a`
/// to `b` and `b` to `a`, so both join columns are matched against the
/// owners.
struct ManyToManyFetch<'a> {
    relation: &'a Relation,
    join: &'a JoinTable,
    target: &'a ModelDescriptor,
    child: &'a Scope,
    extra: Option<&'a Condition>,
    chain: &'a str,
}

impl ManyToManyFetch<'_> {
    fn related_condition(&self, filter: &Q) -> Condition {
        let cond = order_by_pk(Condition::new().q(filter), self.target);
        match self.extra {
            Some(extra) => cond.and(extra.clone()),
            None => cond,
        }
    }

    /// `related IN (SELECT <select> FROM join WHERE <by> = key)`, for both
    /// join directions of a self reference.
    fn single_owner_filter(&self, key: &KeyValue) -> Q {
        let (relation, join) = (self.relation, self.join);
        let side = |select: &str, by: &str| {
            let sub = Subquery::new(
                join.table.clone(),
                select.to_string(),
                Q::eq(by.to_string(), Value::from(key.clone())),
            );
            Q::filter(relation.afk_column.clone(), Lookup::InSubquery(sub))
        };
        let forward = side(&join.afk_column, &join.fk_column);
        if relation.self_ref {
            forward | side(&join.fk_column, &join.afk_column)
        } else {
            forward
        }
    }

    fn run(
        &self,
        session: &mut Session<'_>,
        graph: &mut Graph,
        pending: &[(NodeId, KeyValue)],
        keys: Vec<KeyValue>,
    ) -> OrmResult<Vec<NodeId>> {
        let (relation, join) = (self.relation, self.join);
        let mut fresh = Vec::new();

        if let [only] = keys.as_slice() {
            let cond = self.related_condition(&self.single_owner_filter(only));
            session.check_loop(self.chain, &cond)?;
            for row in session.select(self.child, &cond)? {
                let (node, is_new) = materialize(session, graph, self.target, self.child, row, true);
                if is_new {
                    fresh.push(node);
                }
                for (owner, _) in pending {
                    attach(graph, *owner, relation, node);
                }
            }
            return Ok(fresh);
        }

        let values: Vec<Value> = keys.iter().cloned().map(Value::from).collect();
        let mut join_filter = Q::filter(join.fk_column.clone(), Lookup::In(values.clone()));
        if relation.self_ref {
            join_filter = join_filter | Q::filter(join.afk_column.clone(), Lookup::In(values));
        }
        let join_cond = Condition::new().q(&join_filter);
        session.check_loop(self.chain, &join_cond)?;
        let columns = [join.fk_column.clone(), join.afk_column.clone()];
        let mut pairs: HashMap<KeyValue, Vec<KeyValue>> = HashMap::new();
        let mut related: Vec<KeyValue> = Vec::new();
        let mut pair = |owner: KeyValue, other: KeyValue| {
            let entry = pairs.entry(owner).or_default();
            if !entry.contains(&other) {
                entry.push(other.clone());
                related.push(other);
            }
        };
        for row in session.select_columns(&join.table, &columns, &join_cond)? {
            let owner_key = row.get_value(&join.fk_column).and_then(Value::key);
            let related_key = row.get_value(&join.afk_column).and_then(Value::key);
            let (Some(o), Some(r)) = (owner_key, related_key) else {
                continue;
            };
            if relation.self_ref && keys.binary_search(&r).is_ok() {
                pair(r.clone(), o.clone());
            }
            if keys.binary_search(&o).is_ok() {
                pair(o, r);
            }
        }
        related.sort();
        related.dedup();
        if related.is_empty() {
            return Ok(fresh);
        }

        let values: Vec<Value> = related.into_iter().map(Value::from).collect();
        let cond = self.related_condition(&Q::filter(relation.afk_column.clone(), Lookup::In(values)));
        let mut by_key: HashMap<KeyValue, NodeId> = HashMap::new();
        for row in session.select(self.child, &cond)? {
            let (node, is_new) = materialize(session, graph, self.target, self.child, row, true);
            if is_new {
                fresh.push(node);
            }
            if let Some(key) = graph.get(node, &relation.afk).key() {
                by_key.entry(key).or_insert(node);
            }
        }
        for (owner, key) in pending {
            for related_key in pairs.get(key).into_iter().flatten() {
                if let Some(node) = by_key.get(related_key) {
                    graph.push_many(*owner, relation.name.clone(), *node);
                }
            }
        }
        Ok(fresh)
    }
}

/// Copies a row's readable columns into a node, coerced to the declared
/// attribute types.
pub(crate) fn scan_into(graph: &mut Graph, node: NodeId, scope: &Scope, mut row: Row) {
    for field in scope.readable_fields() {
        let value = row
            .take_value(&field.column)
            .unwrap_or(Value::Null)
            .coerce(field.value_type);
        graph.set(node, field.name.clone(), value);
    }
}

/// Returns the node for a fetched row: an ancestor with the same primary key
/// when `substitute` allows it, else a new node. The flag is `true` for new
/// nodes.
fn materialize(
    session: &Session<'_>,
    graph: &mut Graph,
    target: &ModelDescriptor,
    scope: &Scope,
    row: Row,
    substitute: bool,
) -> (NodeId, bool) {
    if substitute {
        let key: Option<Vec<KeyValue>> = target
            .pk_fields()
            .map(|f| {
                row.get_value(&f.column)
                    .and_then(|v| v.clone().coerce(f.value_type).key())
            })
            .collect();
        if let Some(key) = key {
            if let Some(existing) = session.loaded(graph, target.entity, &target.primary_keys, &key) {
                return (existing, false);
            }
        }
    }
    let node = graph.add(target.entity);
    scan_into(graph, node, scope, row);
    (node, true)
}

fn attach(graph: &mut Graph, owner: NodeId, relation: &Relation, node: NodeId) {
    if relation.shape.is_many() {
        graph.push_many(owner, relation.name.clone(), node);
    } else if graph.one(owner, &relation.name).is_none() {
        graph.link_one(owner, relation.name.clone(), Some(node));
    }
}

/// The related-side attributes and values identifying the row an owner's
/// one-shaped relation points at.
fn back_reference_probe(relation: &Relation, key: &KeyValue) -> (Vec<String>, Vec<KeyValue>) {
    let mut attrs = vec![relation.afk.clone()];
    let mut probe = vec![key.clone()];
    if let Some(poly) = relation.kind.polymorphic() {
        attrs.push(poly.type_field.clone());
        probe.push(KeyValue::Text(poly.value.clone()));
    }
    (attrs, probe)
}

fn key_condition(column: &str, keys: Vec<KeyValue>) -> Condition {
    let mut values: Vec<Value> = keys.into_iter().map(Value::from).collect();
    if values.len() == 1 {
        let only = values.swap_remove(0);
        Condition::new().eq(column.to_string(), only)
    } else {
        Condition::new().filter(column.to_string(), Lookup::In(values))
    }
}

fn order_by_pk(cond: Condition, target: &ModelDescriptor) -> Condition {
    target
        .pk_fields()
        .fold(cond, |c, f| c.order_by(OrderBy::asc(f.column.clone())))
}
