//! Writes of the eager strategy: create, change-set driven update, delete.
//!
//! Ordering within one write: belongs-to targets are written before the
//! owner row, every other relation after it. A node currently being written
//! higher up (a wheel's `Car` pointing back at the car being created) is
//! never written again; only its key is copied.

use std::sync::Arc;

use relorm_core::{OrmError, OrmResult};

use super::eager::EagerLoader;
use super::validate::validate;
use super::{attr_keys, pk_condition, LoadingStrategy, Session};
use crate::changeset::{Change, ChangeIndex, Differ, Op};
use crate::graph::{Graph, Link, NodeId};
use crate::model::{ModelDescriptor, CREATED_AT, DELETED_AT, UPDATED_AT};
use crate::query::{Condition, Lookup, Subquery, Q};
use crate::relations::{Relation, RelationKind};
use crate::scope::Scope;
use crate::value::Value;

impl EagerLoader {
    pub(super) fn create_entity(
        &self,
        session: &mut Session<'_>,
        graph: &mut Graph,
        node: NodeId,
        scope: &Scope,
    ) -> OrmResult<()> {
        if session.is_writing(node) {
            return Ok(());
        }
        session.begin_write(node);
        let result = self.insert_tree(session, graph, node, scope);
        session.end_write(node);
        result
    }

    fn insert_tree(
        &self,
        session: &mut Session<'_>,
        graph: &mut Graph,
        node: NodeId,
        scope: &Scope,
    ) -> OrmResult<()> {
        let desc = Arc::clone(scope.desc());
        if let Some(hooks) = &desc.hooks {
            hooks.before_create(graph, node)?;
        }
        stamp_created_at(graph, node, scope);
        if session.settings().validate_on_write {
            validate(session.orm(), graph, node, scope, true)?;
        }

        for relation in scope.writable_relations().filter(|r| r.kind.is_belongs_to()) {
            let Some(target) = linked_one(graph, node, relation) else {
                continue;
            };
            if !session.is_writing(target) {
                let child = scope.child(relation, session.descriptor(relation.target)?)?;
                if graph.key_of(target, &child.desc().primary_keys).is_none() {
                    self.create_entity(session, graph, target, &child)?;
                } else {
                    self.update_entity(session, graph, target, &child, None)?;
                }
            }
            let value = graph.get(target, &relation.afk).clone();
            graph.set(node, relation.fk.clone(), value);
        }

        self.insert_row(session, graph, node, scope)?;

        for relation in scope.writable_relations().filter(|r| !r.kind.is_belongs_to()) {
            if !graph.node(node).links.contains_key(&relation.name) {
                continue;
            }
            let child = scope.child(relation, session.descriptor(relation.target)?)?;
            match &relation.kind {
                RelationKind::HasOne { .. } => {
                    let Some(target) = linked_one(graph, node, relation) else {
                        continue;
                    };
                    if session.is_writing(target) {
                        continue;
                    }
                    stamp(graph, node, target, relation);
                    self.adopt(session, graph, target, &child, relation)?;
                }
                RelationKind::HasMany { .. } => {
                    self.create_has_many(session, graph, node, relation, &child)?;
                }
                RelationKind::ManyToMany { .. } => {
                    self.create_many_to_many(session, graph, node, relation, &child)?;
                }
                RelationKind::BelongsTo => {}
            }
        }

        if let Some(hooks) = &desc.hooks {
            hooks.after_create(graph, node)?;
        }
        Ok(())
    }

    /// Inserts the owner row and stamps the generated id.
    fn insert_row(
        &self,
        session: &Session<'_>,
        graph: &mut Graph,
        node: NodeId,
        scope: &Scope,
    ) -> OrmResult<()> {
        let desc = scope.desc();
        let (columns, values): (Vec<String>, Vec<Value>) = scope
            .writable_fields()
            .filter_map(|f| {
                let value = graph.get(node, &f.name);
                (!value.is_zero()).then(|| (f.column.clone(), value.clone()))
            })
            .unzip();
        if columns.is_empty() {
            return Err(OrmError::NoValueProvided(desc.table.clone()));
        }
        match desc.autoincrement() {
            Some(auto) if graph.get(node, &auto.name).is_zero() => {
                let id = session.insert_returning_id(&desc.table, &columns, values)?;
                graph.set(node, auto.name.clone(), id.coerce(auto.value_type));
            }
            _ => {
                session.insert(&desc.table, &columns, &[values])?;
            }
        }
        Ok(())
    }

    /// Points an element at its owner: a keyed element is re-parented by
    /// primary key, falling back to an insert when no row matched; a keyless
    /// one is created.
    fn adopt(
        &self,
        session: &mut Session<'_>,
        graph: &mut Graph,
        element: NodeId,
        child: &Scope,
        relation: &Relation,
    ) -> OrmResult<()> {
        if graph.key_of(element, &child.desc().primary_keys).is_none() {
            return self.create_entity(session, graph, element, child);
        }
        let cond = pk_condition(child.desc(), graph, element)?;
        let mut sets = vec![(relation.afk_column.clone(), graph.get(element, &relation.afk).clone())];
        if let Some(poly) = relation.kind.polymorphic() {
            sets.push((poly.type_column.clone(), Value::from(poly.value.clone())));
        }
        if session.update(&child.desc().table, &sets, &cond)? == 0 {
            tracing::debug!(table = %child.desc().table, "adopted row missing; inserting");
            return self.create_entity(session, graph, element, child);
        }
        Ok(())
    }

    fn create_has_many(
        &self,
        session: &mut Session<'_>,
        graph: &mut Graph,
        owner: NodeId,
        relation: &Relation,
        child: &Scope,
    ) -> OrmResult<()> {
        let elements: Vec<NodeId> = graph
            .many(owner, &relation.name)
            .iter()
            .copied()
            .filter(|e| !graph.is_empty_node(*e) && !session.is_writing(*e))
            .collect();
        for &e in &elements {
            stamp(graph, owner, e, relation);
        }
        let (keyed, fresh): (Vec<NodeId>, Vec<NodeId>) = elements
            .into_iter()
            .partition(|e| graph.key_of(*e, &child.desc().primary_keys).is_some());
        for e in keyed {
            self.adopt(session, graph, e, child, relation)?;
        }
        if fresh.is_empty() {
            return Ok(());
        }
        if fresh.iter().any(|e| has_nested_writes(session, graph, *e, child)) {
            for e in fresh {
                self.create_entity(session, graph, e, child)?;
            }
            return Ok(());
        }
        self.batch_insert(session, graph, &fresh, child)
    }

    /// Inserts leaf elements with one multi-row INSERT.
    fn batch_insert(
        &self,
        session: &Session<'_>,
        graph: &mut Graph,
        elements: &[NodeId],
        child: &Scope,
    ) -> OrmResult<()> {
        let desc = child.desc();
        for &e in elements {
            if let Some(hooks) = &desc.hooks {
                hooks.before_create(graph, e)?;
            }
            stamp_created_at(graph, e, child);
            if session.settings().validate_on_write {
                validate(session.orm(), graph, e, child, true)?;
            }
        }

        let fields: Vec<_> = child
            .writable_fields()
            .filter(|f| elements.iter().any(|&e| !graph.get(e, &f.name).is_zero()))
            .collect();
        if fields.is_empty() {
            return Err(OrmError::NoValueProvided(desc.table.clone()));
        }
        let columns: Vec<String> = fields.iter().map(|f| f.column.clone()).collect();
        let rows: Vec<Vec<Value>> = elements
            .iter()
            .map(|&e| fields.iter().map(|f| graph.get(e, &f.name).clone()).collect())
            .collect();
        let ids = session.insert_batch(&desc.table, &columns, &rows)?;

        if let Some(auto) = desc.autoincrement() {
            if ids.len() == elements.len() {
                for (&e, id) in elements.iter().zip(ids) {
                    graph.set(e, auto.name.clone(), id.coerce(auto.value_type));
                }
            } else {
                tracing::debug!(table = %desc.table, "backend reported no batch ids");
            }
        }
        if let Some(hooks) = &desc.hooks {
            for &e in elements {
                hooks.after_create(graph, e)?;
            }
        }
        Ok(())
    }

    fn create_many_to_many(
        &self,
        session: &mut Session<'_>,
        graph: &mut Graph,
        owner: NodeId,
        relation: &Relation,
        child: &Scope,
    ) -> OrmResult<()> {
        let Some(join) = relation.kind.join() else {
            return Ok(());
        };
        let elements: Vec<NodeId> = graph
            .many(owner, &relation.name)
            .iter()
            .copied()
            .filter(|e| !graph.is_empty_node(*e))
            .collect();
        for &e in &elements {
            if !session.is_writing(e) && graph.key_of(e, &child.desc().primary_keys).is_none() {
                self.create_entity(session, graph, e, child)?;
            }
        }
        let owner_key = graph.get(owner, &relation.fk).clone();
        let rows: Vec<Vec<Value>> = elements
            .iter()
            .map(|&e| graph.get(e, &relation.afk))
            .filter(|v| !v.is_zero())
            .map(|v| vec![owner_key.clone(), v.clone()])
            .collect();
        if rows.is_empty() {
            return Ok(());
        }
        session.insert(
            &join.table,
            &[join.fk_column.clone(), join.afk_column.clone()],
            &rows,
        )?;
        Ok(())
    }

    // ── Update ───────────────────────────────────────────────────────

    pub(super) fn update_entity(
        &self,
        session: &mut Session<'_>,
        graph: &mut Graph,
        node: NodeId,
        scope: &Scope,
        cond: Option<&Condition>,
    ) -> OrmResult<Vec<Change>> {
        let desc = Arc::clone(scope.desc());
        let cond = match cond {
            Some(cond) => cond.clone(),
            None => pk_condition(&desc, graph, node)?,
        };
        if let Some(hooks) = &desc.hooks {
            hooks.before_update(graph, node)?;
        }
        if session.settings().validate_on_write {
            validate(session.orm(), graph, node, scope, false)?;
        }

        let mut snapshot = Graph::new();
        let old = snapshot.add(desc.entity);
        let mut reader = Session::new(session.orm())?;
        self.find_one(&mut reader, &mut snapshot, old, scope, &cond)?;

        let changes = Differ::new(session.orm(), graph, &snapshot).diff(scope, node, old)?;
        tracing::debug!(model = %desc.short_name, changes = changes.len(), "change-set computed");
        self.apply(session, graph, node, scope, &cond, &changes)?;

        if let Some(hooks) = &desc.hooks {
            hooks.after_update(graph, node)?;
        }
        Ok(changes)
    }

    fn apply(
        &self,
        session: &mut Session<'_>,
        graph: &mut Graph,
        node: NodeId,
        scope: &Scope,
        cond: &Condition,
        changes: &[Change],
    ) -> OrmResult<()> {
        session.begin_write(node);
        let result = self.apply_changes(session, graph, node, scope, cond, changes);
        session.end_write(node);
        result
    }

    fn apply_changes(
        &self,
        session: &mut Session<'_>,
        graph: &mut Graph,
        node: NodeId,
        scope: &Scope,
        cond: &Condition,
        changes: &[Change],
    ) -> OrmResult<()> {
        let desc = Arc::clone(scope.desc());
        let owner: &ModelDescriptor = &desc;
        let relation_changes = move |pred: fn(&RelationKind) -> bool| {
            changes.iter().filter_map(move |c| {
                owner
                    .relation(&c.field)
                    .filter(|r| pred(&r.kind))
                    .map(|r| (r.clone(), c))
            })
        };
        let mut sets: Vec<(String, Value)> = Vec::new();

        for (relation, change) in relation_changes(RelationKind::is_belongs_to) {
            let child = scope.child(&relation, session.descriptor(relation.target)?)?;
            match change.op {
                Op::Create => {
                    let Some(target) = change.new_node else {
                        continue;
                    };
                    if !session.is_writing(target)
                        && graph.key_of(target, &child.desc().primary_keys).is_none()
                    {
                        self.create_entity(session, graph, target, &child)?;
                    }
                    let value = graph.get(target, &relation.afk).clone();
                    graph.set(node, relation.fk.clone(), value.clone());
                    set_column(&mut sets, &relation.fk_column, value);
                }
                Op::Update => {
                    let Some(target) = change.new_node else {
                        continue;
                    };
                    let target_cond = pk_condition(child.desc(), graph, target)?;
                    self.apply(session, graph, target, &child, &target_cond, &change.children)?;
                }
                Op::Delete => {
                    graph.set(node, relation.fk.clone(), Value::Null);
                    set_column(&mut sets, &relation.fk_column, Value::Null);
                }
            }
        }

        for change in changes.iter().filter(|c| desc.relation(&c.field).is_none()) {
            let Some(field) = desc.field(&change.field) else {
                continue;
            };
            if field.name == UPDATED_AT {
                graph.set(node, UPDATED_AT, change.new.clone());
            }
            set_column(&mut sets, &field.column, change.new.clone());
        }
        if !sets.is_empty() {
            // Belongs-to keys first, then scalars in change order.
            if session.update(&desc.table, &sets, cond)? == 0 {
                tracing::warn!(error = %OrmError::UpdateZeroRows(desc.table.clone()), "update affected no rows");
            }
        }

        for (relation, change) in relation_changes(RelationKind::is_has_one) {
            let child = scope.child(&relation, session.descriptor(relation.target)?)?;
            match change.op {
                Op::Create => {
                    self.delete_previous(session, graph, node, &relation, &child, change.index.as_ref())?;
                    let Some(target) = change.new_node else {
                        continue;
                    };
                    if session.is_writing(target) {
                        continue;
                    }
                    stamp(graph, node, target, &relation);
                    self.adopt(session, graph, target, &child, &relation)?;
                }
                Op::Update => {
                    let Some(target) = change.new_node else {
                        continue;
                    };
                    let target_cond = pk_condition(child.desc(), graph, target)?;
                    self.apply(session, graph, target, &child, &target_cond, &change.children)?;
                }
                Op::Delete => {
                    self.delete_previous(session, graph, node, &relation, &child, change.index.as_ref())?;
                }
            }
        }

        let many = |k: &RelationKind| k.is_has_many() || k.is_many_to_many();
        for (relation, change) in relation_changes(many) {
            let child = scope.child(&relation, session.descriptor(relation.target)?)?;
            self.apply_list(session, graph, node, &relation, &child, &change.children)?;
        }
        Ok(())
    }

    /// Removes the row a one-shaped has-one relation pointed at: by its old
    /// primary key when known, else every row referencing the owner.
    fn delete_previous(
        &self,
        session: &Session<'_>,
        graph: &Graph,
        owner: NodeId,
        relation: &Relation,
        child: &Scope,
        index: Option<&ChangeIndex>,
    ) -> OrmResult<()> {
        let target = child.desc();
        let cond = match index {
            Some(ChangeIndex::Key(values)) => target
                .pk_fields()
                .zip(values.iter().cloned())
                .fold(Condition::new(), |c, (f, v)| c.eq(f.column.clone(), v)),
            _ => {
                let owner_key = graph.get(owner, &relation.fk).clone();
                let mut cond = Condition::new().eq(relation.afk_column.clone(), owner_key);
                if let Some(poly) = relation.kind.polymorphic() {
                    cond = cond.eq(poly.type_column.clone(), poly.value.clone());
                }
                cond
            }
        };
        session.delete(&target.table, &cond)?;
        Ok(())
    }

    fn apply_list(
        &self,
        session: &mut Session<'_>,
        graph: &mut Graph,
        owner: NodeId,
        relation: &Relation,
        child: &Scope,
        elements: &[Change],
    ) -> OrmResult<()> {
        let mut removed: Vec<Vec<Value>> = Vec::new();
        for element in elements {
            match element.op {
                Op::Create => {
                    let Some(e) = element.new_node else {
                        continue;
                    };
                    if session.is_writing(e) {
                        continue;
                    }
                    match &relation.kind {
                        RelationKind::ManyToMany { join } => {
                            if graph.key_of(e, &child.desc().primary_keys).is_none() {
                                self.create_entity(session, graph, e, child)?;
                            }
                            let row = vec![
                                graph.get(owner, &relation.fk).clone(),
                                graph.get(e, &relation.afk).clone(),
                            ];
                            session.insert(
                                &join.table,
                                &[join.fk_column.clone(), join.afk_column.clone()],
                                &[row],
                            )?;
                        }
                        _ => {
                            stamp(graph, owner, e, relation);
                            self.adopt(session, graph, e, child, relation)?;
                        }
                    }
                }
                Op::Update => {
                    let Some(e) = element.new_node else {
                        continue;
                    };
                    let cond = pk_condition(child.desc(), graph, e)?;
                    self.apply(session, graph, e, child, &cond, &element.children)?;
                }
                Op::Delete => {
                    if let Some(ChangeIndex::Key(values)) = &element.index {
                        removed.push(values.clone());
                    }
                }
            }
        }
        if removed.is_empty() {
            return Ok(());
        }

        match &relation.kind {
            RelationKind::ManyToMany { join } => {
                let related: Vec<Value> = removed.into_iter().filter_map(|mut k| k.pop()).collect();
                let owner_key = graph.get(owner, &relation.fk);
                let side = |by: &str, other: &str| {
                    Q::eq(by.to_string(), owner_key.clone())
                        & Q::filter(other.to_string(), Lookup::In(related.clone()))
                };
                let mut filter = side(&join.fk_column, &join.afk_column);
                if relation.self_ref {
                    filter = filter | side(&join.afk_column, &join.fk_column);
                }
                session.delete(&join.table, &Condition::new().q(&filter))?;
            }
            _ => {
                let target = child.desc();
                session.delete(&target.table, &keys_condition(target, removed))?;
            }
        }
        Ok(())
    }

    // ── Delete ───────────────────────────────────────────────────────

    pub(super) fn delete_entity(
        &self,
        session: &mut Session<'_>,
        graph: &mut Graph,
        node: NodeId,
        scope: &Scope,
        cond: Option<&Condition>,
    ) -> OrmResult<()> {
        let desc = Arc::clone(scope.desc());
        let cond = match cond {
            Some(cond) => cond.clone(),
            None => pk_condition(&desc, graph, node)?,
        };
        if let Some(hooks) = &desc.hooks {
            hooks.before_delete(graph, node)?;
        }

        if desc.has_time_field(DELETED_AT) {
            let now = Value::now();
            let sets = [(desc.column(DELETED_AT), now.clone())];
            if session.update(&desc.table, &sets, &cond)? == 0 {
                return Err(OrmError::DeleteNotFound(desc.table.clone()));
            }
            graph.set(node, DELETED_AT, now);
            tracing::debug!(model = %desc.short_name, "soft-deleted");
        } else {
            for relation in scope.writable_relations() {
                match &relation.kind {
                    RelationKind::BelongsTo => {}
                    RelationKind::HasOne { polymorphic } | RelationKind::HasMany { polymorphic } => {
                        let target = session.descriptor(relation.target)?;
                        let owned = owned_rows(&desc, graph, node, relation, &relation.afk_column, &cond);
                        let mut owned = Condition::new().q(&owned);
                        if let Some(poly) = polymorphic {
                            owned = owned.eq(poly.type_column.clone(), poly.value.clone());
                        }
                        session.delete(&target.table, &owned)?;
                    }
                    RelationKind::ManyToMany { join } => {
                        let mut owned = owned_rows(&desc, graph, node, relation, &join.fk_column, &cond);
                        if relation.self_ref {
                            owned = owned | owned_rows(&desc, graph, node, relation, &join.afk_column, &cond);
                        }
                        session.delete(&join.table, &Condition::new().q(&owned))?;
                    }
                }
            }
            if session.delete(&desc.table, &cond)? == 0 {
                return Err(OrmError::DeleteNotFound(desc.table.clone()));
            }
        }

        if let Some(hooks) = &desc.hooks {
            hooks.after_delete(graph, node)?;
        }
        Ok(())
    }
}

fn linked_one(graph: &Graph, node: NodeId, relation: &Relation) -> Option<NodeId> {
    graph
        .one(node, &relation.name)
        .filter(|t| !graph.is_empty_node(*t))
}

/// Copies the owner's key (and discriminator) into a related node.
fn stamp(graph: &mut Graph, owner: NodeId, related: NodeId, relation: &Relation) {
    let value = graph.get(owner, &relation.fk).clone();
    graph.set(related, relation.afk.clone(), value);
    if let Some(poly) = relation.kind.polymorphic() {
        graph.set(related, poly.type_field.clone(), poly.value.clone());
    }
}

fn stamp_created_at(graph: &mut Graph, node: NodeId, scope: &Scope) {
    if scope.desc().has_time_field(CREATED_AT)
        && scope.can_write(CREATED_AT)
        && graph.get(node, CREATED_AT).is_null()
    {
        graph.set(node, CREATED_AT, Value::now());
    }
}

fn set_column(sets: &mut Vec<(String, Value)>, column: &str, value: Value) {
    match sets.iter_mut().find(|(c, _)| c == column) {
        Some(slot) => slot.1 = value,
        None => sets.push((column.to_string(), value)),
    }
}

/// Returns `true` when an element links to something it would write itself.
fn has_nested_writes(session: &Session<'_>, graph: &Graph, element: NodeId, child: &Scope) -> bool {
    let live = |t: &NodeId| !session.is_writing(*t) && !graph.is_empty_node(*t);
    child.writable_relations().any(|r| match graph.node(element).links.get(&r.name) {
        Some(Link::One(Some(t))) => live(t),
        Some(Link::Many(ts)) => ts.iter().any(live),
        _ => false,
    })
}

/// `pk IN (...)` for single keys, an OR of key equalities otherwise.
fn keys_condition(target: &ModelDescriptor, keys: Vec<Vec<Value>>) -> Condition {
    let columns: Vec<String> = target.pk_fields().map(|f| f.column.clone()).collect();
    if let [column] = columns.as_slice() {
        let values = keys.into_iter().filter_map(|mut k| k.pop()).collect();
        return Condition::new().filter(column.clone(), Lookup::In(values));
    }
    let any = keys
        .into_iter()
        .map(|key| {
            columns
                .iter()
                .zip(key)
                .map(|(c, v)| Q::eq(c.clone(), v))
                .fold(Q::And(Vec::new()), |acc, q| acc & q)
        })
        .fold(Q::Or(Vec::new()), |acc, q| acc | q);
    Condition::new().q(&any)
}

/// The related rows owned by the deleted rows, matched on `column`:
/// equality on the owner's key when the node carries it, else a sub-select
/// over the delete condition.
fn owned_rows(
    owner: &ModelDescriptor,
    graph: &Graph,
    node: NodeId,
    relation: &Relation,
    column: &str,
    cond: &Condition,
) -> Q {
    if attr_keys(graph, node, std::slice::from_ref(&relation.fk)).is_some() {
        return Q::eq(column.to_string(), graph.get(node, &relation.fk).clone());
    }
    let filter = cond.where_node().map_or_else(|| Q::And(Vec::new()), |w| w.to_q());
    let sub = Subquery::new(owner.table.clone(), relation.fk_column.clone(), filter);
    Q::filter(column.to_string(), Lookup::InSubquery(sub))
}
