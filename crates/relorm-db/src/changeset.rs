//! Change-set computation.
//!
//! An update compares the caller's graph with a fresh snapshot re-read from
//! the database and turns the differences into a recursive plan of
//! [`Change`] records:
//!
//! - scalar fields produce `Update` records carrying the old and new value;
//!   any scalar change also stamps `UpdatedAt` when the table has it,
//! - one-shaped relations produce a single `Create`, `Update` (with nested
//!   changes) or `Delete` record,
//! - list relations produce a relation-level record whose children are the
//!   per-element records, paired by primary key.
//!
//! Attributes the caller never set on a node are not compared, and the time
//! fields are never diffed directly.

use std::collections::HashSet;
use std::fmt;

use relorm_core::OrmResult;

use crate::graph::{Graph, NodeId};
use crate::model::{ModelDescriptor, UPDATED_AT};
use crate::registry::Orm;
use crate::relations::Relation;
use crate::scope::Scope;
use crate::value::{KeyValue, Value};

/// What a change record does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Insert, or attach, the new value.
    Create,
    /// Write the new value over the old one.
    Update,
    /// Remove the old value.
    Delete,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        })
    }
}

/// Locates a list element a change applies to.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeIndex {
    /// Position in the new list.
    Position(usize),
    /// Primary-key values of the old element.
    Key(Vec<Value>),
}

/// One node of a change plan.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    /// The field or relation attribute.
    pub field: String,
    /// The operation.
    pub op: Op,
    /// The old scalar value; `Null` for relation records.
    pub old: Value,
    /// The new scalar value; `Null` for relation records.
    pub new: Value,
    /// The related node in the snapshot graph.
    pub old_node: Option<NodeId>,
    /// The related node in the caller's graph.
    pub new_node: Option<NodeId>,
    /// List position or old key.
    pub index: Option<ChangeIndex>,
    /// Nested changes.
    pub children: Vec<Change>,
}

impl Change {
    fn scalar(field: &str, old: Value, new: Value) -> Self {
        Self {
            field: field.to_string(),
            op: Op::Update,
            old,
            new,
            old_node: None,
            new_node: None,
            index: None,
            children: Vec::new(),
        }
    }

    fn relation(field: &str, op: Op) -> Self {
        Self {
            field: field.to_string(),
            op,
            old: Value::Null,
            new: Value::Null,
            old_node: None,
            new_node: None,
            index: None,
            children: Vec::new(),
        }
    }

    /// Returns `true` for a record without a related node, i.e. a scalar.
    pub fn is_scalar(&self) -> bool {
        self.old_node.is_none()
            && self.new_node.is_none()
            && self.index.is_none()
            && self.children.is_empty()
    }
}

/// Diffs a node of the caller's graph against its snapshot.
pub struct Differ<'a> {
    orm: &'a Orm,
    new_graph: &'a Graph,
    old_graph: &'a Graph,
    visiting: Vec<NodeId>,
}

impl<'a> Differ<'a> {
    /// Creates a differ over the caller's graph and the snapshot graph.
    pub fn new(orm: &'a Orm, new_graph: &'a Graph, old_graph: &'a Graph) -> Self {
        Self {
            orm,
            new_graph,
            old_graph,
            visiting: Vec::new(),
        }
    }

    /// Computes the changes turning `old` into `new`.
    pub fn diff(&mut self, scope: &Scope, new: NodeId, old: NodeId) -> OrmResult<Vec<Change>> {
        // A back reference leads to a node already being compared.
        if self.visiting.contains(&new) {
            return Ok(Vec::new());
        }
        self.visiting.push(new);
        let result = self.diff_node(scope, new, old);
        self.visiting.pop();
        result
    }

    fn diff_node(&mut self, scope: &Scope, new: NodeId, old: NodeId) -> OrmResult<Vec<Change>> {
        let desc = scope.desc();
        let (new_graph, old_graph) = (self.new_graph, self.old_graph);
        let node = new_graph.node(new);
        let mut changes = Vec::new();

        for field in scope.writable_fields() {
            if ModelDescriptor::is_time_field(&field.name) {
                continue;
            }
            let Some(value) = node.values.get(&field.name) else {
                continue;
            };
            let previous = old_graph.get(old, &field.name);
            if value != previous {
                changes.push(Change::scalar(&field.name, previous.clone(), value.clone()));
            }
        }
        if !changes.is_empty() && desc.has_time_field(UPDATED_AT) && scope.can_write(UPDATED_AT) {
            let previous = old_graph.get(old, UPDATED_AT).clone();
            changes.push(Change::scalar(UPDATED_AT, previous, Value::now()));
        }

        for relation in scope.writable_relations() {
            if !node.links.contains_key(&relation.name) {
                continue;
            }
            let child = scope.child(relation, self.orm.descriptor_of(relation.target)?)?;
            let change = if relation.shape.is_many() {
                self.diff_many(relation, &child, new, old)?
            } else {
                self.diff_one(relation, &child, new, old)?
            };
            changes.extend(change);
        }
        Ok(changes)
    }

    fn linked_one(graph: &Graph, node: NodeId, relation: &str) -> Option<NodeId> {
        graph.one(node, relation).filter(|n| !graph.is_empty_node(*n))
    }

    fn diff_one(
        &mut self,
        relation: &Relation,
        child: &Scope,
        new: NodeId,
        old: NodeId,
    ) -> OrmResult<Option<Change>> {
        let pks = &child.desc().primary_keys;
        let new_child = Self::linked_one(self.new_graph, new, &relation.name);
        let old_child = Self::linked_one(self.old_graph, old, &relation.name);

        let change = match (new_child, old_child) {
            (None, None) => None,
            (Some(n), None) => Some(Change {
                new_node: Some(n),
                ..Change::relation(&relation.name, Op::Create)
            }),
            (None, Some(o)) => Some(Change {
                old_node: Some(o),
                index: self.old_graph.key_of(o, pks).map(ChangeIndex::Key),
                ..Change::relation(&relation.name, Op::Delete)
            }),
            (Some(n), Some(o)) => {
                let old_key = self.old_graph.key_of(o, pks);
                if self.new_graph.key_of(n, pks) == old_key {
                    let children = self.diff(child, n, o)?;
                    (!children.is_empty()).then(|| Change {
                        new_node: Some(n),
                        old_node: Some(o),
                        children,
                        ..Change::relation(&relation.name, Op::Update)
                    })
                } else {
                    Some(Change {
                        new_node: Some(n),
                        old_node: Some(o),
                        index: old_key.map(ChangeIndex::Key),
                        ..Change::relation(&relation.name, Op::Create)
                    })
                }
            }
        };
        Ok(change)
    }

    fn diff_many(
        &mut self,
        relation: &Relation,
        child: &Scope,
        new: NodeId,
        old: NodeId,
    ) -> OrmResult<Option<Change>> {
        let pks = &child.desc().primary_keys;
        let keep = |graph: &Graph, list: &[NodeId]| -> Vec<NodeId> {
            list.iter().copied().filter(|n| !graph.is_empty_node(*n)).collect()
        };
        let new_list = keep(self.new_graph, self.new_graph.many(new, &relation.name));
        let old_list = keep(self.old_graph, self.old_graph.many(old, &relation.name));

        // (key, old values, node, matched)
        let mut previous: Vec<(Vec<KeyValue>, Vec<Value>, NodeId, bool)> = old_list
            .iter()
            .filter_map(|&o| {
                let values = self.old_graph.key_of(o, pks)?;
                Some((Value::keys(&values)?, values, o, false))
            })
            .collect();

        let mut seen: HashSet<Vec<KeyValue>> = HashSet::new();
        let mut elements = Vec::new();
        for (position, &n) in new_list.iter().enumerate() {
            let key = self
                .new_graph
                .key_of(n, pks)
                .and_then(|values| Value::keys(&values));
            let Some(key) = key else {
                elements.push(Change {
                    new_node: Some(n),
                    index: Some(ChangeIndex::Position(position)),
                    ..Change::relation(&relation.name, Op::Create)
                });
                continue;
            };
            if !seen.insert(key.clone()) {
                tracing::warn!(
                    relation = %relation.name,
                    key = ?key,
                    "duplicate primary key in list; later element skipped"
                );
                continue;
            }
            match previous.iter_mut().find(|(k, ..)| *k == key) {
                Some((_, values, o, matched)) => {
                    *matched = true;
                    let (values, o) = (values.clone(), *o);
                    let children = self.diff(child, n, o)?;
                    if !children.is_empty() {
                        elements.push(Change {
                            new_node: Some(n),
                            old_node: Some(o),
                            index: Some(ChangeIndex::Key(values)),
                            children,
                            ..Change::relation(&relation.name, Op::Update)
                        });
                    }
                }
                None => elements.push(Change {
                    new_node: Some(n),
                    index: Some(ChangeIndex::Position(position)),
                    ..Change::relation(&relation.name, Op::Create)
                }),
            }
        }
        for (_, values, o, matched) in previous {
            if !matched {
                elements.push(Change {
                    old_node: Some(o),
                    index: Some(ChangeIndex::Key(values)),
                    ..Change::relation(&relation.name, Op::Delete)
                });
            }
        }

        if elements.is_empty() {
            return Ok(None);
        }
        let op = if old_list.is_empty() {
            Op::Create
        } else if new_list.is_empty() {
            Op::Delete
        } else {
            Op::Update
        };
        Ok(Some(Change {
            children: elements,
            ..Change::relation(&relation.name, op)
        }))
    }
}

impl fmt::Debug for Differ<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Differ")
            .field("visiting", &self.visiting)
            .finish_non_exhaustive()
    }
}
