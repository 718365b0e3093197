//! Per-operation view of a model.
//!
//! A [`Scope`] pairs a descriptor with the permissions resolved for one
//! call (see [`crate::wblist`]) and the caller's relation conditions. The
//! descriptor itself is shared and never mutated; narrowing a call only
//! touches the scope, so toggles never leak between instances.

use std::collections::BTreeMap;
use std::sync::Arc;

use relorm_core::OrmResult;

use crate::fields::{Field, Permission};
use crate::model::ModelDescriptor;
use crate::query::Condition;
use crate::relations::Relation;
use crate::wblist::{child_list, resolve, WbList};

/// A descriptor narrowed for one operation.
#[derive(Debug, Clone)]
pub struct Scope {
    desc: Arc<ModelDescriptor>,
    fields: Vec<Permission>,
    relations: Vec<Permission>,
    list: Option<WbList>,
    conditions: BTreeMap<String, Condition>,
}

impl Scope {
    /// A scope with the descriptor's declared permissions.
    pub fn full(desc: Arc<ModelDescriptor>) -> Self {
        Self {
            fields: desc.fields.iter().map(|f| f.permission).collect(),
            relations: desc.relations.iter().map(|r| r.permission).collect(),
            desc,
            list: None,
            conditions: BTreeMap::new(),
        }
    }

    /// Resolves `list` against the descriptor.
    ///
    /// `conditions` are keyed by relation path relative to this model, e.g.
    /// `Wheels` or `Owner.Cars`.
    pub fn new(
        desc: Arc<ModelDescriptor>,
        list: Option<&WbList>,
        conditions: BTreeMap<String, Condition>,
        extra_mandatory: &[String],
    ) -> OrmResult<Self> {
        let projection = resolve(&desc, list, extra_mandatory)?;
        Ok(Self {
            desc,
            fields: projection.fields,
            relations: projection.relations,
            list: projection.list,
            conditions,
        })
    }

    /// The descriptor.
    pub const fn desc(&self) -> &Arc<ModelDescriptor> {
        &self.desc
    }

    /// The effective list.
    pub const fn list(&self) -> Option<&WbList> {
        self.list.as_ref()
    }

    fn field_perm(&self, index: usize) -> Permission {
        self.fields.get(index).copied().unwrap_or(Permission::NONE)
    }

    fn relation_perm(&self, index: usize) -> Permission {
        self.relations.get(index).copied().unwrap_or(Permission::NONE)
    }

    /// Fields selected on reads.
    pub fn readable_fields(&self) -> impl Iterator<Item = &Field> {
        self.desc
            .fields
            .iter()
            .enumerate()
            .filter(|(i, f)| self.field_perm(*i).read && f.is_readable())
            .map(|(_, f)| f)
    }

    /// Fields written on inserts and updates.
    pub fn writable_fields(&self) -> impl Iterator<Item = &Field> {
        self.desc
            .fields
            .iter()
            .enumerate()
            .filter(|(i, f)| self.field_perm(*i).write && f.is_writable())
            .map(|(_, f)| f)
    }

    /// Relations loaded on reads.
    pub fn readable_relations(&self) -> impl Iterator<Item = &Relation> {
        self.desc
            .relations
            .iter()
            .enumerate()
            .filter(|(i, _)| self.relation_perm(*i).read)
            .map(|(_, r)| r)
    }

    /// Relations written on creates and updates.
    pub fn writable_relations(&self) -> impl Iterator<Item = &Relation> {
        self.desc
            .relations
            .iter()
            .enumerate()
            .filter(|(i, _)| self.relation_perm(*i).write)
            .map(|(_, r)| r)
    }

    /// Returns `true` if the named field is written in this scope.
    pub fn can_write(&self, name: &str) -> bool {
        self.writable_fields().any(|f| f.name == name)
    }

    /// The caller's extra condition for a relation.
    pub fn relation_condition(&self, relation: &str) -> Option<&Condition> {
        self.conditions.get(relation)
    }

    /// The scope of a relation's target.
    ///
    /// The list is narrowed to the relation's entries and conditions to
    /// those under `relation.`; a self-referencing relation inherits both
    /// unchanged.
    pub fn child(&self, relation: &Relation, desc: Arc<ModelDescriptor>) -> OrmResult<Self> {
        let (list, extra) = child_list(self.list.as_ref(), relation);
        let conditions = if relation.self_ref {
            self.conditions.clone()
        } else {
            let prefix = format!("{}.", relation.name);
            self.conditions
                .iter()
                .filter_map(|(path, cond)| {
                    path.strip_prefix(&prefix)
                        .map(|rest| (rest.to_string(), cond.clone()))
                })
                .collect()
        };
        Self::new(desc, list.as_ref(), conditions, &extra)
    }
}
