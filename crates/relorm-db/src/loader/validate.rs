//! Write-time validation of an entity graph.

use std::collections::HashSet;

use relorm_core::{OrmError, OrmResult};

use crate::graph::{Graph, Link, NodeId};
use crate::registry::Orm;
use crate::scope::Scope;
use crate::validators::{validate_value, RelationRule};

/// Validates a node before it is written.
///
/// Every writable field is checked against its composed rules; with
/// `require_all` unset (updates) attributes the caller never assigned are
/// skipped. Relation rules then check element counts, and `dive` descends
/// into the related entities. The entity's own `validate` hook runs last.
pub fn validate(
    orm: &Orm,
    graph: &Graph,
    node: NodeId,
    scope: &Scope,
    require_all: bool,
) -> OrmResult<()> {
    let mut visited = HashSet::new();
    validate_node(orm, graph, node, scope, require_all, &mut visited)
}

fn validate_node(
    orm: &Orm,
    graph: &Graph,
    node: NodeId,
    scope: &Scope,
    require_all: bool,
    visited: &mut HashSet<NodeId>,
) -> OrmResult<()> {
    if !visited.insert(node) {
        return Ok(());
    }
    let desc = scope.desc();
    let values = &graph.node(node).values;
    for field in scope.writable_fields() {
        if !require_all && !values.contains_key(&field.name) {
            continue;
        }
        validate_value(&desc.short_name, field, graph.get(node, &field.name))?;
    }

    for relation in scope.writable_relations().filter(|r| !r.rules.is_empty()) {
        let related: Vec<NodeId> = match graph.node(node).links.get(&relation.name) {
            Some(Link::One(Some(t))) => vec![*t],
            Some(Link::Many(ts)) => ts.clone(),
            _ => Vec::new(),
        };
        let related: Vec<NodeId> = related
            .into_iter()
            .filter(|t| !graph.is_empty_node(*t))
            .collect();
        let count = related.len();

        for rule in &relation.rules {
            let ok = match *rule {
                RelationRule::OmitEmpty if count == 0 => break,
                RelationRule::OmitEmpty => true,
                RelationRule::Required => count > 0,
                RelationRule::Min(n) => count >= n,
                RelationRule::Max(n) => count <= n,
                RelationRule::Dive => {
                    let child = scope.child(relation, orm.descriptor_of(relation.target)?)?;
                    for &t in &related {
                        validate_node(orm, graph, t, &child, require_all, visited)?;
                    }
                    true
                }
            };
            if !ok {
                return Err(OrmError::ValidationFailed {
                    entity: desc.short_name.clone(),
                    field: relation.name.clone(),
                    tag: rule.tag().to_string(),
                    param: rule.param(),
                    value: count.to_string(),
                });
            }
        }
    }

    if let Some(hooks) = &desc.hooks {
        hooks.validate(graph, node)?;
    }
    Ok(())
}
