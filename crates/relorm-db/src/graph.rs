//! The entity graph.
//!
//! Loaded and assigned entities live in a [`Graph`], an arena of [`Node`]s
//! addressed by [`NodeId`]. A node holds the scalar values of one entity and,
//! per relation attribute, a [`Link`] to the related nodes. Relations never
//! own their targets, so cycles (a wheel pointing back at its car, a person
//! whose parent is its own child) are plain id references and a back
//! reference is recognized by id equality.
//!
//! [`Record`] is the nested builder used to assign data to a fresh entity
//! before creating it.

use std::collections::BTreeMap;

use crate::model::EntityType;
use crate::value::Value;

static NULL: Value = Value::Null;

/// The address of a node inside one [`Graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// The arena index.
    pub const fn index(self) -> usize {
        self.0
    }
}

/// The related nodes of one relation attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Link {
    /// A nested or optional nested entity.
    One(Option<NodeId>),
    /// A list of entities.
    Many(Vec<NodeId>),
}

/// One entity value.
#[derive(Debug, Clone)]
pub struct Node {
    /// The entity type of the node.
    pub entity: EntityType,
    /// Scalar values by attribute name; unset attributes are absent.
    pub values: BTreeMap<String, Value>,
    /// Relation links by attribute name.
    pub links: BTreeMap<String, Link>,
}

/// An arena of entity nodes.
///
/// # Examples
///
/// ```
/// use relorm_db::graph::Graph;
/// use relorm_db::model::{Entity, EntityDecl, EntityType};
/// use relorm_db::value::Value;
///
/// struct Car;
/// impl Entity for Car {
///     fn declare() -> EntityDecl { EntityDecl::new() }
/// }
/// struct Wheel;
/// impl Entity for Wheel {
///     fn declare() -> EntityDecl { EntityDecl::new() }
/// }
///
/// let mut g = Graph::new();
/// let car = g.add(EntityType::of::<Car>());
/// let wheel = g.add(EntityType::of::<Wheel>());
/// g.set(car, "Brand", "BMW");
/// g.push_many(car, "Wheels", wheel);
/// g.link_one(wheel, "Car", Some(car));
///
/// assert_eq!(g.get(car, "Brand"), &Value::from("BMW"));
/// assert_eq!(g.many(car, "Wheels"), &[wheel]);
/// assert_eq!(g.one(wheel, "Car"), Some(car));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<Node>,
}

impl Graph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an empty node.
    pub fn add(&mut self, entity: EntityType) -> NodeId {
        self.nodes.push(Node {
            entity,
            values: BTreeMap::new(),
            links: BTreeMap::new(),
        });
        NodeId(self.nodes.len() - 1)
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` when the graph has no node.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns a node.
    ///
    /// # Panics
    ///
    /// Panics if `id` belongs to another graph.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    /// Returns a scalar value; unset attributes read as `Null`.
    pub fn get(&self, id: NodeId, attr: &str) -> &Value {
        self.node(id).values.get(attr).unwrap_or(&NULL)
    }

    /// Sets a scalar value.
    pub fn set(&mut self, id: NodeId, attr: impl Into<String>, value: impl Into<Value>) {
        self.node_mut(id).values.insert(attr.into(), value.into());
    }

    /// Returns the linked node of a one-shaped relation.
    pub fn one(&self, id: NodeId, rel: &str) -> Option<NodeId> {
        match self.node(id).links.get(rel) {
            Some(Link::One(target)) => *target,
            _ => None,
        }
    }

    /// Returns the linked nodes of a list relation.
    pub fn many(&self, id: NodeId, rel: &str) -> &[NodeId] {
        match self.node(id).links.get(rel) {
            Some(Link::Many(targets)) => targets,
            _ => &[],
        }
    }

    /// Sets or clears the link of a one-shaped relation.
    pub fn link_one(&mut self, id: NodeId, rel: impl Into<String>, target: Option<NodeId>) {
        self.node_mut(id).links.insert(rel.into(), Link::One(target));
    }

    /// Replaces the links of a list relation.
    pub fn set_many(&mut self, id: NodeId, rel: impl Into<String>, targets: Vec<NodeId>) {
        self.node_mut(id).links.insert(rel.into(), Link::Many(targets));
    }

    /// Appends one node to a list relation.
    pub fn push_many(&mut self, id: NodeId, rel: impl Into<String>, target: NodeId) {
        let links = &mut self.node_mut(id).links;
        match links.entry(rel.into()).or_insert_with(|| Link::Many(Vec::new())) {
            Link::Many(targets) => targets.push(target),
            one @ Link::One(_) => *one = Link::Many(vec![target]),
        }
    }

    /// Removes the element at `index` from a list relation.
    pub fn remove_many(&mut self, id: NodeId, rel: &str, index: usize) -> Option<NodeId> {
        match self.node_mut(id).links.get_mut(rel) {
            Some(Link::Many(targets)) if index < targets.len() => Some(targets.remove(index)),
            _ => None,
        }
    }

    /// The values of `attrs` on a node, or `None` when any of them is zero.
    ///
    /// Used with primary-key attribute lists: an entity whose key is unset
    /// has not been persisted yet.
    pub fn key_of(&self, id: NodeId, attrs: &[String]) -> Option<Vec<Value>> {
        let values: Vec<Value> = attrs.iter().map(|a| self.get(id, a).clone()).collect();
        (!values.is_empty() && values.iter().all(|v| !v.is_zero())).then_some(values)
    }

    /// Returns `true` when every value of the node is zero and every link is
    /// empty.
    pub fn is_empty_node(&self, id: NodeId) -> bool {
        let node = self.node(id);
        node.values.values().all(Value::is_zero)
            && node.links.values().all(|l| match l {
                Link::One(t) => t.is_none(),
                Link::Many(ts) => ts.is_empty(),
            })
    }
}

/// Nested data for one entity, assigned with
/// [`Instance::assign`](crate::instance::Instance::assign).
///
/// # Examples
///
/// ```
/// use relorm_db::graph::Record;
///
/// let car = Record::new()
///     .set("Brand", "BMW")
///     .one("Owner", Record::new().set("Name", "John Doe"))
///     .many("Wheels", vec![Record::new().set("Brand", "Pirelli")]);
/// assert_eq!(car.values().len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    values: Vec<(String, Value)>,
    ones: Vec<(String, Option<Record>)>,
    manys: Vec<(String, Vec<Record>)>,
}

impl Record {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a scalar.
    #[must_use]
    pub fn set(mut self, attr: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.push((attr.into(), value.into()));
        self
    }

    /// Sets a nested entity.
    #[must_use]
    pub fn one(mut self, rel: impl Into<String>, record: Self) -> Self {
        self.ones.push((rel.into(), Some(record)));
        self
    }

    /// Explicitly clears a nested entity.
    #[must_use]
    pub fn none(mut self, rel: impl Into<String>) -> Self {
        self.ones.push((rel.into(), None));
        self
    }

    /// Sets a list of entities.
    #[must_use]
    pub fn many(mut self, rel: impl Into<String>, records: Vec<Self>) -> Self {
        self.manys.push((rel.into(), records));
        self
    }

    /// The scalar assignments.
    pub fn values(&self) -> &[(String, Value)] {
        &self.values
    }

    /// The nested entity assignments.
    pub fn ones(&self) -> &[(String, Option<Self>)] {
        &self.ones
    }

    /// The list assignments.
    pub fn manys(&self) -> &[(String, Vec<Self>)] {
        &self.manys
    }
}
