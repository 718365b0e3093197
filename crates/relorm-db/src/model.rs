//! Entity declarations and model descriptors.
//!
//! The [`Entity`] trait is the core abstraction that every mapped type
//! implements. Instead of reflecting over a struct at run time, an entity
//! lists its attributes once through an [`EntityDecl`] builder: scalars,
//! relations to other entities, embedded declarations, and the base-model
//! marker that contributes the time fields. Each attribute carries a struct
//! tag string (`orm:"..." validate:"..."`) parsed by [`crate::tags`].
//!
//! The introspector turns a declaration plus the table's metadata into a
//! frozen [`ModelDescriptor`], cached per entity type.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::fields::Field;
use crate::hooks::ModelHooks;
use crate::relations::Relation;
use crate::value::ValueType;

/// Attribute name of the creation timestamp.
pub const CREATED_AT: &str = "CreatedAt";
/// Attribute name of the modification timestamp.
pub const UPDATED_AT: &str = "UpdatedAt";
/// Attribute name of the soft-delete timestamp.
pub const DELETED_AT: &str = "DeletedAt";

/// The time fields recognized on every model, in declaration order.
pub const TIME_FIELDS: [&str; 3] = [CREATED_AT, UPDATED_AT, DELETED_AT];

/// A mapped entity type.
///
/// Implementors are usually zero-sized marker types; the data itself lives
/// in a [`Graph`](crate::graph::Graph).
///
/// # Examples
///
/// ```
/// use relorm_db::model::{Entity, EntityDecl};
/// use relorm_db::value::ValueType;
///
/// struct Owner;
///
/// impl Entity for Owner {
///     fn declare() -> EntityDecl {
///         EntityDecl::new()
///             .scalar("ID", ValueType::Int, "")
///             .scalar("Name", ValueType::Text, r#"validate:"required""#)
///     }
/// }
///
/// assert_eq!(Owner::declare().attrs().len(), 2);
/// ```
pub trait Entity: 'static {
    /// Lists the entity's attributes.
    fn declare() -> EntityDecl;
}

/// A type-erased handle to an [`Entity`] implementor.
///
/// Two handles are equal when they name the same type.
#[derive(Clone, Copy)]
pub struct EntityType {
    name: fn() -> &'static str,
    declare: fn() -> EntityDecl,
}

impl EntityType {
    /// Returns the handle for `T`.
    pub fn of<T: Entity>() -> Self {
        Self {
            name: std::any::type_name::<T>,
            declare: T::declare,
        }
    }

    /// The namespaced type name, e.g. `my_app::models::Car`.
    pub fn name(&self) -> &'static str {
        (self.name)()
    }

    /// The last path segment of the type name, e.g. `Car`.
    pub fn short_name(&self) -> &'static str {
        let name = self.name();
        name.rsplit("::").next().unwrap_or(name)
    }

    /// Runs the entity's declaration.
    pub fn declare(&self) -> EntityDecl {
        (self.declare)()
    }
}

impl PartialEq for EntityType {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

impl Eq for EntityType {}

impl Hash for EntityType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name().hash(state);
    }
}

impl fmt::Debug for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a relation attribute holds its related value(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    /// A nested value (`Owner`).
    One,
    /// An optional nested value (`Option<Owner>`).
    OptionalOne,
    /// A list of values (`Vec<Wheel>`).
    Many,
}

impl Shape {
    /// Returns `true` for the list shape.
    pub const fn is_many(self) -> bool {
        matches!(self, Self::Many)
    }
}

/// The kind of a declared attribute.
#[derive(Clone)]
pub enum AttrKind {
    /// A scalar mapped to a column.
    Scalar {
        /// The attribute's declared type.
        value_type: ValueType,
        /// The attribute is optional.
        nullable: bool,
    },
    /// A relation to another entity.
    Relation {
        /// The related entity.
        target: EntityType,
        /// How the related values are held.
        shape: Shape,
    },
    /// An embedded declaration whose attributes are flattened in place.
    Embedded(EntityDecl),
    /// The base-model marker; contributes the time fields.
    BaseModel,
}

impl fmt::Debug for AttrKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar {
                value_type,
                nullable,
            } => write!(f, "Scalar({value_type:?}, nullable={nullable})"),
            Self::Relation { target, shape } => write!(f, "Relation({target:?}, {shape:?})"),
            Self::Embedded(decl) => write!(f, "Embedded({} attrs)", decl.attrs.len()),
            Self::BaseModel => f.write_str("BaseModel"),
        }
    }
}

/// One declared attribute.
#[derive(Debug, Clone)]
pub struct AttrDecl {
    /// The attribute name.
    pub name: String,
    /// The struct tag string.
    pub tag: String,
    /// Unexported attributes are skipped by the introspector.
    pub exported: bool,
    /// What the attribute is.
    pub kind: AttrKind,
}

/// The declaration of an entity: options and attributes in order.
#[derive(Clone, Default)]
pub struct EntityDecl {
    pub(crate) table: Option<String>,
    pub(crate) database: Option<String>,
    pub(crate) strategy: Option<String>,
    pub(crate) attrs: Vec<AttrDecl>,
    pub(crate) hooks: Option<Arc<dyn ModelHooks>>,
}

impl EntityDecl {
    /// Creates an empty declaration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the table name.
    #[must_use]
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Overrides the database name.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Selects a registered loading strategy.
    #[must_use]
    pub fn strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = Some(strategy.into());
        self
    }

    /// Attaches lifecycle hooks.
    #[must_use]
    pub fn hooks(mut self, hooks: Arc<dyn ModelHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    fn push(mut self, name: &str, tag: &str, exported: bool, kind: AttrKind) -> Self {
        self.attrs.push(AttrDecl {
            name: name.to_string(),
            tag: tag.to_string(),
            exported,
            kind,
        });
        self
    }

    /// Declares a scalar attribute.
    #[must_use]
    pub fn scalar(self, name: &str, value_type: ValueType, tag: &str) -> Self {
        self.push(
            name,
            tag,
            true,
            AttrKind::Scalar {
                value_type,
                nullable: false,
            },
        )
    }

    /// Declares an optional scalar attribute.
    #[must_use]
    pub fn nullable(self, name: &str, value_type: ValueType, tag: &str) -> Self {
        self.push(
            name,
            tag,
            true,
            AttrKind::Scalar {
                value_type,
                nullable: true,
            },
        )
    }

    /// Declares an attribute the mapper must ignore.
    #[must_use]
    pub fn unexported(self, name: &str, value_type: ValueType) -> Self {
        self.push(
            name,
            "",
            false,
            AttrKind::Scalar {
                value_type,
                nullable: false,
            },
        )
    }

    /// Declares a nested related entity.
    #[must_use]
    pub fn one<T: Entity>(self, name: &str, tag: &str) -> Self {
        self.relation(name, tag, EntityType::of::<T>(), Shape::One)
    }

    /// Declares an optional nested related entity.
    #[must_use]
    pub fn optional_one<T: Entity>(self, name: &str, tag: &str) -> Self {
        self.relation(name, tag, EntityType::of::<T>(), Shape::OptionalOne)
    }

    /// Declares a list of related entities.
    #[must_use]
    pub fn many<T: Entity>(self, name: &str, tag: &str) -> Self {
        self.relation(name, tag, EntityType::of::<T>(), Shape::Many)
    }

    fn relation(self, name: &str, tag: &str, target: EntityType, shape: Shape) -> Self {
        self.push(name, tag, true, AttrKind::Relation { target, shape })
    }

    /// Embeds another declaration; its attributes are flattened in place.
    #[must_use]
    pub fn embed(self, decl: Self) -> Self {
        self.push("", "", true, AttrKind::Embedded(decl))
    }

    /// Embeds the base model: `CreatedAt`, `UpdatedAt` and `DeletedAt` are
    /// appended after every other attribute.
    #[must_use]
    pub fn base_model(self) -> Self {
        self.push("", "", true, AttrKind::BaseModel)
    }

    /// The declared attributes, embedded ones not yet flattened.
    pub fn attrs(&self) -> &[AttrDecl] {
        &self.attrs
    }

    /// Flattens embedded declarations and appends the time fields when any
    /// level carries the base-model marker.
    pub(crate) fn flatten(&self) -> Vec<AttrDecl> {
        let mut out = Vec::new();
        let mut base = false;
        self.flatten_into(&mut out, &mut base);
        if base {
            for name in TIME_FIELDS {
                if out.iter().any(|a| a.name == name) {
                    continue;
                }
                out.push(AttrDecl {
                    name: name.to_string(),
                    tag: String::new(),
                    exported: true,
                    kind: AttrKind::Scalar {
                        value_type: ValueType::DateTime,
                        nullable: true,
                    },
                });
            }
        }
        out
    }

    fn flatten_into(&self, out: &mut Vec<AttrDecl>, base: &mut bool) {
        for attr in &self.attrs {
            match &attr.kind {
                AttrKind::Embedded(inner) => inner.flatten_into(out, base),
                AttrKind::BaseModel => *base = true,
                _ => out.push(attr.clone()),
            }
        }
    }
}

impl fmt::Debug for EntityDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityDecl")
            .field("table", &self.table)
            .field("database", &self.database)
            .field("strategy", &self.strategy)
            .field("attrs", &self.attrs)
            .field("hooks", &self.hooks.is_some())
            .finish()
    }
}

/// The frozen, cached schema record of one entity type.
#[derive(Clone)]
pub struct ModelDescriptor {
    /// The namespaced type name.
    pub name: String,
    /// The unqualified type name.
    pub short_name: String,
    /// The entity handle.
    pub entity: EntityType,
    /// The table name.
    pub table: String,
    /// The database name.
    pub database: String,
    /// The loading strategy selector.
    pub strategy: String,
    /// Scalar fields in declaration order.
    pub fields: Vec<Field>,
    /// Relations in declaration order.
    pub relations: Vec<Relation>,
    /// Attribute names of the primary-key fields.
    pub primary_keys: Vec<String>,
    /// The time fields present in the table.
    pub time_fields: Vec<String>,
    /// Lifecycle hooks.
    pub hooks: Option<Arc<dyn ModelHooks>>,
}

impl ModelDescriptor {
    /// Looks up a field by attribute name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Returns the position of a field.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Looks up a relation by attribute name.
    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Returns the position of a relation.
    pub fn relation_index(&self, name: &str) -> Option<usize> {
        self.relations.iter().position(|r| r.name == name)
    }

    /// Returns the column of a field, falling back to the attribute name.
    pub fn column(&self, name: &str) -> String {
        self.field(name)
            .map_or_else(|| name.to_string(), |f| f.column.clone())
    }

    /// The primary-key fields.
    pub fn pk_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.primary_key)
    }

    /// The autoincrement field, if any.
    pub fn autoincrement(&self) -> Option<&Field> {
        self.fields.iter().find(|f| f.autoincrement)
    }

    /// Returns `true` if the time field exists in the table.
    pub fn has_time_field(&self, name: &str) -> bool {
        self.time_fields.iter().any(|t| t == name)
    }

    /// Returns `true` if the attribute is one of the time fields.
    pub fn is_time_field(name: &str) -> bool {
        TIME_FIELDS.contains(&name)
    }
}

impl fmt::Debug for ModelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDescriptor")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("database", &self.database)
            .field("strategy", &self.strategy)
            .field("fields", &self.fields)
            .field("relations", &self.relations)
            .field("primary_keys", &self.primary_keys)
            .field("time_fields", &self.time_fields)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Base;
    impl Entity for Base {
        fn declare() -> EntityDecl {
            EntityDecl::new().scalar("ID", ValueType::Int, "")
        }
    }

    struct Post;
    impl Entity for Post {
        fn declare() -> EntityDecl {
            EntityDecl::new()
                .table("articles")
                .embed(Base::declare().base_model())
                .scalar("Title", ValueType::Text, "")
                .unexported("cache", ValueType::Text)
                .many::<Base>("Bases", "")
        }
    }

    #[test]
    fn test_entity_type_names() {
        let ty = EntityType::of::<Post>();
        assert!(ty.name().ends_with("::Post"));
        assert_eq!(ty.short_name(), "Post");
        assert_eq!(ty, EntityType::of::<Post>());
        assert_ne!(ty, EntityType::of::<Base>());
    }

    #[test]
    fn test_flatten_embeds_and_appends_time_fields() {
        let names: Vec<String> = Post::declare()
            .flatten()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "ID",
                "Title",
                "cache",
                "Bases",
                "CreatedAt",
                "UpdatedAt",
                "DeletedAt"
            ]
        );
    }

    #[test]
    fn test_declare_options() {
        let decl = Post::declare();
        assert_eq!(decl.table.as_deref(), Some("articles"));
        assert!(decl.database.is_none());
        assert!(!decl.attrs()[2].exported);
    }

    #[test]
    fn test_shape() {
        assert!(Shape::Many.is_many());
        assert!(!Shape::OptionalOne.is_many());
    }
}
