//! Relation descriptors.
//!
//! A [`Relation`] is one edge of the relation graph: the owning attribute,
//! the related entity, the key pair linking both sides, and the
//! kind-specific payload carried by [`RelationKind`]. Relations are resolved
//! by the introspector; see [`crate::introspect`].

use crate::fields::Permission;
use crate::model::{EntityType, Shape};
use crate::validators::RelationRule;

/// The join table of a many-to-many relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinTable {
    /// The join table name.
    pub table: String,
    /// The column referencing the owner.
    pub fk_column: String,
    /// The column referencing the related entity.
    pub afk_column: String,
}

/// The discriminator of a polymorphic relation.
///
/// The related table serves several owner types; `type_field` tells them
/// apart and holds `value` for this owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Polymorphic {
    /// The related attribute holding the owner type (`<Prefix>Type`).
    pub type_field: String,
    /// Its column.
    pub type_column: String,
    /// The discriminator literal for this owner.
    pub value: String,
}

/// The kind of a relation, with its kind-specific payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationKind {
    /// The related row references the owner; at most one related row.
    HasOne {
        /// Set for polymorphic relations.
        polymorphic: Option<Polymorphic>,
    },
    /// The owner references the related row.
    BelongsTo,
    /// The related rows reference the owner.
    HasMany {
        /// Set for polymorphic relations.
        polymorphic: Option<Polymorphic>,
    },
    /// Owner and related rows are paired through a join table.
    ManyToMany {
        /// The join table.
        join: JoinTable,
    },
}

impl RelationKind {
    /// The polymorphic discriminator, if any.
    pub const fn polymorphic(&self) -> Option<&Polymorphic> {
        match self {
            Self::HasOne { polymorphic } | Self::HasMany { polymorphic } => polymorphic.as_ref(),
            _ => None,
        }
    }

    /// The join table of a many-to-many relation.
    pub const fn join(&self) -> Option<&JoinTable> {
        match self {
            Self::ManyToMany { join } => Some(join),
            _ => None,
        }
    }

    /// Returns `true` for belongs-to.
    pub const fn is_belongs_to(&self) -> bool {
        matches!(self, Self::BelongsTo)
    }

    /// Returns `true` for has-one.
    pub const fn is_has_one(&self) -> bool {
        matches!(self, Self::HasOne { .. })
    }

    /// Returns `true` for has-many.
    pub const fn is_has_many(&self) -> bool {
        matches!(self, Self::HasMany { .. })
    }

    /// Returns `true` for many-to-many.
    pub const fn is_many_to_many(&self) -> bool {
        matches!(self, Self::ManyToMany { .. })
    }

    /// The tag spelling of the kind.
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::HasOne { .. } => "hasOne",
            Self::BelongsTo => "belongsTo",
            Self::HasMany { .. } => "hasMany",
            Self::ManyToMany { .. } => "manyToMany",
        }
    }
}

/// One relation of a model.
///
/// `fk` is always an owner attribute and `afk` a related attribute: for
/// belongs-to the owner holds the reference (`Car.OwnerID -> Owner.ID`),
/// for the other kinds the owner's key is referenced (`Car.ID <-
/// Wheel.CarID`, or through the join table).
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    /// The owning attribute.
    pub name: String,
    /// The kind and its payload.
    pub kind: RelationKind,
    /// The related entity.
    pub target: EntityType,
    /// How the owner holds the related values.
    pub shape: Shape,
    /// Owner-side key attribute.
    pub fk: String,
    /// Its column.
    pub fk_column: String,
    /// Related-side key attribute.
    pub afk: String,
    /// Its column.
    pub afk_column: String,
    /// The related type is the owning type.
    pub self_ref: bool,
    /// Declared permission.
    pub permission: Permission,
    /// Relation-level validation rules.
    pub rules: Vec<RelationRule>,
}

impl Relation {
    /// The relation chain identifier used by loop detection, e.g.
    /// `Person.Parent`.
    pub fn chain_id(&self, owner: &str) -> String {
        format!("{owner}.{}", self.name)
    }
}
