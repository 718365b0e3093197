//! Core error types for relorm.
//!
//! This module provides the [`OrmError`] enum that every layer of the mapper
//! returns. Variants are grouped by where the failure originates: schema
//! construction, instance misuse, operation semantics, validation, and the
//! backend collaborators (query builder, cache, configuration).

use thiserror::Error;

/// The primary error type for relorm.
///
/// Errors are never swallowed by the engine: they propagate to the caller of
/// the top-level operation. The only locally recovered case is a missing row
/// on a child relation during a single-entity load, see
/// [`OrmError::is_not_found`].
///
/// # Examples
///
/// ```
/// use relorm_core::OrmError;
///
/// let err = OrmError::NoPrimaryKey("cars".into());
/// assert_eq!(err.to_string(), "Table 'cars' has no primary key");
/// assert!(err.is_schema_error());
/// ```
#[derive(Error, Debug)]
pub enum OrmError {
    // ── Schema errors ────────────────────────────────────────────────

    /// The described table has no primary-key column.
    #[error("Table '{0}' has no primary key")]
    NoPrimaryKey(String),

    /// No query builder (executor) is configured on the engine.
    #[error("No query builder configured")]
    NoBuilder,

    /// A tag or relation referenced an attribute that the entity does not declare.
    #[error("Attribute '{attribute}' not found on entity '{entity}'")]
    AttributeNotFound {
        /// The entity that was searched.
        entity: String,
        /// The missing attribute name.
        attribute: String,
    },

    /// A column referenced by metadata is absent from the table.
    #[error("Column '{column}' not found in table '{table}'")]
    ColumnNotFound {
        /// The table that was searched.
        table: String,
        /// The missing column name.
        column: String,
    },

    /// The `relation` tag carries a value outside hasOne/belongsTo/hasMany/manyToMany.
    #[error("Unknown relation tag '{0}'")]
    UnknownRelationTag(String),

    /// Neither tags, database metadata, nor naming conventions identify the keys.
    #[error("Foreign key not found for relation '{relation}' on entity '{entity}'")]
    ForeignKeyNotFound {
        /// The owning entity.
        entity: String,
        /// The relation attribute.
        relation: String,
    },

    /// A many-to-many relation names a join table that does not exist.
    #[error("Join table '{0}' not found")]
    JoinTableNotFound(String),

    /// Polymorphism was requested on a relation kind that cannot carry it.
    #[error("Polymorphic relation '{relation}' on entity '{entity}' must be hasOne or hasMany")]
    UnsupportedPolymorphic {
        /// The owning entity.
        entity: String,
        /// The relation attribute.
        relation: String,
    },

    /// A struct tag could not be parsed.
    #[error("Invalid tag on '{attribute}': {reason}")]
    InvalidTag {
        /// The attribute carrying the tag.
        attribute: String,
        /// What was wrong with it.
        reason: String,
    },

    // ── Instance errors ──────────────────────────────────────────────

    /// A descriptor was requested for an entity type that was never initialized.
    #[error("Entity '{0}' is not initialized")]
    NotInitialized(String),

    /// The descriptor cache was replaced after descriptors had been built.
    #[error("Cannot replace the descriptor cache after initialization")]
    SetCacheAfterInit,

    /// An operation needed primary-key values that are unset.
    #[error("Missing primary key value on '{0}'")]
    MissingPrimary(String),

    /// An insert was requested with no writable, non-empty value.
    #[error("No value provided for insert into '{0}'")]
    NoValueProvided(String),

    /// Graph access used a name the entity does not declare.
    #[error("Unknown attribute '{attribute}' on '{entity}'")]
    UnknownAttribute {
        /// The entity that was accessed.
        entity: String,
        /// The undeclared attribute.
        attribute: String,
    },

    // ── Operation errors ─────────────────────────────────────────────

    /// A hard delete affected zero rows.
    #[error("Delete matched no rows in '{0}'")]
    DeleteNotFound(String),

    /// An update affected zero rows.
    #[error("Update matched no rows in '{0}'")]
    UpdateZeroRows(String),

    /// The same relation fetch repeated on one relation chain.
    #[error("Infinite relation loop detected on '{chain}' ({fingerprint})")]
    InfinityLoop {
        /// The relation chain identifier (`Model.Relation`).
        chain: String,
        /// The repeated condition fingerprint.
        fingerprint: String,
    },

    // ── Validation ───────────────────────────────────────────────────

    /// A field failed one of its validation rules.
    #[error("Validation failed on {entity}.{field}: rule '{tag}' (param '{param}', value '{value}')")]
    ValidationFailed {
        /// The entity being validated.
        entity: String,
        /// The offending attribute.
        field: String,
        /// The rule that failed (e.g. `required`, `max`).
        tag: String,
        /// The rule parameter, empty when the rule has none.
        param: String,
        /// The offending value, rendered for display.
        value: String,
    },

    // ── Backend errors ───────────────────────────────────────────────

    /// A query expected a row and found none.
    #[error("Object does not exist: {0}")]
    DoesNotExist(String),

    /// A query expected exactly one row and found several.
    #[error("Multiple objects returned when one expected: {0}")]
    MultipleObjectsReturned(String),

    /// A generic database error surfaced by the executor.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// An operational database error (connection failure, etc.).
    #[error("Operational error: {0}")]
    OperationalError(String),

    /// An error surfaced by the descriptor cache collaborator.
    #[error("Cache error: {0}")]
    CacheError(String),

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrmError {
    /// Returns `true` for the "row not found" condition.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::DoesNotExist(_))
    }

    /// Returns `true` for errors raised while building a descriptor.
    pub const fn is_schema_error(&self) -> bool {
        matches!(
            self,
            Self::NoPrimaryKey(_)
                | Self::NoBuilder
                | Self::AttributeNotFound { .. }
                | Self::ColumnNotFound { .. }
                | Self::UnknownRelationTag(_)
                | Self::ForeignKeyNotFound { .. }
                | Self::JoinTableNotFound(_)
                | Self::UnsupportedPolymorphic { .. }
                | Self::InvalidTag { .. }
        )
    }

    /// Returns `true` for errors surfaced unchanged from a collaborator.
    pub const fn is_backend_error(&self) -> bool {
        matches!(
            self,
            Self::DoesNotExist(_)
                | Self::MultipleObjectsReturned(_)
                | Self::DatabaseError(_)
                | Self::OperationalError(_)
                | Self::CacheError(_)
                | Self::Io(_)
        )
    }
}

/// A convenience type alias for `Result<T, OrmError>`.
pub type OrmResult<T> = Result<T, OrmError>;
