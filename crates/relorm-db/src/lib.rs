//! # relorm-db
//!
//! The mapper core of relorm. Entities are declared once through the
//! [`Entity`](model::Entity) trait; the [`Orm`](registry::Orm) builds a
//! frozen [`ModelDescriptor`](model::ModelDescriptor) for each of them on
//! first use by merging the declaration with the table metadata the
//! [`DbExecutor`](executor::DbExecutor) reports, and caches it.
//!
//! ## Architecture
//!
//! Entity data lives in a [`Graph`](graph::Graph) arena: nodes hold scalar
//! values and relation links by attribute name, so cyclic data (a car whose
//! wheels point back at it) is plain node ids. A [`Instance`](instance::Instance)
//! owns one graph and runs the five operations on its root through the
//! model's [`LoadingStrategy`](loader::LoadingStrategy). The eager strategy
//! batches relation fetches level by level, installs back references instead
//! of re-fetching ancestors, and turns updates into a change-set computed by
//! diffing against a fresh snapshot.
//!
//! ## Module Overview
//!
//! - [`model`] - Entity declarations and model descriptors
//! - [`fields`] - Field descriptors, SQL kinds and permissions
//! - [`relations`] - Relation descriptors
//! - [`introspect`] - Descriptor construction
//! - [`cache`] - The descriptor cache
//! - [`graph`] - The entity arena and the `Record` builder
//! - [`value`] - The backend-agnostic [`Value`](value::Value) enum
//! - [`query`] - Conditions, lookups and SQL compilation
//! - [`scope`] / [`wblist`] - Per-operation white/blacklist projection
//! - [`validators`] - Field and relation validation rules
//! - [`changeset`] - Snapshot diffing
//! - [`loader`] - Loading strategies
//! - [`instance`] / [`registry`] - The public operation surface

// - struct_excessive_bools: Field mirrors column metadata, which is mostly flags
// - too_many_lines: the loader and the SQL compiler match over many cases
// - cast_precision_loss: i64-to-f64 casts are acceptable for validator comparisons
// - result_large_err: OrmError is the one error type and is used consistently
// - format_push_string: format! with push_str is clearer than write! for SQL generation
// - module_name_repetitions: ModelDescriptor, ModelHooks read better than the bare names
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::result_large_err)]
#![allow(clippy::format_push_string)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::too_many_arguments)]

pub mod cache;
pub mod changeset;
pub mod executor;
pub mod fields;
pub mod graph;
pub mod hooks;
pub mod instance;
pub mod introspect;
pub mod loader;
pub mod model;
pub mod query;
pub mod registry;
pub mod relations;
pub mod scope;
pub mod tags;
pub mod transactions;
pub mod validators;
pub mod value;
pub mod wblist;

#[cfg(test)]
pub(crate) mod testing;

// Re-export the most commonly used types at the crate root.
pub use cache::{Cache, InMemoryCache};
pub use changeset::{Change, ChangeIndex, Differ, Op};
pub use executor::{ColumnInfo, DbExecutor, ForeignKeyInfo};
pub use graph::{Graph, Link, NodeId, Record};
pub use hooks::ModelHooks;
pub use instance::Instance;
pub use loader::eager::EagerLoader;
pub use loader::{LoadingStrategy, Session};
pub use model::{Entity, EntityDecl, EntityType, ModelDescriptor};
pub use query::{Condition, DatabaseBackendType, Lookup, OrderBy, Q};
pub use registry::Orm;
pub use relations::{Relation, RelationKind};
pub use transactions::{atomic, Transaction};
pub use value::{KeyValue, Value, ValueType};
pub use wblist::WbList;
