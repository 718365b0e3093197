//! # relorm-db-backends
//!
//! Database executors for relorm. Each backend implements
//! [`DbExecutor`](relorm_db::DbExecutor): statement execution, generated-id
//! retrieval, transactions, and the table metadata the descriptor
//! introspector merges with entity declarations.
//!
//! Supported backends:
//! - `SQLite` (feature `sqlite`, on by default)

#![allow(clippy::result_large_err)]

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBackend;
