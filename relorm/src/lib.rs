//! # relorm
//!
//! A relation-aware object mapper. Entities are declared once, their
//! descriptors are built by merging the declaration with live table
//! metadata, and reads and writes traverse belongs-to, has-one, has-many
//! and many-to-many relations (including polymorphic ones) in batches.
//!
//! This is the meta-crate that re-exports the sub-crates. Depend on the
//! individual crates for finer-grained control.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use relorm::prelude::*;
//!
//! struct Driver;
//!
//! impl Entity for Driver {
//!     fn declare() -> EntityDecl {
//!         EntityDecl::new()
//!             .scalar("ID", ValueType::Int, "")
//!             .scalar("Name", ValueType::Text, r#"validate:"max=50""#)
//!     }
//! }
//!
//! # fn main() -> OrmResult<()> {
//! let db = SqliteBackend::open("app.db")?;
//! let orm = Orm::new(Settings::default()).with_executor(Arc::new(db));
//!
//! let mut driver = orm.model::<Driver>()?;
//! driver.set("Name", "Pat")?;
//! driver.create()?;
//!
//! let mut found = orm.model::<Driver>()?;
//! found.first(Condition::new().eq("name", "Pat"))?;
//! # Ok(())
//! # }
//! ```

/// Errors, settings, settings loading, and logging setup.
pub use relorm_core as core;

/// Entity declarations, descriptors, loading strategies, and the engine.
pub use relorm_db as db;

/// Database executors.
pub use relorm_db_backends as db_backends;

/// Test database, query counting, and fixtures.
#[cfg(feature = "testing")]
pub use relorm_test as test;

pub use relorm_core::{OrmError, OrmResult, Settings};
pub use relorm_db::Orm;

/// The types most programs need.
pub mod prelude {
    pub use relorm_core::{OrmError, OrmResult, Settings};
    pub use relorm_db::{
        Condition, Entity, EntityDecl, Instance, Lookup, Orm, Record, Value, ValueType, Q,
    };
    #[cfg(feature = "sqlite")]
    pub use relorm_db_backends::SqliteBackend;
}
