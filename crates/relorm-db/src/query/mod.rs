//! Query building and compilation.
//!
//! - [`lookups`] - Q objects and lookup types for filtering
//! - [`compiler`] - Statement AST and SQL compilation
//! - [`condition`] - Caller-facing conditions and their fingerprints

pub mod compiler;
pub mod condition;
pub mod lookups;

pub use compiler::{
    quote_ident, DatabaseBackendType, FromValue, OrderBy, Query, Row, SelectColumn, SqlCompiler,
    WhereNode,
};
pub use condition::Condition;
pub use lookups::{Lookup, Q, Subquery};
