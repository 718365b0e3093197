//! Field descriptors and column type classification.
//!
//! This module provides the [`Field`] struct, its [`Permission`], and the
//! [`SqlKind`] derived from a column's declared type.

pub mod types;

pub use types::{Field, Permission, SqlKind};
