//! Utility functions for relorm.
//!
//! - [`text`]: identifier casing and pluralization.

pub mod text;
