//! # relorm-core
//!
//! Core types for the relorm object mapper: the error enum shared by every
//! crate, engine settings and their loader, logging setup, and identifier
//! helpers. This crate has no database dependency.
//!
//! ## Modules
//!
//! - [`error`] - Error types and result aliases
//! - [`settings`] - Engine settings
//! - [`settings_loader`] - TOML/JSON/env settings loading
//! - [`logging`] - Tracing-based logging integration
//! - [`utils`] - Identifier helpers (snake_case, pluralize)

pub mod error;
pub mod logging;
pub mod settings;
pub mod settings_loader;
pub mod utils;

// Re-export the most commonly used types at the crate root.
pub use error::{OrmError, OrmResult};
pub use settings::Settings;
