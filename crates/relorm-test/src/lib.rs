//! # relorm-test
//!
//! Testing utilities for relorm. Provides an in-memory SQLite
//! [`TestDatabase`] that logs and counts every statement, query-count
//! assertions for catching N+1 loading, thread-local settings overrides,
//! and a small car/owner/person fixture schema used by the integration
//! tests.

#![allow(clippy::result_large_err)]

pub mod assert_queries;
pub mod fixtures;
pub mod override_settings;
pub mod test_database;

pub use assert_queries::{assert_max_queries, assert_num_queries};
pub use override_settings::{current_settings, override_settings, SettingsOverride};
pub use test_database::TestDatabase;

/// Installs a test-friendly tracing subscriber once per process.
///
/// Output goes through the test harness writer so it is only shown for
/// failing tests. The filter comes from `RUST_LOG`, defaulting to `warn`.
pub fn init_test_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
