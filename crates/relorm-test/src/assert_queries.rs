//! Query counting assertions for database tests.
//!
//! [`assert_num_queries`] counts the statements a closure sends to a
//! [`TestDatabase`] and asserts the count matches. Eager loading batches
//! one query per relation level, so these catch N+1 regressions.
//!
//! ## Example
//!
//! ```rust
//! use relorm_db::value::Value;
//! use relorm_db::DbExecutor;
//! use relorm_test::assert_queries::assert_num_queries;
//! use relorm_test::test_database::TestDatabase;
//!
//! let db = TestDatabase::with_schema("CREATE TABLE t (id INTEGER PRIMARY KEY, val TEXT)");
//! assert_num_queries(&db, 1, || {
//!     db.execute_sql("INSERT INTO t (val) VALUES (?)", &[Value::from("x")])
//!         .unwrap();
//! });
//! ```

use crate::test_database::TestDatabase;

/// Asserts that exactly `expected_count` statements are executed during the
/// closure, and returns the closure's result.
///
/// Resets the counter and the statement log on the [`TestDatabase`] first.
///
/// # Panics
///
/// Panics if the number of statements does not match `expected_count`. The
/// message lists the statements that ran.
pub fn assert_num_queries<F, R>(db: &TestDatabase, expected_count: usize, f: F) -> R
where
    F: FnOnce() -> R,
{
    db.reset_query_count();
    let result = f();
    let actual = db.query_count();
    assert_eq!(
        actual,
        expected_count,
        "Expected {expected_count} SQL queries, but {actual} were executed: {:#?}",
        db.statements()
    );
    result
}

/// Asserts that at most `max_count` statements are executed during the
/// closure, and returns the closure's result.
///
/// # Panics
///
/// Panics if more than `max_count` statements are executed.
pub fn assert_max_queries<F, R>(db: &TestDatabase, max_count: usize, f: F) -> R
where
    F: FnOnce() -> R,
{
    db.reset_query_count();
    let result = f();
    let actual = db.query_count();
    assert!(
        actual <= max_count,
        "Expected at most {max_count} SQL queries, but {actual} were executed: {:#?}",
        db.statements()
    );
    result
}

#[cfg(test)]
mod tests {
    use relorm_db::value::Value;
    use relorm_db::DbExecutor;

    use super::*;

    fn db() -> TestDatabase {
        TestDatabase::with_schema("CREATE TABLE nq (id INTEGER PRIMARY KEY, val TEXT)")
    }

    fn insert(db: &TestDatabase, val: &str) {
        db.execute_sql("INSERT INTO nq (val) VALUES (?)", &[Value::from(val)])
            .unwrap();
    }

    #[test]
    fn test_assert_num_queries_passes() {
        let db = db();
        assert_num_queries(&db, 2, || {
            insert(&db, "a");
            insert(&db, "b");
        });
    }

    #[test]
    fn test_assert_num_queries_zero() {
        let db = db();
        assert_num_queries(&db, 0, || {});
    }

    #[test]
    fn test_assert_num_queries_returns_result() {
        let db = db();
        insert(&db, "a");
        let rows = assert_num_queries(&db, 1, || db.query("SELECT val FROM nq", &[]).unwrap());
        assert_eq!(rows.len(), 1);
    }

    #[test]
    #[should_panic(expected = "Expected 1 SQL queries, but 2 were executed")]
    fn test_assert_num_queries_fails_too_many() {
        let db = db();
        assert_num_queries(&db, 1, || {
            insert(&db, "a");
            insert(&db, "b");
        });
    }

    #[test]
    #[should_panic(expected = "Expected 3 SQL queries, but 1 were executed")]
    fn test_assert_num_queries_fails_too_few() {
        let db = db();
        assert_num_queries(&db, 3, || insert(&db, "a"));
    }

    #[test]
    fn test_assert_max_queries_passes() {
        let db = db();
        assert_max_queries(&db, 3, || insert(&db, "a"));
    }

    #[test]
    #[should_panic(expected = "Expected at most 1 SQL queries, but 2 were executed")]
    fn test_assert_max_queries_fails() {
        let db = db();
        assert_max_queries(&db, 1, || {
            insert(&db, "a");
            insert(&db, "b");
        });
    }

    #[test]
    fn test_counter_resets_between_assertions() {
        let db = db();
        assert_num_queries(&db, 1, || insert(&db, "a"));
        assert_num_queries(&db, 1, || {
            db.query("SELECT * FROM nq", &[]).unwrap();
        });
    }
}
