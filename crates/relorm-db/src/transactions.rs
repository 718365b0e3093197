//! Transaction support.
//!
//! [`Transaction`] is a caller-owned handle: the mapper never commits or
//! rolls it back. [`atomic`] wraps one top-level write in an engine-owned
//! transaction that commits on success and rolls back on any error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use relorm_core::OrmResult;

use crate::executor::DbExecutor;

/// A caller-owned transaction.
///
/// Dropping an open transaction rolls it back.
pub struct Transaction {
    db: Arc<dyn DbExecutor>,
    open: AtomicBool,
}

impl Transaction {
    /// Begins a transaction on the executor.
    pub fn begin(db: Arc<dyn DbExecutor>) -> OrmResult<Self> {
        db.begin()?;
        tracing::debug!("transaction opened");
        Ok(Self {
            db,
            open: AtomicBool::new(true),
        })
    }

    /// Returns `true` until the transaction is committed or rolled back.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Commits the transaction.
    pub fn commit(self) -> OrmResult<()> {
        self.open.store(false, Ordering::Release);
        self.db.commit()?;
        tracing::debug!("transaction committed");
        Ok(())
    }

    /// Rolls the transaction back.
    pub fn rollback(self) -> OrmResult<()> {
        self.open.store(false, Ordering::Release);
        self.db.rollback()?;
        tracing::debug!("transaction rolled back");
        Ok(())
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.open.swap(false, Ordering::AcqRel) {
            tracing::warn!("open transaction dropped; rolling back");
            if let Err(e) = self.db.rollback() {
                tracing::warn!(error = %e, "rollback of dropped transaction failed");
            }
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

/// Runs `f` inside a transaction.
///
/// When `external` is `true` the caller owns an already-open transaction and
/// `f` runs as-is. Otherwise a transaction is opened, committed when `f`
/// succeeds, and rolled back when it fails; the error from `f` is returned.
pub fn atomic<T>(
    db: &dyn DbExecutor,
    external: bool,
    f: impl FnOnce() -> OrmResult<T>,
) -> OrmResult<T> {
    if external {
        return f();
    }
    db.begin()?;
    match f() {
        Ok(v) => {
            db.commit()?;
            Ok(v)
        }
        Err(e) => {
            if let Err(rb) = db.rollback() {
                tracing::warn!(error = %rb, "rollback failed");
            }
            Err(e)
        }
    }
}
