//! The descriptor cache.
//!
//! Built descriptors are stored through the [`Cache`] trait, keyed by the
//! entity's namespaced type name. [`InMemoryCache`] is the default backend:
//! a `RwLock<HashMap>` with optional per-entry TTL. Any other store can be
//! plugged in with [`Orm::set_cache`](crate::registry::Orm::set_cache)
//! before the first descriptor is built.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use relorm_core::OrmResult;

/// A cached value.
pub type CacheValue = Arc<dyn Any + Send + Sync>;

/// A key/value store with expiry.
pub trait Cache: Send + Sync {
    /// Stores a value; `None` TTL means it never expires.
    fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> OrmResult<()>;

    /// Returns the value if present and not expired.
    fn get(&self, key: &str) -> OrmResult<Option<CacheValue>>;

    /// Returns `true` if the key is present and not expired.
    fn exist(&self, key: &str) -> OrmResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}

struct CacheEntry {
    value: CacheValue,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Instant::now() > exp)
    }
}

/// A thread-safe in-memory cache with TTL support.
///
/// Expired entries are dropped on the next write to the same key.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use relorm_db::cache::{Cache, InMemoryCache};
///
/// let cache = InMemoryCache::new();
/// cache.set("answer", Arc::new(42_u32), None).unwrap();
/// let v = cache.get("answer").unwrap().unwrap();
/// assert_eq!(v.downcast_ref::<u32>(), Some(&42));
/// assert!(!cache.exist("missing").unwrap());
/// ```
#[derive(Default)]
pub struct InMemoryCache {
    store: RwLock<HashMap<String, CacheEntry>>,
}

impl InMemoryCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        store.values().filter(|e| !e.is_expired()).count()
    }

    /// Returns `true` when no live entry remains.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Cache for InMemoryCache {
    fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>) -> OrmResult<()> {
        let mut store = self.store.write().unwrap_or_else(PoisonError::into_inner);
        let expires_at = ttl.map(|d| Instant::now() + d);
        store.insert(key.to_string(), CacheEntry { value, expires_at });
        Ok(())
    }

    fn get(&self, key: &str) -> OrmResult<Option<CacheValue>> {
        let store = self.store.read().unwrap_or_else(PoisonError::into_inner);
        Ok(match store.get(key) {
            Some(entry) if !entry.is_expired() => Some(Arc::clone(&entry.value)),
            _ => None,
        })
    }
}

impl std::fmt::Debug for InMemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCache")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get() {
        let cache = InMemoryCache::new();
        cache.set("k", Arc::new("v".to_string()), None).unwrap();
        let v = cache.get("k").unwrap().unwrap();
        assert_eq!(v.downcast_ref::<String>().map(String::as_str), Some("v"));
        assert!(cache.exist("k").unwrap());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_missing() {
        let cache = InMemoryCache::new();
        assert!(cache.get("nope").unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = InMemoryCache::new();
        cache
            .set("k", Arc::new(1_i32), Some(Duration::from_millis(1)))
            .unwrap();
        std::thread::sleep(Duration::from_millis(10));
        assert!(!cache.exist("k").unwrap());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_overwrite() {
        let cache = InMemoryCache::new();
        cache.set("k", Arc::new(1_i32), None).unwrap();
        cache.set("k", Arc::new(2_i32), None).unwrap();
        let v = cache.get("k").unwrap().unwrap();
        assert_eq!(v.downcast_ref::<i32>(), Some(&2));
    }
}
