//! The engine registry.
//!
//! [`Orm`] owns everything shared between operations: settings, the query
//! builder collaborator, the descriptor cache, and the loading strategies.
//! Tests construct a fresh `Orm` each; nothing is process-global.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use relorm_core::{OrmError, OrmResult, Settings};

use crate::cache::{Cache, InMemoryCache};
use crate::executor::DbExecutor;
use crate::instance::Instance;
use crate::introspect::{cached, Introspector};
use crate::loader::eager::EagerLoader;
use crate::loader::LoadingStrategy;
use crate::model::{Entity, EntityType, ModelDescriptor};
use crate::transactions::Transaction;

/// The mapper engine.
///
/// # Examples
///
/// ```ignore
/// let orm = Orm::new(Settings::default()).with_executor(Arc::new(backend));
/// let mut car = orm.model::<Car>()?;
/// car.first(Condition::new().eq("id", 1))?;
/// ```
pub struct Orm {
    settings: Settings,
    executor: Option<Arc<dyn DbExecutor>>,
    cache: RwLock<Arc<dyn Cache>>,
    initialized: AtomicBool,
    strategies: RwLock<HashMap<String, Arc<dyn LoadingStrategy>>>,
    build_lock: Mutex<()>,
}

impl Orm {
    /// Creates an engine with the in-memory descriptor cache and the
    /// `eager` strategy registered.
    pub fn new(settings: Settings) -> Self {
        let mut strategies: HashMap<String, Arc<dyn LoadingStrategy>> = HashMap::new();
        strategies.insert("eager".to_string(), Arc::new(EagerLoader));
        Self {
            settings,
            executor: None,
            cache: RwLock::new(Arc::new(InMemoryCache::new())),
            initialized: AtomicBool::new(false),
            strategies: RwLock::new(strategies),
            build_lock: Mutex::new(()),
        }
    }

    /// Sets the query builder collaborator.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn DbExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// The engine settings.
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The query builder collaborator.
    pub fn executor(&self) -> OrmResult<&Arc<dyn DbExecutor>> {
        self.executor.as_ref().ok_or(OrmError::NoBuilder)
    }

    /// Replaces the descriptor cache.
    ///
    /// Only allowed before the first descriptor is built.
    pub fn set_cache(&self, cache: Arc<dyn Cache>) -> OrmResult<()> {
        let _guard = self.build_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.initialized.load(Ordering::Acquire) {
            return Err(OrmError::SetCacheAfterInit);
        }
        *self.cache.write().unwrap_or_else(PoisonError::into_inner) = cache;
        Ok(())
    }

    fn cache(&self) -> Arc<dyn Cache> {
        Arc::clone(&self.cache.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Registers a loading strategy under `name`, replacing any previous one.
    pub fn register_strategy(&self, name: impl Into<String>, strategy: Arc<dyn LoadingStrategy>) {
        let name = name.into();
        tracing::debug!(strategy = %name, "loading strategy registered");
        self.strategies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, strategy);
    }

    /// Looks up a registered strategy.
    pub fn strategy(&self, name: &str) -> OrmResult<Arc<dyn LoadingStrategy>> {
        self.strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| OrmError::ConfigurationError(format!("unknown loading strategy '{name}'")))
    }

    /// Returns the descriptor of `T`, building it on first use.
    pub fn descriptor<T: Entity>(&self) -> OrmResult<Arc<ModelDescriptor>> {
        self.descriptor_of(EntityType::of::<T>())
    }

    /// Returns the descriptor of an entity type, building it on first use.
    pub fn descriptor_of(&self, entity: EntityType) -> OrmResult<Arc<ModelDescriptor>> {
        let cache = self.cache();
        if let Some(desc) = cached(cache.as_ref(), entity)? {
            return Ok(desc);
        }
        let _guard = self.build_lock.lock().unwrap_or_else(PoisonError::into_inner);
        // Another thread may have built it while we waited.
        if let Some(desc) = cached(cache.as_ref(), entity)? {
            return Ok(desc);
        }
        let db = self.executor()?;
        let desc = Introspector::new(&self.settings, db.as_ref(), cache.as_ref()).build(entity)?;
        self.initialized.store(true, Ordering::Release);
        Ok(desc)
    }

    /// Returns an already built descriptor without building it.
    pub fn cached_descriptor(&self, entity: EntityType) -> OrmResult<Arc<ModelDescriptor>> {
        cached(self.cache().as_ref(), entity)?
            .ok_or_else(|| OrmError::NotInitialized(entity.name().to_string()))
    }

    /// Creates an instance of `T` with an empty root entity.
    pub fn model<T: Entity>(&self) -> OrmResult<Instance<'_>> {
        self.model_of(EntityType::of::<T>())
    }

    /// Creates an instance of an entity type with an empty root entity.
    pub fn model_of(&self, entity: EntityType) -> OrmResult<Instance<'_>> {
        let desc = self.descriptor_of(entity)?;
        Ok(Instance::new(self, desc))
    }

    /// Begins a caller-owned transaction.
    pub fn begin(&self) -> OrmResult<Transaction> {
        Transaction::begin(Arc::clone(self.executor()?))
    }

    /// Commits a caller-owned transaction.
    pub fn commit(&self, tx: Transaction) -> OrmResult<()> {
        tx.commit()
    }

    /// Rolls back a caller-owned transaction.
    pub fn rollback(&self, tx: Transaction) -> OrmResult<()> {
        tx.rollback()
    }
}

impl fmt::Debug for Orm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let strategies: Vec<String> = self
            .strategies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        f.debug_struct("Orm")
            .field("settings", &self.settings)
            .field("has_executor", &self.executor.is_some())
            .field("initialized", &self.initialized.load(Ordering::Relaxed))
            .field("strategies", &strategies)
            .finish_non_exhaustive()
    }
}
