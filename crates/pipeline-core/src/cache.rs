//! Process-scoped model cache
//!
//! Processors load models and other expensive resources through this cache,
//! keyed by their class ref. The first request initializes the entry; every
//! later request in the same process shares it. Entries are never replaced.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::info;

type Entry = Arc<dyn Any + Send + Sync>;

/// Thread-safe cache of shared, read-only resources
#[derive(Clone, Default)]
pub struct ModelCache {
    entries: Arc<Mutex<HashMap<(String, TypeId), Entry>>>,
}

impl ModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the value cached under `key`, initializing it on first use
    ///
    /// A failed initialization caches nothing, so the next call retries.
    pub fn get_or_try_init<T, E, F>(&self, key: &str, init: F) -> Result<Arc<T>, E>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Result<T, E>,
    {
        let slot = (key.to_string(), TypeId::of::<T>());
        if let Some(existing) = self.lock().get(&slot).cloned() {
            if let Ok(value) = existing.downcast::<T>() {
                return Ok(value);
            }
        }

        let value = Arc::new(init()?);
        info!("Initialized cached model for {}", key);
        let mut entries = self.lock();
        // Another caller may have raced us; keep whichever landed first
        let entry = entries
            .entry(slot)
            .or_insert_with(|| Arc::clone(&value) as Entry);
        Ok(Arc::clone(entry).downcast::<T>().unwrap_or(value))
    }

    /// Get a cached value without initializing it
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let slot = (key.to_string(), TypeId::of::<T>());
        let entry = self.lock().get(&slot).cloned()?;
        entry.downcast::<T>().ok()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(String, TypeId), Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCache")
            .field("entries", &self.len())
            .finish()
    }
}
