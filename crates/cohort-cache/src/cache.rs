//! The keyed execution cache.

use std::any::{Any, type_name};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use cohort_config::{CacheConfig, EvictionStrategy};
use cohort_core::OnTerminal;
use tracing::debug;

use crate::error::CacheError;
use crate::key::CacheKey;

/// Values the cache can hold: cheap handles that report when they are done.
pub trait Cacheable: OnTerminal + Clone + Send + Sync + 'static {}

impl<V> Cacheable for V where V: OnTerminal + Clone + Send + Sync + 'static {}

struct Entry {
  /// Distinguishes successive values stored under the same key.
  generation: u64,
  value: Arc<dyn Any + Send + Sync>,
}

struct Inner {
  strategy: EvictionStrategy,
  entries: Mutex<HashMap<CacheKey, Entry>>,
  next_generation: AtomicU64,
}

impl Inner {
  fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, Entry>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Remove `key` only if it still holds the value from `generation`.
  fn evict(&self, key: CacheKey, generation: u64) {
    let mut entries = self.lock();
    if entries
      .get(&key)
      .is_some_and(|entry| entry.generation == generation)
    {
      entries.remove(&key);
      debug!(%key, generation, "cache entry evicted");
    }
  }
}

/// Deduplicates concurrent identical work by key.
///
/// The first request for a key builds the value with its factory and stores
/// it; every request after that gets the same value back until it is
/// evicted. With [`EvictionStrategy::RemoveOnTerminal`] a value is evicted as
/// soon as it finishes, fails or is cancelled, so the next request starts
/// fresh work.
///
/// Handles are cheap to clone and share one map. The map is dropped with
/// the last handle.
#[derive(Clone)]
pub struct KeyedCache {
  inner: Arc<Inner>,
}

impl KeyedCache {
  pub fn new() -> Self {
    Self::with_strategy(EvictionStrategy::default())
  }

  pub fn with_strategy(strategy: EvictionStrategy) -> Self {
    Self {
      inner: Arc::new(Inner {
        strategy,
        entries: Mutex::new(HashMap::new()),
        next_generation: AtomicU64::new(1),
      }),
    }
  }

  pub fn from_config(config: &CacheConfig) -> Self {
    Self::with_strategy(config.eviction)
  }

  pub fn strategy(&self) -> EvictionStrategy {
    self.inner.strategy
  }

  /// Return the value cached under `key`, or build, store and return a new
  /// one.
  ///
  /// `factory` runs under the cache lock and only when `key` is absent; it
  /// must not call back into this cache.
  pub fn retrieve_or_create<V, F>(&self, key: impl Into<CacheKey>, factory: F) -> Result<V, CacheError>
  where
    V: Cacheable,
    F: FnOnce() -> V,
  {
    let key = key.into();
    let (value, generation) = {
      let mut entries = self.inner.lock();
      if let Some(entry) = entries.get(&key) {
        debug!(%key, generation = entry.generation, "cache hit");
        return entry
          .value
          .downcast_ref::<V>()
          .cloned()
          .ok_or(CacheError::TypeMismatch {
            key,
            expected: type_name::<V>(),
          });
      }

      let value = factory();
      let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
      entries.insert(
        key,
        Entry {
          generation,
          value: Arc::new(value.clone()),
        },
      );
      debug!(%key, generation, "cache miss, entry created");
      (value, generation)
    };

    // Outside the lock: the value may already be terminal, in which case the
    // hook runs right here and needs the lock itself.
    if self.inner.strategy == EvictionStrategy::RemoveOnTerminal {
      let inner: Weak<Inner> = Arc::downgrade(&self.inner);
      value.on_terminal(Box::new(move || {
        if let Some(inner) = inner.upgrade() {
          inner.evict(key, generation);
        }
      }));
    }

    Ok(value)
  }

  /// Retrieve or create keyed by the caller's source location.
  #[track_caller]
  pub fn retrieve_or_create_here<V, F>(&self, factory: F) -> Result<V, CacheError>
  where
    V: Cacheable,
    F: FnOnce() -> V,
  {
    self.retrieve_or_create(CacheKey::caller(), factory)
  }

  /// Drop the entry for `key`. Returns whether there was one.
  pub fn remove(&self, key: impl Into<CacheKey>) -> bool {
    let key = key.into();
    let removed = self.inner.lock().remove(&key).is_some();
    if removed {
      debug!(%key, "cache entry removed");
    }
    removed
  }

  pub fn contains(&self, key: impl Into<CacheKey>) -> bool {
    self.inner.lock().contains_key(&key.into())
  }

  pub fn len(&self) -> usize {
    self.inner.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.inner.lock().is_empty()
  }

  pub fn clear(&self) {
    self.inner.lock().clear();
  }
}

impl Default for KeyedCache {
  fn default() -> Self {
    Self::new()
  }
}

impl std::fmt::Debug for KeyedCache {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("KeyedCache")
      .field("strategy", &self.inner.strategy)
      .field("entries", &self.len())
      .finish()
  }
}
