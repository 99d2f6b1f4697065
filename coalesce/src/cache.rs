//! Result caches that let a `Coalescer` answer repeated keys without queueing them.
//!
//! The coalescer only needs the [`ResultCache`] contract: a synchronous `get`
//! consulted before a key is queued, and a synchronous `set` called for every
//! value a successful batch produces. Eviction, expiry and capacity are
//! entirely the implementation's business.
//!
//! Both calls are made while the coalescer's registry lock is held, so an
//! implementation must not call back into the coalescer that owns it.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use ahash::{HashMap, HashMapExt};
use parking_lot::Mutex;

/// A key-to-value store consulted by the coalescer.
pub trait ResultCache<K, V>: Send + Sync {
  /// Looks up a previously stored value.
  fn get(&self, key: &K) -> Option<Arc<V>>;

  /// Stores a value produced by a batch.
  fn set(&self, key: K, value: Arc<V>);

  /// The number of entries currently held.
  fn len(&self) -> usize;

  fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// An unbounded, thread-safe map cache.
///
/// `MapCache` is a cheap handle: clones share the same storage. Keep a clone
/// around to inspect or evict entries while a coalescer owns another.
pub struct MapCache<K, V> {
  map: Arc<Mutex<HashMap<K, Arc<V>>>>,
}

impl<K, V> MapCache<K, V>
where
  K: Eq + Hash,
{
  pub fn new() -> Self {
    Self {
      map: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  /// Removes an entry, returning its value if it was present.
  ///
  /// The next request for `key` misses and is fetched again.
  pub fn remove(&self, key: &K) -> Option<Arc<V>> {
    self.map.lock().remove(key)
  }

  pub fn contains_key(&self, key: &K) -> bool {
    self.map.lock().contains_key(key)
  }

  pub fn clear(&self) {
    self.map.lock().clear();
  }
}

impl<K: Eq + Hash, V> Default for MapCache<K, V> {
  fn default() -> Self {
    Self::new()
  }
}

impl<K, V> Clone for MapCache<K, V> {
  fn clone(&self) -> Self {
    Self {
      map: Arc::clone(&self.map),
    }
  }
}

impl<K, V> fmt::Debug for MapCache<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MapCache")
      .field("len", &self.map.lock().len())
      .finish()
  }
}

impl<K, V> ResultCache<K, V> for MapCache<K, V>
where
  K: Eq + Hash + Send,
  V: Send + Sync,
{
  fn get(&self, key: &K) -> Option<Arc<V>> {
    self.map.lock().get(key).cloned()
  }

  fn set(&self, key: K, value: Arc<V>) {
    self.map.lock().insert(key, value);
  }

  fn len(&self) -> usize {
    self.map.lock().len()
  }
}

// Values are stored as `Arc<V>` so the coalescer and the fibre cache share
// one allocation per value. Every entry is inserted with a cost of 1, which
// makes the cache's current cost equal to its entry count.
#[cfg(feature = "fibre_cache")]
impl<K, V, H> ResultCache<K, V> for fibre_cache::Cache<K, Arc<V>, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: std::hash::BuildHasher + Clone + Send + Sync + 'static,
{
  fn get(&self, key: &K) -> Option<Arc<V>> {
    self.fetch(key).map(|stored| Arc::clone(&*stored))
  }

  fn set(&self, key: K, value: Arc<V>) {
    self.insert(key, value, 1);
  }

  fn len(&self) -> usize {
    self.metrics().current_cost as usize
  }
}
