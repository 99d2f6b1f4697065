use crate::batch::{BatchFn, BatchFuture, Executor};
use crate::cache::{MapCache, ResultCache};
use crate::error::BuildError;
use crate::handle::Coalescer;
use crate::shared::CoalescerShared;
use crate::task::debounce::Debouncer;
use crate::TaskSpawner;

use core::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

/// The debounce window used when none is configured.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(10);

/// The maximum batch size used when none is configured.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 1000;

type CacheFactory<K, V> = Box<dyn FnOnce() -> Arc<dyn ResultCache<K, V>>>;

/// A builder for creating `Coalescer` instances.
pub struct CoalescerBuilder<K, V, E> {
  debounce: Duration,
  max_batch_size: usize,
  batch_fn: Option<BatchFn<K, V, E>>,
  cache_factory: Option<CacheFactory<K, V>>,
  spawner: Option<Arc<dyn TaskSpawner>>,
}

// Manual Debug implementation for CoalescerBuilder.
impl<K, V, E> fmt::Debug for CoalescerBuilder<K, V, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CoalescerBuilder")
      .field("debounce", &self.debounce)
      .field("max_batch_size", &self.max_batch_size)
      .field("has_batch_fn", &self.batch_fn.is_some())
      .field("has_cache", &self.cache_factory.is_some())
      .field("has_spawner", &self.spawner.is_some())
      .finish()
  }
}

impl<K, V, E> CoalescerBuilder<K, V, E> {
  /// Creates a new `CoalescerBuilder` with default settings and no batch function.
  pub fn new() -> Self {
    Self {
      debounce: DEFAULT_DEBOUNCE,
      max_batch_size: DEFAULT_MAX_BATCH_SIZE,
      batch_fn: None,
      cache_factory: None,
      spawner: None,
    }
  }

  /// Sets how long the registry must stay quiet before it is flushed.
  ///
  /// Every new request pushes the deadline back by this amount.
  pub fn debounce(mut self, debounce: Duration) -> Self {
    self.debounce = debounce;
    self
  }

  /// Sets the maximum number of distinct keys per batch.
  ///
  /// Registering the key that reaches this count flushes immediately,
  /// without waiting for the debounce window.
  pub fn max_batch_size(mut self, max_batch_size: usize) -> Self {
    self.max_batch_size = max_batch_size;
    self
  }

  /// Sets a synchronous batch function.
  ///
  /// It receives the keys of one batch and must return exactly one value per
  /// key, in the same order. Each call runs on its own thread.
  pub fn batch_fn<F>(mut self, f: F) -> Self
  where
    F: Fn(Vec<K>) -> Result<Vec<V>, E> + Send + Sync + 'static,
  {
    self.batch_fn = Some(BatchFn::Sync(Arc::new(f)));
    self
  }

  /// Sets an asynchronous batch function.
  ///
  /// The returned future is driven by the configured `TaskSpawner`, or by the
  /// current Tokio runtime when the `tokio` feature is enabled.
  pub fn async_batch_fn<F, Fut>(mut self, f: F) -> Self
  where
    F: Fn(Vec<K>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<V>, E>> + Send + 'static,
  {
    let batch_fn = move |keys: Vec<K>| Box::pin(f(keys)) as BatchFuture<V, E>;
    self.batch_fn = Some(BatchFn::Async(Arc::new(batch_fn)));
    self
  }

  /// Enables result caching with a cache produced by `factory`.
  ///
  /// The factory is called once, by `build`. Cached keys are answered
  /// immediately and never reach the batch function.
  pub fn cache_factory<C, F>(mut self, factory: F) -> Self
  where
    C: ResultCache<K, V> + 'static,
    F: FnOnce() -> C + 'static,
  {
    self.cache_factory = Some(Box::new(move || Arc::new(factory()) as Arc<dyn ResultCache<K, V>>));
    self
  }

  /// Sets the runtime that drives asynchronous batch functions.
  pub fn spawner(mut self, spawner: Arc<dyn TaskSpawner>) -> Self {
    self.spawner = Some(spawner);
    self
  }
}

impl<K, V, E> Default for CoalescerBuilder<K, V, E> {
  fn default() -> Self {
    Self::new()
  }
}

// --- Build Methods ---
impl<K, V, E> CoalescerBuilder<K, V, E>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  E: Send + Sync + 'static,
{
  /// Enables result caching with a fresh, unbounded `MapCache`.
  pub fn map_cache(self) -> Self {
    self.cache_factory(MapCache::<K, V>::new)
  }

  /// Builds the `Coalescer` and starts its debounce thread.
  pub fn build(mut self) -> Result<Coalescer<K, V, E>, BuildError> {
    self.validate()?;
    let executor = self.build_executor()?;
    let cache = self.cache_factory.take().map(|factory| factory());

    debug!(
      debounce = ?self.debounce,
      max_batch_size = self.max_batch_size,
      cached = cache.is_some(),
      "building coalescer"
    );

    let shared = Arc::new(CoalescerShared::new(
      self.debounce,
      self.max_batch_size,
      executor,
      cache,
    ));
    let debouncer = Debouncer::spawn(Arc::clone(&shared)).map_err(BuildError::TimerThread)?;

    Ok(Coalescer {
      shared,
      _debouncer: debouncer,
    })
  }

  fn build_executor(&mut self) -> Result<Executor<K, V, E>, BuildError> {
    match self.batch_fn.take() {
      Some(BatchFn::Sync(batch_fn)) => Ok(Executor::Thread(batch_fn)),
      Some(BatchFn::Async(batch_fn)) => {
        let spawner = match self.spawner.take() {
          Some(spawner) => spawner,
          None => default_spawner().ok_or(BuildError::SpawnerRequired)?,
        };
        Ok(Executor::Spawned { batch_fn, spawner })
      }
      None => Err(BuildError::MissingBatchFn),
    }
  }

  /// Validates the builder configuration.
  pub(crate) fn validate(&self) -> Result<(), BuildError> {
    if self.max_batch_size == 0 {
      return Err(BuildError::ZeroBatchSize);
    }
    if self.batch_fn.is_none() {
      return Err(BuildError::MissingBatchFn);
    }
    Ok(())
  }
}

#[cfg(feature = "tokio")]
fn default_spawner() -> Option<Arc<dyn TaskSpawner>> {
  crate::runtime::TokioSpawner::try_current().map(|spawner| Arc::new(spawner) as Arc<dyn TaskSpawner>)
}

#[cfg(not(feature = "tokio"))]
fn default_spawner() -> Option<Arc<dyn TaskSpawner>> {
  None
}
