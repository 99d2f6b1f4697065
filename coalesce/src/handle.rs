use crate::builder::CoalescerBuilder;
use crate::cache::ResultCache;
use crate::deferred::{deferred, Pending};
use crate::error::RequestError;
use crate::registry::Continuation;
use crate::shared::{CoalescerShared, FlushCause};
use crate::task::debounce::Debouncer;
use crate::MetricsSnapshot;

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

/// Merges concurrent single-key requests into batched calls.
///
/// Each request registers a waiter for its key. Waiters for the same key share
/// a single slot in the next batch. The batch is sent to the batch function once
/// no new request has arrived for the debounce window, or as soon as it holds
/// `max_batch_size` distinct keys, whichever comes first. With a result cache
/// configured, cached keys are answered immediately and every successful
/// batch writes its values through to the cache.
///
/// Dropping the coalescer stops its debounce thread and flushes any keys that
/// are still registered, so outstanding requests are not stranded.
pub struct Coalescer<K, V, E>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  E: Send + Sync + 'static,
{
  pub(crate) shared: Arc<CoalescerShared<K, V, E>>,
  pub(crate) _debouncer: Debouncer,
}

impl<K, V, E> Coalescer<K, V, E>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  E: Send + Sync + 'static,
{
  /// Returns a builder with default settings.
  pub fn builder() -> CoalescerBuilder<K, V, E> {
    CoalescerBuilder::new()
  }

  /// Requests the value for `key`.
  ///
  /// The returned handle settles with the value the batch function produced
  /// for `key`, or with the failure of the batch `key` was part of. On a cache
  /// hit it is already settled when this returns.
  pub fn request(&self, key: K) -> Pending<V, E> {
    let (resolver, pending) = deferred();
    self.shared.enqueue(key, Continuation::Deferred(resolver));
    pending
  }

  /// Requests the value for `key`, reporting the outcome through callbacks.
  ///
  /// Exactly one of the two callbacks is called. On a cache hit `on_success`
  /// runs before this returns; otherwise it runs on the thread or task that
  /// completes the batch. If the batch is torn down without completing,
  /// `on_error` receives `RequestError::Abandoned`.
  pub fn request_with_callback<S, F>(&self, key: K, on_success: S, on_error: F)
  where
    S: FnOnce(Arc<V>) + Send + 'static,
    F: FnOnce(RequestError<E>) + Send + 'static,
  {
    self.shared.enqueue(
      key,
      Continuation::callback(Box::new(on_success), Box::new(on_error)),
    );
  }

  /// Sends every currently registered key to the batch function now,
  /// without waiting for the debounce window.
  pub fn flush(&self) {
    self.shared.flush(FlushCause::Manual);
  }

  /// The number of distinct keys waiting for the next flush.
  pub fn pending_keys(&self) -> usize {
    self.shared.queue.lock().registry.len()
  }

  /// The configured debounce window.
  pub fn debounce(&self) -> Duration {
    self.shared.debounce
  }

  /// The configured maximum number of distinct keys per batch.
  pub fn max_batch_size(&self) -> usize {
    self.shared.max_batch_size
  }

  /// The result cache this coalescer reads from and writes to, if any.
  pub fn cache(&self) -> Option<&dyn ResultCache<K, V>> {
    self.shared.cache.as_deref()
  }

  /// Returns a point-in-time snapshot of the coalescer's counters.
  pub fn metrics(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot()
  }
}

impl<K, V, E> Drop for Coalescer<K, V, E>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  E: Send + Sync + 'static,
{
  fn drop(&mut self) {
    self.shared.shutdown();
  }
}

impl<K, V, E> fmt::Debug for Coalescer<K, V, E>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  E: Send + Sync + 'static,
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Coalescer")
      .field("shared", &self.shared)
      .finish()
  }
}
