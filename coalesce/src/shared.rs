use crate::batch::Executor;
use crate::cache::ResultCache;
use crate::error::{panic_message, RequestError};
use crate::metrics::Metrics;
use crate::registry::{Batch, Continuation, Registration, Registry};

use std::fmt;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

/// Why a batch left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlushCause {
  /// The debounce deadline passed without new requests.
  Timer,
  /// The registry reached the maximum batch size.
  Threshold,
  /// `Coalescer::flush` was called.
  Manual,
  /// The coalescer was dropped with keys still registered.
  Shutdown,
}

/// Everything the registry lock protects.
///
/// The debounce deadline lives next to the registry so that arming,
/// cancelling and draining are a single serialized step.
pub(crate) struct Queue<K, V, E> {
  pub(crate) registry: Registry<K, V, E>,
  /// When the timer thread should flush. `None` means disarmed.
  pub(crate) deadline: Option<Instant>,
  pub(crate) shutdown: bool,
}

/// The internal, thread-safe core of the coalescer.
pub(crate) struct CoalescerShared<K, V, E> {
  pub(crate) queue: Mutex<Queue<K, V, E>>,
  /// Signalled when the deadline is armed from a disarmed state, or on shutdown.
  pub(crate) timer_signal: Condvar,
  pub(crate) debounce: Duration,
  pub(crate) max_batch_size: usize,
  pub(crate) executor: Executor<K, V, E>,
  pub(crate) cache: Option<Arc<dyn ResultCache<K, V>>>,
  pub(crate) metrics: Metrics,
}

impl<K, V, E> fmt::Debug for CoalescerShared<K, V, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CoalescerShared")
      .field("debounce", &self.debounce)
      .field("max_batch_size", &self.max_batch_size)
      .field("cached", &self.cache.is_some())
      .field("metrics", &self.metrics.snapshot())
      .finish_non_exhaustive()
  }
}

impl<K, V, E> CoalescerShared<K, V, E>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  E: Send + Sync + 'static,
{
  pub(crate) fn new(
    debounce: Duration,
    max_batch_size: usize,
    executor: Executor<K, V, E>,
    cache: Option<Arc<dyn ResultCache<K, V>>>,
  ) -> Self {
    Self {
      queue: Mutex::new(Queue {
        registry: Registry::new(),
        deadline: None,
        shutdown: false,
      }),
      timer_signal: Condvar::new(),
      debounce,
      max_batch_size,
      executor,
      cache,
      metrics: Metrics::new(),
    }
  }

  /// Registers a waiter for `key`, answering from the cache when possible.
  ///
  /// Reaching the maximum batch size drains the registry before this returns;
  /// otherwise the debounce deadline is pushed back to `now + debounce`.
  pub(crate) fn enqueue(self: &Arc<Self>, key: K, waiter: Continuation<V, E>) {
    self.metrics.requests.fetch_add(1, Ordering::Relaxed);

    let mut queue = self.queue.lock();

    if let Some(cache) = &self.cache {
      if let Some(value) = cache.get(&key) {
        drop(queue);
        self.metrics.cache_hits.fetch_add(1, Ordering::Relaxed);
        trace!("request answered from cache");
        waiter.succeed(value);
        return;
      }
    }

    if queue.registry.register(key, waiter) == Registration::Joined {
      self.metrics.coalesced.fetch_add(1, Ordering::Relaxed);
      trace!("request joined a pending key");
    }

    if queue.registry.len() >= self.max_batch_size {
      let batch = Self::take_batch(&mut queue);
      drop(queue);
      Self::dispatch(Arc::clone(self), batch, FlushCause::Threshold);
      return;
    }

    // A debounce too large to represent as an instant never fires; such a
    // registry is only flushed by the threshold, `flush` or drop.
    let Some(deadline) = Instant::now().checked_add(self.debounce) else {
      return;
    };
    let was_armed = queue.deadline.is_some();
    queue.deadline = Some(deadline);
    // An armed timer thread wakes at the old deadline and re-waits on the new
    // one, so only a disarmed (indefinitely waiting) thread needs a signal.
    if !was_armed {
      self.timer_signal.notify_one();
    }
  }

  /// Disarms the deadline and takes the whole registry.
  pub(crate) fn take_batch(queue: &mut Queue<K, V, E>) -> Batch<K, V, E> {
    queue.deadline = None;
    queue.registry.drain()
  }

  /// Flushes whatever is registered right now. A no-op on an empty registry.
  pub(crate) fn flush(self: &Arc<Self>, cause: FlushCause) {
    let batch = Self::take_batch(&mut self.queue.lock());
    Self::dispatch(Arc::clone(self), batch, cause);
  }

  /// Stops the timer thread and flushes the remaining registry.
  pub(crate) fn shutdown(self: &Arc<Self>) {
    let batch = {
      let mut queue = self.queue.lock();
      queue.shutdown = true;
      Self::take_batch(&mut queue)
    };
    self.timer_signal.notify_one();
    Self::dispatch(Arc::clone(self), batch, FlushCause::Shutdown);
  }

  /// Hands a drained batch to the batch function without blocking the caller.
  pub(crate) fn dispatch(shared: Arc<Self>, batch: Batch<K, V, E>, cause: FlushCause) {
    if batch.is_empty() {
      return;
    }

    shared.metrics.record_batch(batch.len());
    if cause == FlushCause::Timer {
      shared.metrics.timer_flushes.fetch_add(1, Ordering::Relaxed);
    } else if cause == FlushCause::Threshold {
      shared.metrics.forced_flushes.fetch_add(1, Ordering::Relaxed);
    }
    debug!(
      keys = batch.len(),
      waiters = batch.waiter_count(),
      cause = ?cause,
      "flushing batch"
    );

    let keys = batch.keys();
    match &shared.executor {
      Executor::Thread(batch_fn) => {
        let batch_fn = Arc::clone(batch_fn);
        let task_shared = Arc::clone(&shared);
        thread::spawn(move || {
          let outcome = panic::catch_unwind(AssertUnwindSafe(|| batch_fn(keys)));
          task_shared.complete(batch, outcome);
        });
      }
      Executor::Spawned { batch_fn, spawner } => {
        // The synchronous part of an async batch function runs here; a panic
        // in it fails the batch the same way a panic in the future does.
        let future = match panic::catch_unwind(AssertUnwindSafe(|| batch_fn(keys))) {
          Ok(future) => future,
          Err(payload) => {
            shared.complete(batch, Err(payload));
            return;
          }
        };
        let task_shared = Arc::clone(&shared);
        spawner.spawn(Box::pin(async move {
          let outcome = AssertUnwindSafe(future).catch_unwind().await;
          task_shared.complete(batch, outcome);
        }));
      }
    }
  }

  /// Fans a batch outcome out to every waiter, writing successes to the cache.
  pub(crate) fn complete(&self, batch: Batch<K, V, E>, outcome: thread::Result<Result<Vec<V>, E>>) {
    let expected = batch.len();
    let values = match outcome {
      Ok(Ok(values)) if values.len() == expected => values,
      Ok(Ok(values)) => {
        warn!(
          expected,
          actual = values.len(),
          "batch function returned a mismatched number of values"
        );
        self.metrics.batch_failures.fetch_add(1, Ordering::Relaxed);
        batch.fail_all(RequestError::LengthMismatch {
          expected,
          actual: values.len(),
        });
        return;
      }
      Ok(Err(err)) => {
        warn!(keys = expected, "batch function failed");
        self.metrics.batch_failures.fetch_add(1, Ordering::Relaxed);
        batch.fail_all(RequestError::Batch(Arc::new(err)));
        return;
      }
      Err(payload) => {
        let message = panic_message(payload);
        warn!(keys = expected, panic = %message, "batch function panicked");
        self.metrics.batch_failures.fetch_add(1, Ordering::Relaxed);
        batch.fail_all(RequestError::Panicked(message));
        return;
      }
    };

    let resolved: Vec<_> = batch
      .into_entries()
      .into_iter()
      .zip(values)
      .map(|(entry, value)| (entry, Arc::new(value)))
      .collect();

    // Write-through happens under the registry lock, so a request for one of
    // these keys either joins the next batch before any write or sees them all.
    if let Some(cache) = &self.cache {
      let _queue = self.queue.lock();
      for (entry, value) in &resolved {
        cache.set(entry.key.clone(), Arc::clone(value));
      }
    }

    for (entry, value) in resolved {
      for waiter in entry.waiters {
        waiter.succeed(Arc::clone(&value));
      }
    }
    debug!(keys = expected, "batch resolved");
  }
}
