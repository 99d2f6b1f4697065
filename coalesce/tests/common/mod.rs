#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use fibre_coalesce::{Coalescer, CoalescerBuilder, MapCache};
use parking_lot::Mutex;

/// Records the keys of every batch the batch function receives.
#[derive(Default)]
pub struct BatchLog {
  batches: Mutex<Vec<Vec<u64>>>,
}

impl BatchLog {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn record(&self, keys: &[u64]) {
    self.batches.lock().push(keys.to_vec());
  }

  /// The number of times the batch function was called.
  pub fn calls(&self) -> usize {
    self.batches.lock().len()
  }

  /// The size of every batch, in call order.
  pub fn sizes(&self) -> Vec<usize> {
    self.batches.lock().iter().map(Vec::len).collect()
  }

  pub fn batches(&self) -> Vec<Vec<u64>> {
    self.batches.lock().clone()
  }
}

/// A builder whose async batch function answers `key + 1` after `delay`.
pub fn plus_one_async(
  log: &Arc<BatchLog>,
  debounce: Duration,
  max_batch_size: usize,
  delay: Duration,
) -> CoalescerBuilder<u64, u64, String> {
  let log = Arc::clone(log);
  Coalescer::builder()
    .debounce(debounce)
    .max_batch_size(max_batch_size)
    .async_batch_fn(move |keys: Vec<u64>| {
      log.record(&keys);
      async move {
        tokio::time::sleep(delay).await;
        Ok::<_, String>(keys.into_iter().map(|key| key + 1).collect::<Vec<u64>>())
      }
    })
}

/// A builder whose sync batch function answers `key + 1` after `delay`.
pub fn plus_one_sync(
  log: &Arc<BatchLog>,
  debounce: Duration,
  max_batch_size: usize,
  delay: Duration,
) -> CoalescerBuilder<u64, u64, String> {
  let log = Arc::clone(log);
  Coalescer::builder()
    .debounce(debounce)
    .max_batch_size(max_batch_size)
    .batch_fn(move |keys: Vec<u64>| {
      log.record(&keys);
      std::thread::sleep(delay);
      Ok(keys.into_iter().map(|key| key + 1).collect())
    })
}

/// A cache handle to observe, and its factory to hand to the builder.
pub fn shared_map_cache() -> (MapCache<u64, u64>, impl FnOnce() -> MapCache<u64, u64>) {
  let cache = MapCache::new();
  let for_coalescer = cache.clone();
  (cache, move || for_coalescer)
}
