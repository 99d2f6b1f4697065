use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_utils::CachePadded;

/// A thread-safe, internal metrics collector for the coalescer.
/// All fields are atomic to allow for lock-free updates.
#[derive(Debug)]
pub struct Metrics {
  // --- Intake ---
  pub(crate) requests: CachePadded<AtomicU64>,
  pub(crate) cache_hits: CachePadded<AtomicU64>,
  pub(crate) coalesced: CachePadded<AtomicU64>,

  // --- Flushes ---
  pub(crate) batches: CachePadded<AtomicU64>,
  pub(crate) forced_flushes: CachePadded<AtomicU64>,
  pub(crate) timer_flushes: CachePadded<AtomicU64>,
  pub(crate) keys_dispatched: CachePadded<AtomicU64>,
  pub(crate) largest_batch: CachePadded<AtomicU64>,

  // --- Outcomes ---
  pub(crate) batch_failures: CachePadded<AtomicU64>,

  created_at: Instant,
}

impl Default for Metrics {
  fn default() -> Self {
    Self {
      requests: CachePadded::new(AtomicU64::new(0)),
      cache_hits: CachePadded::new(AtomicU64::new(0)),
      coalesced: CachePadded::new(AtomicU64::new(0)),
      batches: CachePadded::new(AtomicU64::new(0)),
      forced_flushes: CachePadded::new(AtomicU64::new(0)),
      timer_flushes: CachePadded::new(AtomicU64::new(0)),
      keys_dispatched: CachePadded::new(AtomicU64::new(0)),
      largest_batch: CachePadded::new(AtomicU64::new(0)),
      batch_failures: CachePadded::new(AtomicU64::new(0)),
      created_at: Instant::now(),
    }
  }
}

impl Metrics {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// Records a batch of `size` keys leaving the registry.
  pub(crate) fn record_batch(&self, size: usize) {
    let size = size as u64;
    self.batches.fetch_add(1, Ordering::Relaxed);
    self.keys_dispatched.fetch_add(size, Ordering::Relaxed);
    self.largest_batch.fetch_max(size, Ordering::Relaxed);
  }

  /// Creates a point-in-time snapshot of the current metrics.
  pub(crate) fn snapshot(&self) -> MetricsSnapshot {
    let requests = self.requests.load(Ordering::Relaxed);
    let cache_hits = self.cache_hits.load(Ordering::Relaxed);
    let batches = self.batches.load(Ordering::Relaxed);
    let keys_dispatched = self.keys_dispatched.load(Ordering::Relaxed);

    MetricsSnapshot {
      requests,
      cache_hits,
      cache_hit_ratio: if requests == 0 {
        0.0
      } else {
        cache_hits as f64 / requests as f64
      },
      coalesced: self.coalesced.load(Ordering::Relaxed),
      batches,
      forced_flushes: self.forced_flushes.load(Ordering::Relaxed),
      timer_flushes: self.timer_flushes.load(Ordering::Relaxed),
      keys_dispatched,
      average_batch_size: if batches == 0 {
        0.0
      } else {
        keys_dispatched as f64 / batches as f64
      },
      largest_batch: self.largest_batch.load(Ordering::Relaxed),
      batch_failures: self.batch_failures.load(Ordering::Relaxed),
      uptime_secs: self.created_at.elapsed().as_secs(),
    }
  }
}

/// A point-in-time, public-facing snapshot of the coalescer's metrics.
#[derive(Clone)]
pub struct MetricsSnapshot {
  /// Every call to `request` or `request_with_callback`.
  pub requests: u64,
  /// Requests answered straight from the result cache.
  pub cache_hits: u64,
  /// cache_hits / requests.
  pub cache_hit_ratio: f64,
  /// Requests that joined a key already waiting in the registry.
  pub coalesced: u64,
  /// Batches handed to the batch function.
  pub batches: u64,
  /// Flushes triggered by reaching the maximum batch size.
  pub forced_flushes: u64,
  /// Flushes triggered by the debounce timer.
  pub timer_flushes: u64,
  /// Distinct keys sent downstream, summed over all batches.
  pub keys_dispatched: u64,
  /// keys_dispatched / batches.
  pub average_batch_size: f64,
  /// The largest batch dispatched so far.
  pub largest_batch: u64,
  /// Batches that failed as a whole (error, panic or length mismatch).
  pub batch_failures: u64,
  /// The number of seconds the coalescer has been running.
  pub uptime_secs: u64,
}

impl fmt::Debug for MetricsSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MetricsSnapshot")
      .field("requests", &self.requests)
      .field("cache_hits", &self.cache_hits)
      .field("cache_hit_ratio", &format!("{:.2}%", self.cache_hit_ratio * 100.0))
      .field("coalesced", &self.coalesced)
      .field("batches", &self.batches)
      .field("forced_flushes", &self.forced_flushes)
      .field("timer_flushes", &self.timer_flushes)
      .field("keys_dispatched", &self.keys_dispatched)
      .field("average_batch_size", &format!("{:.1}", self.average_batch_size))
      .field("largest_batch", &self.largest_batch)
      .field("batch_failures", &self.batch_failures)
      .field("uptime_secs", &self.uptime_secs)
      .finish()
  }
}
