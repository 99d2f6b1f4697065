//! Request coalescing: many concurrent single-key requests, few batched calls.
//!
//! A [`Coalescer`] sits in front of an expensive batch operation such as
//! `load_many(keys) -> values`. Callers ask for one key at a time; the
//! coalescer collects the keys, de-duplicates them, and calls the batch
//! function once the burst goes quiet or the batch is full.
//!
//! # Features
//! - **Debounced batching**: a batch is flushed once no request has arrived for
//!   the debounce window, so bursts collapse into a single call.
//! - **Size cap**: reaching `max_batch_size` distinct keys flushes immediately.
//! - **De-duplication**: every caller of the same key in a batch shares one slot
//!   and receives the same `Arc<V>`.
//! - **Sync & Async**: batch functions may be plain closures (run on their own
//!   thread) or async closures (driven by a [`TaskSpawner`]); results can be
//!   awaited or waited on from blocking code.
//! - **Result cache**: an optional [`ResultCache`] answers repeated keys without
//!   queueing them and is written through by every successful batch.
//! - **Observability**: exposes counters through [`MetricsSnapshot`] and emits
//!   `tracing` events for flush decisions and failures.
//!
//! ```no_run
//! use fibre_coalesce::Coalescer;
//! use std::time::Duration;
//!
//! let users = Coalescer::<u64, String, std::io::Error>::builder()
//!   .debounce(Duration::from_millis(5))
//!   .max_batch_size(100)
//!   .batch_fn(|ids| Ok(ids.iter().map(|id| format!("user-{id}")).collect()))
//!   .map_cache()
//!   .build()
//!   .unwrap();
//!
//! let name = users.request(42).wait().unwrap();
//! assert_eq!(name.as_str(), "user-42");
//! ```

// Public modules that form the API
pub mod builder;
pub mod cache;
pub mod error;
pub mod handle;
pub mod metrics;
pub mod runtime;

// Internal, crate-only modules
mod batch;
mod deferred;
mod registry;
mod shared;
mod task;

// Re-export the primary user-facing types for convenience
pub use builder::CoalescerBuilder;
pub use cache::{MapCache, ResultCache};
pub use deferred::{Pending, RequestResult};
pub use error::{BuildError, RequestError};
pub use handle::Coalescer;
pub use metrics::MetricsSnapshot;
pub use runtime::TaskSpawner;
#[cfg(feature = "tokio")]
pub use runtime::TokioSpawner;
