use crate::TaskSpawner;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// The boxed future an asynchronous batch function produces.
pub(crate) type BatchFuture<V, E> = Pin<Box<dyn Future<Output = Result<Vec<V>, E>> + Send>>;

pub(crate) type SyncBatchFn<K, V, E> = Arc<dyn Fn(Vec<K>) -> Result<Vec<V>, E> + Send + Sync>;
pub(crate) type AsyncBatchFn<K, V, E> = Arc<dyn Fn(Vec<K>) -> BatchFuture<V, E> + Send + Sync>;

/// Holds either a synchronous or an asynchronous batch function.
///
/// Both receive the keys of one flush in registration order and must return
/// exactly one value per key, in the same order, or fail as a whole.
pub(crate) enum BatchFn<K, V, E> {
  Sync(SyncBatchFn<K, V, E>),
  Async(AsyncBatchFn<K, V, E>),
}

/// Where a flushed batch runs.
pub(crate) enum Executor<K, V, E> {
  /// A synchronous batch function, run on a dedicated thread per batch.
  Thread(SyncBatchFn<K, V, E>),
  /// An asynchronous batch function, driven by the spawner.
  Spawned {
    batch_fn: AsyncBatchFn<K, V, E>,
    spawner: Arc<dyn TaskSpawner>,
  },
}
