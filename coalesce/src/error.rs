use std::sync::Arc;

use thiserror::Error;

/// Errors that can occur when building a coalescer.
#[derive(Debug, Error)]
pub enum BuildError {
  /// The coalescer was configured with a maximum batch size of zero.
  #[error("maximum batch size cannot be zero")]
  ZeroBatchSize,
  /// Neither `batch_fn` nor `async_batch_fn` was provided.
  #[error("a batch function is required; set `batch_fn` or `async_batch_fn`")]
  MissingBatchFn,
  /// An `async_batch_fn` was provided, but no `TaskSpawner` was configured
  /// and the default `tokio` feature is not enabled.
  #[error("an async batch function requires a task spawner or the 'tokio' feature")]
  SpawnerRequired,
  /// The debounce timer thread could not be started.
  #[error("failed to start the debounce timer thread: {0}")]
  TimerThread(#[source] std::io::Error),
}

/// The failure delivered to a waiter whose key could not be resolved.
///
/// `E` is the error type of the batch function. A single batch failure is
/// allocated once and every waiter of that batch receives a clone of the same
/// `Arc`, so `RequestError` is `Clone` regardless of `E`.
#[derive(Debug, Error)]
pub enum RequestError<E> {
  /// The batch function failed for the whole batch.
  #[error("batch request failed: {0}")]
  Batch(Arc<E>),
  /// The batch function returned a different number of values than it was given keys.
  #[error("batch function returned {actual} values for {expected} keys")]
  LengthMismatch { expected: usize, actual: usize },
  /// The batch function panicked.
  #[error("batch function panicked: {0}")]
  Panicked(String),
  /// The request was dropped before it could be resolved.
  #[error("request was abandoned before it was resolved")]
  Abandoned,
}

impl<E> RequestError<E> {
  /// Returns the batch function's error, if this is a batch failure.
  pub fn batch_error(&self) -> Option<&Arc<E>> {
    match self {
      RequestError::Batch(err) => Some(err),
      _ => None,
    }
  }
}

// Manual impl: `#[derive(Clone)]` would demand `E: Clone`.
impl<E> Clone for RequestError<E> {
  fn clone(&self) -> Self {
    match self {
      RequestError::Batch(err) => RequestError::Batch(Arc::clone(err)),
      RequestError::LengthMismatch { expected, actual } => RequestError::LengthMismatch {
        expected: *expected,
        actual: *actual,
      },
      RequestError::Panicked(msg) => RequestError::Panicked(msg.clone()),
      RequestError::Abandoned => RequestError::Abandoned,
    }
  }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
  if let Some(msg) = payload.downcast_ref::<&'static str>() {
    (*msg).to_string()
  } else if let Some(msg) = payload.downcast_ref::<String>() {
    msg.clone()
  } else {
    "non-string panic payload".to_string()
  }
}
