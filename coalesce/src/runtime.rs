use std::{future::Future, pin::Pin};

/// A trait for spawning a future onto an asynchronous runtime.
///
/// Asynchronous batch functions are driven by the spawner; the coalescer
/// itself never blocks on them.
pub trait TaskSpawner: Send + Sync + 'static {
  /// Spawns a type-erased future.
  fn spawn(&self, future: Pin<Box<dyn Future<Output = ()> + Send>>);
}

/// Any `Fn` taking a boxed future can serve as a spawner, which keeps
/// integration with other executors to a one-line closure.
impl<F> TaskSpawner for F
where
  F: Fn(Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static,
{
  fn spawn(&self, future: Pin<Box<dyn Future<Output = ()> + Send>>) {
    self(future)
  }
}

#[cfg(feature = "tokio")]
pub struct TokioSpawner(tokio::runtime::Handle);

#[cfg(feature = "tokio")]
impl TokioSpawner {
  /// Creates a spawner that uses the current Tokio runtime context.
  /// Panics if called outside of a Tokio runtime.
  pub fn new() -> Self {
    Self(tokio::runtime::Handle::current())
  }

  /// Creates a spawner for a specific runtime, usable from any thread.
  pub fn from_handle(handle: tokio::runtime::Handle) -> Self {
    Self(handle)
  }

  /// Returns a spawner for the current runtime, or `None` outside of one.
  pub(crate) fn try_current() -> Option<Self> {
    tokio::runtime::Handle::try_current().ok().map(Self)
  }
}

#[cfg(feature = "tokio")]
impl TaskSpawner for TokioSpawner {
  fn spawn(&self, future: Pin<Box<dyn Future<Output = ()> + Send>>) {
    self.0.spawn(future);
  }
}
