use crate::error::panic_message;
use crate::shared::{CoalescerShared, FlushCause};

use std::hash::Hash;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use parking_lot::MutexGuard;
use tracing::{trace, warn};

/// The background thread that flushes a quiet registry once its debounce
/// deadline passes.
///
/// The thread waits on the registry's condition variable. Re-arming moves the
/// deadline in place, so a burst of requests never fires the timer until the
/// burst pauses for a full debounce window. The thread exits once the shared
/// state is marked as shut down.
pub(crate) struct Debouncer {
  // Dropping the handle detaches the thread; shutdown is signalled through the queue.
  _handle: JoinHandle<()>,
}

impl Debouncer {
  /// Spawns a new debounce thread for `shared`.
  pub(crate) fn spawn<K, V, E>(shared: Arc<CoalescerShared<K, V, E>>) -> io::Result<Self>
  where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
  {
    let handle = thread::Builder::new()
      .name("fibre-coalesce-debounce".to_string())
      .spawn(move || Self::run(shared))?;
    Ok(Self { _handle: handle })
  }

  fn run<K, V, E>(shared: Arc<CoalescerShared<K, V, E>>)
  where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
  {
    let mut queue = shared.queue.lock();
    while !queue.shutdown {
      let deadline = queue.deadline;
      match deadline {
        None => shared.timer_signal.wait(&mut queue),
        Some(deadline) if Instant::now() >= deadline => {
          let batch = CoalescerShared::take_batch(&mut queue);
          trace!(keys = batch.len(), "debounce deadline reached");
          MutexGuard::unlocked(&mut queue, || {
            // A panicking spawner or callback must not take the timer down with it.
            let flushed = panic::catch_unwind(AssertUnwindSafe(|| {
              CoalescerShared::dispatch(Arc::clone(&shared), batch, FlushCause::Timer);
            }));
            if let Err(payload) = flushed {
              warn!(panic = %panic_message(payload), "timer flush panicked");
            }
          });
        }
        Some(deadline) => {
          // Timing out just loops back to re-check, since the deadline may
          // have moved while we slept.
          let _ = shared.timer_signal.wait_until(&mut queue, deadline);
        }
      }
    }
    trace!("debounce thread stopped");
  }
}
