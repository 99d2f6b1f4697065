use crate::error::RequestError;

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::thread::{self, Thread};

/// The outcome a request settles with.
pub type RequestResult<V, E> = Result<Arc<V>, RequestError<E>>;

/// Represents a reader blocked on a `Deferred`.
enum Waiter {
  Sync(Thread),
  Async(Waker),
}

impl Waiter {
  fn wake(self) {
    match self {
      Waiter::Sync(thread) => thread.unpark(),
      Waiter::Async(waker) => waker.wake(),
    }
  }
}

enum State<V, E> {
  Unsettled,
  Settled(RequestResult<V, E>),
}

struct Inner<V, E> {
  state: State<V, E>,
  waiters: VecDeque<Waiter>,
}

/// A settle-once slot shared by a `Resolver` and a `Pending`.
struct Deferred<V, E> {
  inner: Mutex<Inner<V, E>>,
}

impl<V, E> Deferred<V, E> {
  fn new(state: State<V, E>) -> Self {
    Self {
      inner: Mutex::new(Inner {
        state,
        waiters: VecDeque::new(),
      }),
    }
  }

  /// Stores the outcome and wakes every reader. Returns `false` if the slot
  /// was already settled, in which case `result` is discarded.
  fn settle(&self, result: RequestResult<V, E>) -> bool {
    let mut inner = self.inner.lock();
    if matches!(inner.state, State::Settled(_)) {
      return false;
    }
    inner.state = State::Settled(result);
    for waiter in inner.waiters.drain(..) {
      waiter.wake();
    }
    true
  }
}

/// Creates a linked resolver/reader pair.
pub(crate) fn deferred<V, E>() -> (Resolver<V, E>, Pending<V, E>) {
  let slot = Arc::new(Deferred::new(State::Unsettled));
  (
    Resolver {
      slot: Some(Arc::clone(&slot)),
    },
    Pending { slot },
  )
}

/// The write half of a deferred result.
///
/// Consumed by `resolve` or `reject`. A resolver dropped without settling
/// settles its reader with `RequestError::Abandoned`.
pub(crate) struct Resolver<V, E> {
  slot: Option<Arc<Deferred<V, E>>>,
}

impl<V, E> Resolver<V, E> {
  pub(crate) fn resolve(mut self, value: Arc<V>) {
    if let Some(slot) = self.slot.take() {
      slot.settle(Ok(value));
    }
  }

  pub(crate) fn reject(mut self, err: RequestError<E>) {
    if let Some(slot) = self.slot.take() {
      slot.settle(Err(err));
    }
  }
}

impl<V, E> Drop for Resolver<V, E> {
  fn drop(&mut self) {
    if let Some(slot) = self.slot.take() {
      slot.settle(Err(RequestError::Abandoned));
    }
  }
}

/// A handle to the eventual result of a single-key request.
///
/// `Pending` is a `Future` for async callers; synchronous callers can block on
/// it with [`Pending::wait`]. Either way it yields the value shared by every
/// caller of the same key in the same batch, or the batch's failure.
#[must_use = "a Pending does nothing unless awaited or waited on"]
pub struct Pending<V, E> {
  slot: Arc<Deferred<V, E>>,
}

impl<V, E> Pending<V, E> {
  /// Returns `true` once the request has been resolved or rejected.
  pub fn is_settled(&self) -> bool {
    matches!(self.slot.inner.lock().state, State::Settled(_))
  }

  /// Returns the outcome without blocking, or `None` if still unsettled.
  pub fn try_result(&self) -> Option<RequestResult<V, E>> {
    match &self.slot.inner.lock().state {
      State::Settled(result) => Some(result.clone()),
      State::Unsettled => None,
    }
  }

  /// Blocks the current thread until the request settles.
  pub fn wait(self) -> RequestResult<V, E> {
    let mut inner = self.slot.inner.lock();
    loop {
      match &inner.state {
        State::Settled(result) => return result.clone(),
        State::Unsettled => {
          inner.waiters.push_back(Waiter::Sync(thread::current()));
          drop(inner); // Unlock before parking.
          thread::park();
          inner = self.slot.inner.lock();
        }
      }
    }
  }
}

impl<V, E> Future for Pending<V, E> {
  type Output = RequestResult<V, E>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let mut inner = self.slot.inner.lock();
    match &inner.state {
      State::Settled(result) => Poll::Ready(result.clone()),
      State::Unsettled => {
        let already_registered = inner.waiters.iter().any(|w| match w {
          Waiter::Async(waker) => waker.will_wake(cx.waker()),
          Waiter::Sync(_) => false,
        });
        if !already_registered {
          inner.waiters.push_back(Waiter::Async(cx.waker().clone()));
        }
        Poll::Pending
      }
    }
  }
}

impl<V, E> fmt::Debug for Pending<V, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Pending")
      .field("settled", &self.is_settled())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_resolve_settles_reader() {
    let (resolver, pending) = deferred::<i32, ()>();
    assert!(!pending.is_settled());
    resolver.resolve(Arc::new(7));
    assert!(pending.is_settled());
    assert_eq!(*pending.wait().unwrap(), 7);
  }

  #[test]
  fn test_dropped_resolver_abandons_reader() {
    let (resolver, pending) = deferred::<i32, ()>();
    drop(resolver);
    assert!(matches!(pending.try_result(), Some(Err(RequestError::Abandoned))));
  }

  #[test]
  fn test_settle_is_at_most_once() {
    let slot = Deferred::<i32, ()>::new(State::Unsettled);
    assert!(slot.settle(Ok(Arc::new(1))));
    assert!(!slot.settle(Ok(Arc::new(2))));
    match &slot.inner.lock().state {
      State::Settled(Ok(value)) => assert_eq!(**value, 1),
      _ => panic!("slot should hold the first outcome"),
    };
  }

  #[test]
  fn test_wait_blocks_until_resolved_from_other_thread() {
    let (resolver, pending) = deferred::<String, ()>();
    let handle = thread::spawn(move || {
      thread::sleep(std::time::Duration::from_millis(20));
      resolver.resolve(Arc::new("done".to_string()));
    });
    assert_eq!(pending.wait().unwrap().as_str(), "done");
    handle.join().unwrap();
  }

  #[test]
  fn test_future_wakes_on_reject() {
    let (resolver, pending) = deferred::<i32, &'static str>();
    let handle = thread::spawn(move || {
      thread::sleep(std::time::Duration::from_millis(20));
      resolver.reject(RequestError::Batch(Arc::new("boom")));
    });
    let result = futures_executor::block_on(pending);
    assert_eq!(**result.unwrap_err().batch_error().unwrap(), "boom");
    handle.join().unwrap();
  }
}
