use crate::deferred::Resolver;
use crate::error::RequestError;

use std::hash::Hash;
use std::mem;
use std::sync::Arc;

use ahash::{HashMap, HashMapExt};

pub(crate) type OnSuccess<V> = Box<dyn FnOnce(Arc<V>) + Send>;
pub(crate) type OnError<E> = Box<dyn FnOnce(RequestError<E>) + Send>;

/// A caller waiting on a key: either a `Pending` handle or a callback pair.
pub(crate) enum Continuation<V, E> {
  Deferred(Resolver<V, E>),
  Callback(Callbacks<V, E>),
}

impl<V, E> Continuation<V, E> {
  pub(crate) fn callback(on_success: OnSuccess<V>, on_error: OnError<E>) -> Self {
    Continuation::Callback(Callbacks {
      on_success: Some(on_success),
      on_error: Some(on_error),
    })
  }

  pub(crate) fn succeed(self, value: Arc<V>) {
    match self {
      Continuation::Deferred(resolver) => resolver.resolve(value),
      Continuation::Callback(callbacks) => callbacks.succeed(value),
    }
  }

  pub(crate) fn fail(self, err: RequestError<E>) {
    match self {
      Continuation::Deferred(resolver) => resolver.reject(err),
      Continuation::Callback(callbacks) => callbacks.fail(err),
    }
  }
}

/// A success/error callback pair, consumed by whichever outcome arrives first.
///
/// Dropped unsettled, it calls `on_error` with `RequestError::Abandoned`, the
/// same way a dropped `Resolver` settles its `Pending`.
pub(crate) struct Callbacks<V, E> {
  on_success: Option<OnSuccess<V>>,
  on_error: Option<OnError<E>>,
}

impl<V, E> Callbacks<V, E> {
  fn succeed(mut self, value: Arc<V>) {
    self.on_error = None;
    if let Some(on_success) = self.on_success.take() {
      on_success(value);
    }
  }

  fn fail(mut self, err: RequestError<E>) {
    self.on_success = None;
    if let Some(on_error) = self.on_error.take() {
      on_error(err);
    }
  }
}

impl<V, E> Drop for Callbacks<V, E> {
  fn drop(&mut self) {
    if let Some(on_error) = self.on_error.take() {
      on_error(RequestError::Abandoned);
    }
  }
}

/// All callers waiting on one key.
pub(crate) struct PendingEntry<K, V, E> {
  pub(crate) key: K,
  pub(crate) waiters: Vec<Continuation<V, E>>,
}

/// Whether a registration created a new entry or joined an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Registration {
  New,
  Joined,
}

/// The live set of keys awaiting the next flush, in insertion order.
///
/// `index` maps each key to its slot in `entries`, so a repeated key appends
/// to the existing waiter list instead of adding a second entry.
pub(crate) struct Registry<K, V, E> {
  index: HashMap<K, usize>,
  entries: Vec<PendingEntry<K, V, E>>,
}

impl<K, V, E> Registry<K, V, E>
where
  K: Eq + Hash + Clone,
{
  pub(crate) fn new() -> Self {
    Self {
      index: HashMap::new(),
      entries: Vec::new(),
    }
  }

  /// Number of distinct keys currently registered.
  pub(crate) fn len(&self) -> usize {
    self.entries.len()
  }

  pub(crate) fn register(&mut self, key: K, waiter: Continuation<V, E>) -> Registration {
    if let Some(&slot) = self.index.get(&key) {
      self.entries[slot].waiters.push(waiter);
      return Registration::Joined;
    }
    self.index.insert(key.clone(), self.entries.len());
    self.entries.push(PendingEntry {
      key,
      waiters: vec![waiter],
    });
    Registration::New
  }

  /// Takes every registered entry, leaving an empty registry behind.
  pub(crate) fn drain(&mut self) -> Batch<K, V, E> {
    self.index.clear();
    Batch {
      entries: mem::take(&mut self.entries),
    }
  }
}

/// An immutable snapshot of a drained registry, owned by one flush.
pub(crate) struct Batch<K, V, E> {
  entries: Vec<PendingEntry<K, V, E>>,
}

impl<K: Clone, V, E> Batch<K, V, E> {
  pub(crate) fn len(&self) -> usize {
    self.entries.len()
  }

  pub(crate) fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  /// The keys to send downstream, in registration order.
  pub(crate) fn keys(&self) -> Vec<K> {
    self.entries.iter().map(|entry| entry.key.clone()).collect()
  }

  /// Total number of waiters across all keys.
  pub(crate) fn waiter_count(&self) -> usize {
    self.entries.iter().map(|entry| entry.waiters.len()).sum()
  }

  pub(crate) fn into_entries(self) -> Vec<PendingEntry<K, V, E>> {
    self.entries
  }

  /// Rejects every waiter of every key, in snapshot order.
  pub(crate) fn fail_all(self, err: RequestError<E>) {
    for entry in self.entries {
      for waiter in entry.waiters {
        waiter.fail(err.clone());
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::deferred::deferred;

  fn noop<V, E>() -> Continuation<V, E> {
    Continuation::callback(Box::new(|_| {}), Box::new(|_| {}))
  }

  #[test]
  fn test_repeated_key_joins_existing_entry() {
    let mut registry = Registry::<u32, u32, ()>::new();
    assert_eq!(registry.register(1, noop()), Registration::New);
    assert_eq!(registry.register(2, noop()), Registration::New);
    assert_eq!(registry.register(1, noop()), Registration::Joined);
    assert_eq!(registry.len(), 2);

    let batch = registry.drain();
    assert_eq!(batch.keys(), vec![1, 2]);
    assert_eq!(batch.waiter_count(), 3);
  }

  #[test]
  fn test_drain_leaves_fresh_registry() {
    let mut registry = Registry::<u32, u32, ()>::new();
    registry.register(7, noop());
    let first = registry.drain();
    assert_eq!(registry.len(), 0);

    // The same key starts a new entry in the next batch.
    assert_eq!(registry.register(7, noop()), Registration::New);
    let second = registry.drain();
    assert_eq!(first.keys(), vec![7]);
    assert_eq!(second.keys(), vec![7]);
  }

  #[test]
  fn test_keys_keep_insertion_order() {
    let mut registry = Registry::<&'static str, u32, ()>::new();
    for key in ["c", "a", "b", "a", "c"] {
      registry.register(key, noop());
    }
    assert_eq!(registry.drain().keys(), vec!["c", "a", "b"]);
  }

  #[test]
  fn test_fail_all_rejects_every_waiter() {
    let mut registry = Registry::<u32, u32, &'static str>::new();
    let (r1, p1) = deferred();
    let (r2, p2) = deferred();
    let (r3, p3) = deferred();
    registry.register(1, Continuation::Deferred(r1));
    registry.register(1, Continuation::Deferred(r2));
    registry.register(2, Continuation::Deferred(r3));

    let err = Arc::new("down");
    registry.drain().fail_all(RequestError::Batch(Arc::clone(&err)));

    for pending in [p1, p2, p3] {
      match pending.try_result() {
        Some(Err(RequestError::Batch(got))) => assert!(Arc::ptr_eq(&got, &err)),
        _ => panic!("waiter should carry the batch error"),
      }
    }
  }
  #[test]
  fn test_dropped_callback_reports_abandoned() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let errors = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&errors);
    let waiter = Continuation::<u32, ()>::callback(
      Box::new(|_| panic!("no value was produced")),
      Box::new(move |err| {
        assert!(matches!(err, RequestError::Abandoned));
        seen.fetch_add(1, Ordering::SeqCst);
      }),
    );
    drop(waiter);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn test_settled_callback_is_not_abandoned_on_drop() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let calls = Arc::new(AtomicUsize::new(0));
    let on_success = Arc::clone(&calls);
    let on_error = Arc::clone(&calls);
    Continuation::<u32, ()>::callback(
      Box::new(move |_| {
        on_success.fetch_add(1, Ordering::SeqCst);
      }),
      Box::new(move |_| {
        on_error.fetch_add(100, Ordering::SeqCst);
      }),
    )
    .succeed(Arc::new(1));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }
}
