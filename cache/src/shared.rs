use crate::entry::{CacheEntry, Slot};
use crate::error::LookupMiss;
use crate::listener::EvictionReason;
use crate::loader::{FetchMode, Fetchers, LoadFuture, LoadResult};
use crate::metrics::Metrics;
use crate::policy::CachePolicy;
use crate::runtime::TaskSpawner;
use crate::store::ShardedStore;
use crate::task::notifier::Notifier;
use crate::time;

use tessera::{BoxError, CancellationToken, FetchFailedError, Lifecycle};

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::hash::{BuildHasher, Hash};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{stream, FutureExt, StreamExt};
use tracing::{debug, trace};

/// The result of looking a key up for a fetch-through read.
pub(crate) enum Lookup<V> {
  /// A resolved, unexpired value.
  Hit(Arc<V>),
  /// Another caller's fetch is in flight; await it.
  Join(Arc<LoadFuture<V>>),
  /// This caller installed the `Loading` slot and must start the fetch.
  Claimed(Arc<LoadFuture<V>>, u64),
}

/// A key whose `Loading` slot was installed by the current caller.
pub(crate) type Claim<K, V> = (K, u64, Arc<LoadFuture<V>>);

/// The internal, thread-safe core of the cache.
pub(crate) struct CacheShared<K, V, H> {
  pub(crate) store: ShardedStore<K, V, H>,
  pub(crate) metrics: Metrics,
  pub(crate) policy: Arc<dyn CachePolicy<K>>,
  pub(crate) capacity: Option<usize>,
  /// The number of `Ready` slots. Only updated while holding the shard lock
  /// of the slot being changed.
  pub(crate) entries: AtomicUsize,
  versions: AtomicU64,
  pub(crate) time_to_live: Option<Duration>,
  pub(crate) fetchers: Fetchers<K, V>,
  pub(crate) bulk_concurrency: usize,
  pub(crate) bulk_batch_size: usize,
  pub(crate) spawner: Arc<dyn TaskSpawner>,
  pub(crate) notifier: Option<Notifier<K, V>>,
  pub(crate) lifecycle: Lifecycle,
}

impl<K, V, H> fmt::Debug for CacheShared<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheShared")
      .field("lifecycle", &self.lifecycle)
      .field("capacity", &self.capacity)
      .field("time_to_live", &self.time_to_live)
      .field("entries", &self.entries.load(Ordering::Relaxed))
      .finish_non_exhaustive()
  }
}

impl<K, V, H> Drop for CacheShared<K, V, H> {
  fn drop(&mut self) {
    // Stops the janitor and notifier, and tells fetchers nobody is waiting.
    self.lifecycle.abandon();
  }
}

#[allow(clippy::too_many_arguments)]
impl<K, V, H> CacheShared<K, V, H>
where
  K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  pub(crate) fn new(
    store: ShardedStore<K, V, H>,
    policy: Arc<dyn CachePolicy<K>>,
    capacity: Option<usize>,
    time_to_live: Option<Duration>,
    fetchers: Fetchers<K, V>,
    bulk_concurrency: usize,
    bulk_batch_size: usize,
    spawner: Arc<dyn TaskSpawner>,
    notifier: Option<Notifier<K, V>>,
    lifecycle: Lifecycle,
  ) -> Self {
    Self {
      store,
      metrics: Metrics::new(),
      policy,
      capacity,
      entries: AtomicUsize::new(0),
      versions: AtomicU64::new(0),
      time_to_live,
      fetchers,
      bulk_concurrency,
      bulk_batch_size,
      spawner,
      notifier,
      lifecycle,
    }
  }

  #[inline]
  fn next_version(&self) -> u64 {
    self.versions.fetch_add(1, Ordering::Relaxed) + 1
  }

  #[inline]
  fn notify(&self, key: K, value: Arc<V>, reason: EvictionReason) {
    if let Some(notifier) = &self.notifier {
      notifier.notify(key, value, reason);
    }
  }

  /// Returns the cached value without ever fetching.
  pub(crate) fn peek(&self, key: &K) -> Option<Arc<V>> {
    let value = {
      let guard = self.store.shard(key).lock();
      match guard.get(key) {
        Some(Slot::Ready { entry, .. }) if !entry.is_expired() => Some(entry.value()),
        _ => None,
      }
    };
    match value {
      Some(value) => {
        Metrics::incr(&self.metrics.hits);
        self.policy.on_access(key);
        Some(value)
      }
      None => None,
    }
  }

  /// Resolves `key` to a hit, an in-flight fetch to join, or a freshly
  /// claimed `Loading` slot. With `refresh`, a resolved entry is replaced by
  /// a new fetch instead of being returned.
  pub(crate) fn lookup(&self, key: &K, refresh: bool) -> Lookup<V> {
    let mut guard = self.store.shard(key).lock();

    let existing = match guard.get(key) {
      Some(Slot::Ready { entry, .. }) if !refresh && !entry.is_expired() => {
        Some(Lookup::Hit(entry.value()))
      }
      Some(Slot::Loading { future, .. }) => Some(Lookup::Join(future.clone())),
      _ => None,
    };
    if let Some(found) = existing {
      drop(guard);
      match &found {
        Lookup::Hit(_) => {
          Metrics::incr(&self.metrics.hits);
          self.policy.on_access(key);
        }
        _ => Metrics::incr(&self.metrics.coalesced),
      }
      return found;
    }

    let version = self.next_version();
    let future = Arc::new(LoadFuture::new());
    let previous = guard.insert(
      key.clone(),
      Slot::Loading {
        future: future.clone(),
        version,
      },
    );
    if matches!(previous, Some(Slot::Ready { .. })) {
      self.entries.fetch_sub(1, Ordering::Relaxed);
      self.policy.on_remove(key);
    }
    drop(guard);

    Metrics::incr(&self.metrics.misses);
    if let Some(Slot::Ready { entry, .. }) = previous {
      if entry.is_expired() {
        Metrics::incr(&self.metrics.evicted_by_ttl);
        self.notify(key.clone(), entry.value(), EvictionReason::Expired);
      }
    }
    Lookup::Claimed(future, version)
  }

  /// Starts the fetch for a claimed slot on the spawner, so that it runs to
  /// completion even if every caller waiting on it goes away.
  pub(crate) fn spawn_fetch(
    self: &Arc<Self>,
    key: K,
    version: u64,
    future: Arc<LoadFuture<V>>,
    mode: FetchMode,
  ) {
    let shared = Arc::clone(self);
    let token = self.lifecycle.cancellation();
    self.spawner.spawn(Box::pin(async move {
      let outcome = shared.run_single_fetch(key.clone(), mode, token).await;
      let result = shared.complete_load(&key, version, outcome);
      future.complete(result);
    }));
  }

  /// Starts one driver task fetching every claimed key, with at most
  /// `bulk_concurrency` fetcher calls (or bulk batches) in flight.
  pub(crate) fn spawn_bulk_fetch(self: &Arc<Self>, claims: Vec<Claim<K, V>>) {
    if claims.is_empty() {
      return;
    }
    let shared = Arc::clone(self);
    let token = self.lifecycle.cancellation();
    self.spawner.spawn(Box::pin(async move {
      let concurrency = shared.bulk_concurrency;

      if shared.fetchers.bulk.is_some() {
        let mut batches = Vec::new();
        let mut claims = claims.into_iter().peekable();
        while claims.peek().is_some() {
          batches.push(claims.by_ref().take(shared.bulk_batch_size).collect::<Vec<_>>());
        }

        stream::iter(batches)
          .for_each_concurrent(concurrency, |batch| {
            let shared = &shared;
            let token = token.clone();
            async move { shared.fetch_batch(batch, token).await }
          })
          .await;
      } else {
        stream::iter(claims)
          .for_each_concurrent(concurrency, |(key, version, future)| {
            let shared = &shared;
            let token = token.clone();
            async move {
              let outcome = shared
                .run_single_fetch(key.clone(), FetchMode::Value, token)
                .await;
              future.complete(shared.complete_load(&key, version, outcome));
            }
          })
          .await;
      }
    }));
  }

  /// Calls the fetcher for one key. Panics are contained and reported as a
  /// failure so that waiters are always released.
  async fn run_single_fetch(
    &self,
    key: K,
    mode: FetchMode,
    token: CancellationToken,
  ) -> Result<Option<V>, BoxError> {
    let fetch = async {
      let fetchers = &self.fetchers;
      match (&fetchers.single, &fetchers.maybe, &fetchers.bulk) {
        (None, None, Some(bulk)) => {
          let mut results = bulk(vec![key.clone()], token).await;
          match results.iter().position(|(k, _)| *k == key) {
            Some(index) => results.swap_remove(index).1.map(Some),
            None => Err(Box::new(LookupMiss::MissingFromBatch) as BoxError),
          }
        }
        _ => fetchers.fetch_one(key.clone(), mode, token).await,
      }
    };

    AssertUnwindSafe(fetch)
      .catch_unwind()
      .await
      .unwrap_or_else(|_| Err(Box::new(LookupMiss::Panicked) as BoxError))
  }

  async fn fetch_batch(&self, batch: Vec<Claim<K, V>>, token: CancellationToken) {
    let Some(bulk) = self.fetchers.bulk.clone() else {
      return;
    };
    let keys = batch.iter().map(|(key, _, _)| key.clone()).collect::<Vec<_>>();
    let answered = AssertUnwindSafe(async { bulk(keys, token).await })
      .catch_unwind()
      .await;

    match answered {
      Ok(results) => {
        let mut by_key = results.into_iter().collect::<HashMap<_, _>>();
        for (key, version, future) in batch {
          let outcome = match by_key.remove(&key) {
            Some(result) => result.map(Some),
            None => Err(Box::new(LookupMiss::MissingFromBatch) as BoxError),
          };
          future.complete(self.complete_load(&key, version, outcome));
        }
      }
      Err(_) => {
        for (key, version, future) in batch {
          let outcome = Err(Box::new(LookupMiss::Panicked) as BoxError);
          future.complete(self.complete_load(&key, version, outcome));
        }
      }
    }
  }

  /// Records a finished fetch. The value is installed only if the slot still
  /// holds the `Loading` state this fetch started from and the cache is
  /// active; otherwise it is handed to the waiters and discarded.
  pub(crate) fn complete_load(
    &self,
    key: &K,
    version: u64,
    outcome: Result<Option<V>, BoxError>,
  ) -> LoadResult<V> {
    Metrics::incr(&self.metrics.fetches);

    match outcome {
      Ok(Some(value)) => {
        let value = Arc::new(value);
        let installed = {
          let mut guard = self.store.shard(key).lock();
          let current = matches!(
            guard.get(key),
            Some(Slot::Loading { version: v, .. }) if *v == version
          );
          if current && self.lifecycle.is_active() {
            guard.insert(
              key.clone(),
              Slot::Ready {
                entry: CacheEntry::new(value.clone(), self.time_to_live),
                version,
              },
            );
            self.entries.fetch_add(1, Ordering::Relaxed);
            self.policy.on_insert(key);
            true
          } else {
            false
          }
        };

        if installed {
          Metrics::incr(&self.metrics.inserts);
          self.enforce_capacity();
        } else {
          Metrics::incr(&self.metrics.discarded_results);
          trace!(instance = %self.lifecycle.instance(), ?key, version, "discarded stale fetch result");
        }
        Ok(Some(value))
      }
      Ok(None) => {
        self.release_claim(key, version);
        Ok(None)
      }
      Err(cause) => {
        Metrics::incr(&self.metrics.fetch_failures);
        self.release_claim(key, version);
        debug!(instance = %self.lifecycle.instance(), ?key, error = %cause, "fetch failed");
        Err(FetchFailedError::for_key(key, cause))
      }
    }
  }

  /// Drops the `Loading` slot for `version`, if it is still the current one.
  fn release_claim(&self, key: &K, version: u64) {
    let mut guard = self.store.shard(key).lock();
    if matches!(guard.get(key), Some(Slot::Loading { version: v, .. }) if *v == version) {
      guard.remove(key);
    }
  }

  /// Installs a value eagerly. Any fetch still in flight for the key will
  /// find a newer version and discard its result.
  pub(crate) fn install(&self, key: K, value: V, ttl: Option<Duration>) {
    let version = self.next_version();
    let entry = CacheEntry::new(Arc::new(value), ttl.or(self.time_to_live));
    {
      let mut guard = self.store.shard(&key).lock();
      let previous = guard.insert(key.clone(), Slot::Ready { entry, version });
      if !matches!(previous, Some(Slot::Ready { .. })) {
        self.entries.fetch_add(1, Ordering::Relaxed);
      }
      self.policy.on_insert(&key);
    }
    Metrics::incr(&self.metrics.inserts);
    self.enforce_capacity();
  }

  /// Removes a key. An in-flight fetch for it is left running but loses its
  /// slot, so its result cannot resurrect the key.
  pub(crate) fn remove(&self, key: &K) -> bool {
    let removed = {
      let mut guard = self.store.shard(key).lock();
      let removed = guard.remove(key);
      if matches!(removed, Some(Slot::Ready { .. })) {
        self.entries.fetch_sub(1, Ordering::Relaxed);
        self.policy.on_remove(key);
      }
      removed
    };

    match removed {
      Some(Slot::Ready { entry, .. }) => {
        Metrics::incr(&self.metrics.invalidations);
        self.notify(key.clone(), entry.value(), EvictionReason::Invalidated);
        true
      }
      _ => false,
    }
  }

  /// Removes every slot, notifying the listener about resolved entries when
  /// `reason` is given.
  pub(crate) fn remove_all(&self, reason: Option<EvictionReason>) -> usize {
    let mut removed_total = 0;
    for shard in self.store.iter_shards() {
      let drained = {
        let mut guard = shard.lock();
        let drained = guard.drain().collect::<Vec<_>>();
        let mut ready = 0;
        for (key, slot) in &drained {
          if slot.is_ready() {
            ready += 1;
            self.policy.on_remove(key);
          }
        }
        self.entries.fetch_sub(ready, Ordering::Relaxed);
        drained
      };

      for (key, slot) in drained {
        if let Slot::Ready { entry, .. } = slot {
          removed_total += 1;
          if let Some(reason) = reason {
            Metrics::incr(&self.metrics.invalidations);
            self.notify(key, entry.value(), reason);
          }
        }
      }
    }
    removed_total
  }

  /// Sweeps expired entries from every shard and returns how many were
  /// removed.
  pub(crate) fn purge_expired(&self) -> usize {
    let now = time::now_nanos();
    let mut removed_total = 0;

    for shard in self.store.iter_shards() {
      let mut expired = Vec::new();
      {
        let mut guard = shard.lock();
        guard.retain(|key, slot| match slot {
          Slot::Ready { entry, .. } if entry.is_expired_at(now) => {
            self.policy.on_remove(key);
            expired.push((key.clone(), entry.value()));
            false
          }
          _ => true,
        });
        self.entries.fetch_sub(expired.len(), Ordering::Relaxed);
      }

      removed_total += expired.len();
      for (key, value) in expired {
        Metrics::incr(&self.metrics.evicted_by_ttl);
        self.notify(key, value, EvictionReason::Expired);
      }
    }
    removed_total
  }

  /// Evicts policy victims while the cache holds more entries than its
  /// capacity. Victims that are no longer resolved are skipped, so the loop
  /// asks again until the count fits or the policy has nothing left.
  fn enforce_capacity(&self) {
    let Some(capacity) = self.capacity else {
      return;
    };

    loop {
      let len = self.entries.load(Ordering::Relaxed);
      if len <= capacity {
        return;
      }
      let victims = self.policy.evict(len - capacity);
      if victims.is_empty() {
        return;
      }

      for key in victims {
        let removed = {
          let mut guard = self.store.shard(&key).lock();
          if matches!(guard.get(&key), Some(Slot::Ready { .. })) {
            self.entries.fetch_sub(1, Ordering::Relaxed);
            guard.remove(&key)
          } else {
            None
          }
        };

        if let Some(Slot::Ready { entry, .. }) = removed {
          Metrics::incr(&self.metrics.evicted_by_capacity);
          self.notify(key, entry.value(), EvictionReason::Capacity);
        }
      }
    }
  }
}
