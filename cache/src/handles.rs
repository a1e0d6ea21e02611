use crate::bulk::BulkFetchResult;
use crate::error::{CacheError, LookupMiss};
use crate::listener::EvictionReason;
use crate::loader::FetchMode;
use crate::shared::{CacheShared, Lookup};
use crate::MetricsSnapshot;

use tessera::{Disposable, FetchFailedError, LifecycleState};

use std::collections::HashSet;
use std::fmt::Debug;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future;
use tracing::debug;

/// A fetch-through cache with single-flight deduplication.
///
/// Cloning is cheap and every clone shares the same entries. The cache lives
/// until the last clone is dropped; call [`Disposable::dispose`] for an
/// orderly shutdown that rejects further calls.
#[derive(Debug)]
pub struct QuantumCache<K, V, H = ahash::RandomState> {
  pub(crate) shared: Arc<CacheShared<K, V, H>>,
}

impl<K, V, H> Clone for QuantumCache<K, V, H> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

impl<K, V, H> QuantumCache<K, V, H>
where
  K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// The instance name used in errors and log records.
  pub fn instance(&self) -> &str {
    self.shared.lifecycle.instance()
  }

  pub fn lifecycle_state(&self) -> LifecycleState {
    self.shared.lifecycle.state()
  }

  /// Returns the cached value, fetching it on a miss.
  ///
  /// Concurrent calls for the same missing key share one fetcher invocation
  /// and all receive its result. A failed fetch is reported to every waiter
  /// and is not remembered: the next call fetches again.
  pub async fn get(&self, key: &K) -> Result<Arc<V>, CacheError> {
    self.shared.lifecycle.ensure_active()?;
    match self.resolve(key, FetchMode::Value, false).await? {
      Some(value) => Ok(value),
      None => Err(FetchFailedError::for_key(key, LookupMiss::NoValue).into()),
    }
  }

  /// Like [`get`](Self::get), for fetchers that can report that a key has
  /// no value. An absent value is returned as `None` and is not cached.
  pub async fn get_maybe(&self, key: &K) -> Result<Option<Arc<V>>, CacheError> {
    self.shared.lifecycle.ensure_active()?;
    self.resolve(key, FetchMode::Maybe, false).await
  }

  /// Fetches the key again even if a resolved value is cached, and installs
  /// the result. Joins a fetch already in flight instead of starting a
  /// second one.
  pub async fn refresh(&self, key: &K) -> Result<Arc<V>, CacheError> {
    self.shared.lifecycle.ensure_active()?;
    match self.resolve(key, FetchMode::Value, true).await? {
      Some(value) => Ok(value),
      None => Err(FetchFailedError::for_key(key, LookupMiss::NoValue).into()),
    }
  }

  async fn resolve(
    &self,
    key: &K,
    mode: FetchMode,
    refresh: bool,
  ) -> Result<Option<Arc<V>>, CacheError> {
    let future = match self.shared.lookup(key, refresh) {
      Lookup::Hit(value) => return Ok(Some(value)),
      Lookup::Join(future) => future,
      Lookup::Claimed(future, version) => {
        self
          .shared
          .spawn_fetch(key.clone(), version, future.clone(), mode);
        future
      }
    };
    Ok((&*future).await?)
  }

  /// Resolves many keys at once.
  ///
  /// Cached keys are answered directly, keys already being fetched are
  /// joined, and the remaining misses are fetched concurrently (at most
  /// `bulk_concurrency` at a time). Per-key failures are reported in the
  /// result; only a disposed cache fails the whole call.
  pub async fn bulk_get<I>(&self, keys: I) -> Result<BulkFetchResult<K, V>, CacheError>
  where
    I: IntoIterator<Item = K>,
  {
    self.shared.lifecycle.ensure_active()?;

    let mut seen = HashSet::new();
    let mut result = BulkFetchResult::default();
    let mut pending = Vec::new();
    let mut claims = Vec::new();

    for key in keys {
      if !seen.insert(key.clone()) {
        continue;
      }
      match self.shared.lookup(&key, false) {
        Lookup::Hit(value) => result.record(key, Ok(value)),
        Lookup::Join(future) => pending.push((key, future)),
        Lookup::Claimed(future, version) => {
          claims.push((key.clone(), version, future.clone()));
          pending.push((key, future));
        }
      }
    }

    self.shared.spawn_bulk_fetch(claims);

    let outcomes = future::join_all(pending.iter().map(|(_, load)| &**load)).await;
    for ((key, _), outcome) in pending.into_iter().zip(outcomes) {
      let outcome = match outcome {
        Ok(Some(value)) => Ok(value),
        Ok(None) => Err(FetchFailedError::for_key(&key, LookupMiss::NoValue)),
        Err(error) => Err(error),
      };
      result.record(key, outcome);
    }
    Ok(result)
  }

  /// Returns the cached value without fetching. Never fails; a disposed
  /// cache simply holds nothing.
  pub fn get_cached(&self, key: &K) -> Option<Arc<V>> {
    self.shared.peek(key)
  }

  /// `true` if a resolved, unexpired value is cached for `key`.
  pub fn contains(&self, key: &K) -> bool {
    let guard = self.shared.store.shard(key).lock();
    matches!(
      guard.get(key),
      Some(crate::entry::Slot::Ready { entry, .. }) if !entry.is_expired()
    )
  }

  /// Installs a value using the cache's default time-to-live. A fetch for
  /// the same key that is still in flight will not overwrite it.
  pub fn set(&self, key: K, value: V) -> Result<(), CacheError> {
    self.shared.lifecycle.ensure_active()?;
    self.shared.install(key, value, None);
    Ok(())
  }

  /// Installs a value with its own time-to-live, overriding the default.
  pub fn set_with_ttl(&self, key: K, value: V, ttl: Duration) -> Result<(), CacheError> {
    self.shared.lifecycle.ensure_active()?;
    self.shared.install(key, value, Some(ttl));
    Ok(())
  }

  pub fn set_many<I>(&self, entries: I) -> Result<(), CacheError>
  where
    I: IntoIterator<Item = (K, V)>,
  {
    self.shared.lifecycle.ensure_active()?;
    for (key, value) in entries {
      self.shared.install(key, value, None);
    }
    Ok(())
  }

  /// Removes a key, returning `true` if a resolved value was removed.
  ///
  /// A fetch in flight for the key keeps running for its waiters, but its
  /// result is not installed.
  pub fn delete(&self, key: &K) -> Result<bool, CacheError> {
    self.shared.lifecycle.ensure_active()?;
    Ok(self.shared.remove(key))
  }

  /// Removes every entry.
  pub fn clear(&self) -> Result<(), CacheError> {
    self.shared.lifecycle.ensure_active()?;
    self.shared.remove_all(Some(EvictionReason::Cleared));
    Ok(())
  }

  /// Sweeps expired entries now instead of waiting for the janitor.
  /// Returns the number of entries removed.
  pub fn gc(&self) -> usize {
    if !self.shared.lifecycle.is_active() {
      return 0;
    }
    self.shared.purge_expired()
  }

  /// The number of resolved entries, including expired ones not yet swept.
  pub fn len(&self) -> usize {
    self.shared.entries.load(Ordering::Relaxed)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn metrics(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot(self.len())
  }
}

#[async_trait]
impl<K, V, H> Disposable for QuantumCache<K, V, H>
where
  K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Rejects new calls, signals in-flight fetchers through the cancellation
  /// token and drops every entry. Fetches already running are not awaited;
  /// their results reach the callers waiting on them but are not installed.
  async fn dispose(&self) {
    let lifecycle = &self.shared.lifecycle;
    if !lifecycle.begin_dispose() {
      lifecycle.disposed().await;
      return;
    }

    lifecycle.abandon();
    let dropped = self.shared.remove_all(None);
    self.shared.policy.clear();
    debug!(instance = %lifecycle.instance(), dropped, "cache entries released");

    lifecycle.finish_dispose();
  }

  fn lifecycle_state(&self) -> LifecycleState {
    self.shared.lifecycle.state()
  }
}
