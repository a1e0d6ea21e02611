use crate::config::CacheConfig;
use crate::error::BuildError;
use crate::handles::QuantumCache;
use crate::listener::EvictionListener;
use crate::loader::{BulkFetchFn, FetchFn, Fetchers, MaybeFetchFn};
use crate::policy::{CachePolicy, LruPolicy, NullPolicy};
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::shared::CacheShared;
use crate::store::ShardedStore;
use crate::task::janitor::Janitor;
use crate::task::notifier::Notifier;

use tessera::{BoxError, CancellationToken, Lifecycle};

use core::fmt;
use std::fmt::Debug;
use std::future::Future;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;

pub(crate) const DEFAULT_NAME: &str = "quantum";
pub(crate) const DEFAULT_BULK_CONCURRENCY: usize = 16;
pub(crate) const DEFAULT_BULK_BATCH_SIZE: usize = 100;
pub(crate) const DEFAULT_JANITOR_INTERVAL: Duration = Duration::from_secs(1);

/// A builder for [`QuantumCache`] instances.
pub struct CacheBuilder<K, V, H = ahash::RandomState> {
  name: String,
  capacity: Option<usize>,
  shards: usize,
  time_to_live: Option<Duration>,
  janitor_interval: Option<Duration>,
  bulk_concurrency: usize,
  bulk_batch_size: usize,
  hasher: H,
  listener: Option<Arc<dyn EvictionListener<K, V>>>,
  cache_policy: Option<Arc<dyn CachePolicy<K>>>,
  fetchers: Fetchers<K, V>,
  spawner: Option<Arc<dyn TaskSpawner>>,
}

impl<K, V, H> fmt::Debug for CacheBuilder<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheBuilder")
      .field("name", &self.name)
      .field("capacity", &self.capacity)
      .field("shards", &self.shards)
      .field("time_to_live", &self.time_to_live)
      .field("bulk_concurrency", &self.bulk_concurrency)
      .field("has_fetcher", &self.fetchers.single.is_some())
      .field("has_maybe_fetcher", &self.fetchers.maybe.is_some())
      .field("has_bulk_fetcher", &self.fetchers.bulk.is_some())
      .field("has_listener", &self.listener.is_some())
      .finish_non_exhaustive()
  }
}

// --- General Configuration Methods ---
impl<K, V, H> CacheBuilder<K, V, H> {
  /// Names the cache instance. The name shows up in lifecycle errors and
  /// log records as `cache:<name>`.
  pub fn name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  /// Bounds the cache to `capacity` resolved entries. Unless a custom policy
  /// is set, least recently used entries are evicted first.
  pub fn capacity(mut self, capacity: usize) -> Self {
    self.capacity = Some(capacity);
    self
  }

  /// Sets the number of independently locked shards. Rounded up to a power
  /// of two.
  pub fn shards(mut self, shards: usize) -> Self {
    self.shards = shards.max(1).next_power_of_two();
    self
  }

  /// Sets the default time-to-live of every entry.
  pub fn time_to_live(mut self, duration: Duration) -> Self {
    self.time_to_live = Some(duration);
    self
  }

  /// Sets how often the janitor sweeps expired entries. Defaults to one
  /// second when a time-to-live is configured.
  pub fn janitor_interval(mut self, interval: Duration) -> Self {
    self.janitor_interval = Some(interval);
    self
  }

  /// Bounds how many fetcher calls (or bulk batches) a single `bulk_get`
  /// runs at once.
  pub fn bulk_concurrency(mut self, limit: usize) -> Self {
    self.bulk_concurrency = limit;
    self
  }

  /// Sets how many keys are handed to the bulk fetcher per call.
  pub fn bulk_batch_size(mut self, size: usize) -> Self {
    self.bulk_batch_size = size;
    self
  }

  /// Registers a listener for entries leaving the cache.
  pub fn eviction_listener<Listener>(mut self, listener: Listener) -> Self
  where
    Listener: EvictionListener<K, V> + 'static,
  {
    self.listener = Some(Arc::new(listener));
    self
  }

  /// Sets a custom size-eviction policy. Only consulted when a capacity is
  /// configured.
  pub fn cache_policy<Policy>(mut self, policy: Policy) -> Self
  where
    Policy: CachePolicy<K> + 'static,
  {
    self.cache_policy = Some(Arc::new(policy));
    self
  }

  /// Sets the spawner for fetches and background tasks. Defaults to the
  /// Tokio runtime current at `build()` time.
  pub fn spawner(mut self, spawner: Arc<dyn TaskSpawner>) -> Self {
    self.spawner = Some(spawner);
    self
  }

  /// Sets the hasher used to pick shards.
  pub fn hasher<H2>(self, hasher: H2) -> CacheBuilder<K, V, H2> {
    CacheBuilder {
      name: self.name,
      capacity: self.capacity,
      shards: self.shards,
      time_to_live: self.time_to_live,
      janitor_interval: self.janitor_interval,
      bulk_concurrency: self.bulk_concurrency,
      bulk_batch_size: self.bulk_batch_size,
      hasher,
      listener: self.listener,
      cache_policy: self.cache_policy,
      fetchers: self.fetchers,
      spawner: self.spawner,
    }
  }

  /// Applies every field present in `config`.
  pub fn with_config(mut self, config: &CacheConfig) -> Self {
    if let Some(name) = &config.name {
      self.name = name.clone();
    }
    if let Some(capacity) = config.capacity {
      self.capacity = Some(capacity);
    }
    if let Some(shards) = config.shards {
      self = self.shards(shards);
    }
    if let Some(ttl) = config.time_to_live {
      self.time_to_live = Some(ttl);
    }
    if let Some(interval) = config.janitor_interval {
      self.janitor_interval = Some(interval);
    }
    if let Some(limit) = config.bulk_concurrency {
      self.bulk_concurrency = limit;
    }
    if let Some(size) = config.bulk_batch_size {
      self.bulk_batch_size = size;
    }
    self
  }
}

// --- Fetchers ---
impl<K, V, H> CacheBuilder<K, V, H>
where
  K: Send + 'static,
  V: Send + 'static,
{
  /// Sets the fetcher called for a missing key.
  ///
  /// The token is cancelled when the cache is disposed; a fetcher that
  /// honours it can abort its outbound work early.
  pub fn fetcher<F, Fut, E>(mut self, f: F) -> Self
  where
    F: Fn(K, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<V, E>> + Send + 'static,
    E: Into<BoxError> + 'static,
  {
    let fetch: FetchFn<K, V> = Arc::new(move |key, token| f(key, token).map(|r| r.map_err(Into::into)).boxed());
    self.fetchers.single = Some(fetch);
    self
  }

  /// Sets a fetcher that can report that a key has no value (`Ok(None)`).
  /// Used by `get_maybe`, and by `get` when no plain fetcher is set.
  pub fn maybe_fetcher<F, Fut, E>(mut self, f: F) -> Self
  where
    F: Fn(K, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Option<V>, E>> + Send + 'static,
    E: Into<BoxError> + 'static,
  {
    let fetch: MaybeFetchFn<K, V> = Arc::new(move |key, token| f(key, token).map(|r| r.map_err(Into::into)).boxed());
    self.fetchers.maybe = Some(fetch);
    self
  }

  /// Sets a fetcher resolving many keys per call, used by `bulk_get` in
  /// place of one fetcher call per key. Keys it leaves out of its answer
  /// fail individually.
  pub fn bulk_fetcher<F, Fut, R, E>(mut self, f: F) -> Self
  where
    F: Fn(Vec<K>, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoIterator<Item = (K, Result<V, E>)>,
    E: Into<BoxError> + 'static,
  {
    let fetch: BulkFetchFn<K, V> = Arc::new(move |keys, token| {
      f(keys, token)
        .map(|answers| {
          answers
            .into_iter()
            .map(|(key, result)| (key, result.map_err(Into::into)))
            .collect::<Vec<_>>()
        })
        .boxed()
    });
    self.fetchers.bulk = Some(fetch);
    self
  }
}

// --- Default Constructor ---
impl<K, V, H: BuildHasher + Default> CacheBuilder<K, V, H> {
  /// Creates a new `CacheBuilder` with default settings: unbounded, no
  /// time-to-live, no fetcher.
  pub fn new() -> Self {
    Self {
      name: DEFAULT_NAME.to_string(),
      capacity: None,
      shards: (num_cpus::get() * 4).max(1).next_power_of_two(),
      time_to_live: None,
      janitor_interval: None,
      bulk_concurrency: DEFAULT_BULK_CONCURRENCY,
      bulk_batch_size: DEFAULT_BULK_BATCH_SIZE,
      hasher: H::default(),
      listener: None,
      cache_policy: None,
      fetchers: Fetchers::default(),
      spawner: None,
    }
  }

  /// Creates a builder seeded from a deserialized configuration.
  pub fn from_config(config: &CacheConfig) -> Self {
    Self::new().with_config(config)
  }
}

impl<K, V> Default for CacheBuilder<K, V, ahash::RandomState> {
  fn default() -> Self {
    Self::new()
  }
}

// --- Build Methods ---
impl<K, V, H> CacheBuilder<K, V, H>
where
  K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Builds the cache and starts its background tasks.
  pub fn build(self) -> Result<QuantumCache<K, V, H>, BuildError> {
    self.validate()?;

    let spawner: Arc<dyn TaskSpawner> = match self.spawner {
      Some(spawner) => spawner,
      None => Arc::new(TokioSpawner::try_current().ok_or(BuildError::SpawnerRequired)?),
    };

    let lifecycle = Lifecycle::new(format!("cache:{}", self.name));
    let shutdown = lifecycle.cancellation();

    let policy: Arc<dyn CachePolicy<K>> = match (self.cache_policy, self.capacity) {
      (Some(policy), _) => policy,
      (None, Some(_)) => Arc::new(LruPolicy::new()),
      (None, None) => Arc::new(NullPolicy),
    };

    let notifier = self
      .listener
      .map(|listener| Notifier::spawn(listener, &*spawner, shutdown.clone()));

    let shared = Arc::new(CacheShared::new(
      ShardedStore::new(self.shards, self.hasher),
      policy,
      self.capacity,
      self.time_to_live,
      self.fetchers,
      self.bulk_concurrency,
      self.bulk_batch_size,
      spawner.clone(),
      notifier,
      lifecycle,
    ));

    let janitor_interval = self
      .janitor_interval
      .or(self.time_to_live.map(|_| DEFAULT_JANITOR_INTERVAL));
    if let Some(interval) = janitor_interval {
      Janitor::spawn(Arc::downgrade(&shared), interval, &*spawner, shutdown);
    }

    Ok(QuantumCache { shared })
  }

  /// Validates the builder configuration.
  fn validate(&self) -> Result<(), BuildError> {
    if self.capacity == Some(0) {
      return Err(BuildError::ZeroCapacity);
    }
    if self.shards == 0 {
      return Err(BuildError::ZeroShards);
    }
    if self.bulk_concurrency == 0 || self.bulk_batch_size == 0 {
      return Err(BuildError::ZeroBulkLimit);
    }
    Ok(())
  }
}
