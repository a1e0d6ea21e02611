use tessera::{FetchFailedError, LifecycleError, Retryable};

use thiserror::Error;

/// Errors that can occur when building a cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
  /// A bounded cache needs room for at least one entry. Leave the capacity
  /// unset for an unbounded cache.
  #[error("bounded cache capacity cannot be zero")]
  ZeroCapacity,
  #[error("shard count cannot be zero")]
  ZeroShards,
  #[error("bulk concurrency and batch size must be at least one")]
  ZeroBulkLimit,
  /// No `TaskSpawner` was configured and the builder was not called from
  /// within a Tokio runtime.
  #[error("a task spawner is required outside of a Tokio runtime")]
  SpawnerRequired,
}

/// The error returned by cache operations.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
  #[error(transparent)]
  Fetch(#[from] FetchFailedError),
  #[error(transparent)]
  Lifecycle(#[from] LifecycleError),
}

impl CacheError {
  pub fn as_fetch_failed(&self) -> Option<&FetchFailedError> {
    match self {
      CacheError::Fetch(e) => Some(e),
      CacheError::Lifecycle(_) => None,
    }
  }

  pub fn as_lifecycle(&self) -> Option<&LifecycleError> {
    match self {
      CacheError::Lifecycle(e) => Some(e),
      CacheError::Fetch(_) => None,
    }
  }
}

impl Retryable for CacheError {
  fn is_retryable(&self) -> bool {
    match self {
      CacheError::Fetch(e) => e.is_retryable(),
      CacheError::Lifecycle(e) => e.is_retryable(),
    }
  }
}

/// Causes attached to a `FetchFailedError` by the cache itself, as opposed
/// to errors produced by the fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LookupMiss {
  /// The "maybe" fetcher reported that the key has no value, but the caller
  /// required one.
  #[error("the fetcher returned no value")]
  NoValue,
  /// The bulk fetcher answered without mentioning this key.
  #[error("the bulk fetcher omitted this key")]
  MissingFromBatch,
  /// The cache was built without any fetcher.
  #[error("no fetcher is configured")]
  NoFetcher,
  /// The fetcher panicked. The panic is contained so waiters are released.
  #[error("the fetcher panicked")]
  Panicked,
}
