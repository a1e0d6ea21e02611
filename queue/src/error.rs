use tessera::{BoxError, LifecycleError, Retryable};

use thiserror::Error;

/// Errors that can occur when building a queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
  #[error("shard count cannot be zero")]
  ZeroShards,
  /// `build()` was called outside of a Tokio runtime.
  #[error("the queue must be built from within a Tokio runtime")]
  RuntimeRequired,
}

/// The error returned by queue operations.
#[derive(Debug, Clone, Error)]
pub enum QueueError {
  #[error(transparent)]
  Lifecycle(#[from] LifecycleError),
}

impl Retryable for QueueError {
  fn is_retryable(&self) -> bool {
    match self {
      QueueError::Lifecycle(e) => e.is_retryable(),
    }
  }
}

/// A flush gave up on its payload. Delivered to the queue's error handler;
/// the payload itself is dropped.
#[derive(Debug, Error)]
#[error("flush of {key:?} failed after {attempts} attempt(s): {cause}")]
pub struct FlushError<K> {
  pub key: K,
  pub attempts: u32,
  #[source]
  pub cause: BoxError,
}

/// Causes produced by the queue itself rather than the flush callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FlushFailure {
  /// The flush callback panicked. The panic is contained so the key's gate
  /// is released.
  #[error("the flush callback panicked")]
  Panicked,
}
