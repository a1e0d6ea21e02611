use crate::backend::BackendError;

use tessera::{LifecycleError, LockTimeoutError, Retryable};

use thiserror::Error;

/// Errors that can occur when building a lock.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
  #[error("lock time-to-live cannot be zero")]
  ZeroTtl,
  #[error("retry delay cannot be zero")]
  ZeroRetryDelay,
  /// The multiplier must be finite and at least `1.0`.
  #[error("invalid backoff multiplier {0}")]
  InvalidBackoff(String),
}

/// The error returned by lock operations.
#[derive(Debug, Error)]
pub enum LockError {
  #[error(transparent)]
  Timeout(#[from] LockTimeoutError),
  #[error(transparent)]
  Lifecycle(#[from] LifecycleError),
  #[error(transparent)]
  Backend(#[from] BackendError),
}

impl LockError {
  pub fn is_timeout(&self) -> bool {
    matches!(self, LockError::Timeout(_))
  }
}

impl Retryable for LockError {
  fn is_retryable(&self) -> bool {
    match self {
      LockError::Timeout(e) => e.is_retryable(),
      LockError::Lifecycle(e) => e.is_retryable(),
      LockError::Backend(_) => true,
    }
  }
}
