use crate::backend::LockBackend;
use crate::config::LockConfig;
use crate::error::BuildError;
use crate::lock::{DistributedLock, LockInner};

use tessera::Lifecycle;

use std::sync::Arc;
use std::time::Duration;

pub(crate) const DEFAULT_TTL: Duration = Duration::from_secs(30);
pub(crate) const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(50);
pub(crate) const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(1);

/// A builder for [`DistributedLock`] instances.
#[derive(Clone)]
pub struct DistributedLockBuilder {
  backend: Arc<dyn LockBackend>,
  name: String,
  ttl: Duration,
  retry_delay: Duration,
  backoff_multiplier: f64,
  max_retry_delay: Duration,
}

impl DistributedLockBuilder {
  /// Starts a builder over `backend` with a fixed retry delay.
  pub fn new(backend: Arc<dyn LockBackend>) -> Self {
    Self {
      backend,
      name: "distributed".to_string(),
      ttl: DEFAULT_TTL,
      retry_delay: DEFAULT_RETRY_DELAY,
      backoff_multiplier: 1.0,
      max_retry_delay: DEFAULT_MAX_RETRY_DELAY,
    }
  }

  pub fn from_config(backend: Arc<dyn LockBackend>, config: &LockConfig) -> Self {
    Self::new(backend).with_config(config)
  }

  /// Names the instance for errors and log records (`lock:<name>`).
  pub fn name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  /// How long the backend keeps a lock whose holder never releases it.
  pub fn ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  pub fn retry_delay(mut self, delay: Duration) -> Self {
    self.retry_delay = delay;
    self
  }

  /// Grows the retry delay by `multiplier` after each failed attempt.
  /// `1.0` (the default) keeps it fixed.
  pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
    self.backoff_multiplier = multiplier;
    self
  }

  pub fn max_retry_delay(mut self, delay: Duration) -> Self {
    self.max_retry_delay = delay;
    self
  }

  pub fn with_config(mut self, config: &LockConfig) -> Self {
    if let Some(name) = &config.name {
      self.name = name.clone();
    }
    if let Some(ttl) = config.ttl {
      self.ttl = ttl;
    }
    if let Some(delay) = config.retry_delay {
      self.retry_delay = delay;
    }
    if let Some(multiplier) = config.backoff_multiplier {
      self.backoff_multiplier = multiplier;
    }
    if let Some(delay) = config.max_retry_delay {
      self.max_retry_delay = delay;
    }
    self
  }

  pub fn build(self) -> Result<DistributedLock, BuildError> {
    if self.ttl.is_zero() {
      return Err(BuildError::ZeroTtl);
    }
    if self.retry_delay.is_zero() {
      return Err(BuildError::ZeroRetryDelay);
    }
    if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
      return Err(BuildError::InvalidBackoff(self.backoff_multiplier.to_string()));
    }

    Ok(DistributedLock {
      inner: Arc::new(LockInner {
        backend: self.backend,
        ttl: self.ttl,
        retry_delay: self.retry_delay,
        backoff_multiplier: self.backoff_multiplier,
        max_retry_delay: self.max_retry_delay.max(self.retry_delay),
        lifecycle: Lifecycle::new(format!("lock:{}", self.name)),
      }),
    })
  }
}
