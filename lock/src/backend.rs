//! The storage seam behind [`DistributedLock`](crate::DistributedLock).
//!
//! A backend only needs two atomic operations; Redis (`SET NX PX` plus a
//! compare-and-delete script), a SQL row with a unique key, or the bundled
//! [`InMemoryLockBackend`] all qualify.

use tessera::BoxError;

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

/// The backend could not answer. The lock treats this as a hard failure of
/// the current call; it does not retry on its own.
#[derive(Debug, Error)]
#[error("lock backend failed: {cause}")]
pub struct BackendError {
  #[source]
  cause: BoxError,
}

impl BackendError {
  pub fn new(cause: impl Into<BoxError>) -> Self {
    Self {
      cause: cause.into(),
    }
  }
}

/// Atomic conditional writes over named keys.
#[async_trait]
pub trait LockBackend: Send + Sync + 'static {
  /// Stores `token` under `name` for `ttl` unless an unexpired value is
  /// already present. Returns whether the value was stored.
  async fn set_if_absent(&self, name: &str, token: &str, ttl: Duration) -> Result<bool, BackendError>;

  /// Removes `name` only if it still holds `token`. Returns whether a value
  /// was removed.
  async fn delete_if_matches(&self, name: &str, token: &str) -> Result<bool, BackendError>;
}

struct Held {
  token: String,
  /// `None` when the ttl reaches past what `Instant` can represent.
  expires_at: Option<Instant>,
}

impl Held {
  fn is_live(&self, now: Instant) -> bool {
    self.expires_at.map_or(true, |at| at > now)
  }
}

/// A process-local backend. Locks taken through it exclude other tasks of
/// the same process only; useful for tests and single-node deployments.
#[derive(Default)]
pub struct InMemoryLockBackend {
  held: Mutex<HashMap<String, Held>>,
}

impl fmt::Debug for InMemoryLockBackend {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("InMemoryLockBackend")
      .field("held", &self.held.lock().len())
      .finish()
  }
}

impl InMemoryLockBackend {
  pub fn new() -> Self {
    Self::default()
  }

  /// `true` if an unexpired lock is held under `name`.
  pub fn is_held(&self, name: &str) -> bool {
    let now = Instant::now();
    self
      .held
      .lock()
      .get(name)
      .is_some_and(|held| held.is_live(now))
  }
}

#[async_trait]
impl LockBackend for InMemoryLockBackend {
  async fn set_if_absent(&self, name: &str, token: &str, ttl: Duration) -> Result<bool, BackendError> {
    let now = Instant::now();
    let mut held = self.held.lock();
    if let Some(current) = held.get(name) {
      if current.is_live(now) {
        return Ok(false);
      }
    }
    held.insert(
      name.to_string(),
      Held {
        token: token.to_string(),
        expires_at: now.checked_add(ttl),
      },
    );
    Ok(true)
  }

  async fn delete_if_matches(&self, name: &str, token: &str) -> Result<bool, BackendError> {
    let now = Instant::now();
    let mut held = self.held.lock();
    match held.get(name) {
      Some(current) if current.token == token => {
        let live = current.is_live(now);
        held.remove(name);
        Ok(live)
      }
      Some(current) if !current.is_live(now) => {
        held.remove(name);
        Ok(false)
      }
      _ => Ok(false),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn second_token_is_refused_until_release() {
    let backend = InMemoryLockBackend::new();
    let ttl = Duration::from_secs(10);

    assert!(backend.set_if_absent("a", "t1", ttl).await.unwrap());
    assert!(!backend.set_if_absent("a", "t2", ttl).await.unwrap());
    assert!(backend.is_held("a"));

    assert!(!backend.delete_if_matches("a", "t2").await.unwrap());
    assert!(backend.delete_if_matches("a", "t1").await.unwrap());
    assert!(!backend.is_held("a"));
    assert!(backend.set_if_absent("a", "t2", ttl).await.unwrap());
  }

  #[tokio::test]
  async fn expired_lock_can_be_taken_over() {
    let backend = InMemoryLockBackend::new();

    assert!(backend.set_if_absent("a", "t1", Duration::from_millis(10)).await.unwrap());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!backend.is_held("a"));

    assert!(backend.set_if_absent("a", "t2", Duration::from_secs(1)).await.unwrap());
    // The stale owner cannot delete the new owner's lock.
    assert!(!backend.delete_if_matches("a", "t1").await.unwrap());
    assert!(backend.is_held("a"));
  }

  #[tokio::test]
  async fn unbounded_ttl_never_expires() {
    let backend = InMemoryLockBackend::new();

    assert!(backend.set_if_absent("a", "t1", Duration::MAX).await.unwrap());
    assert!(backend.is_held("a"));
    assert!(!backend.set_if_absent("a", "t2", Duration::from_secs(1)).await.unwrap());
    assert!(backend.delete_if_matches("a", "t1").await.unwrap());
  }
}
