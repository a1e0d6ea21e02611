use crate::backend::LockBackend;
use crate::error::LockError;

use tessera::{Disposable, Lifecycle, LifecycleState, LockTimeoutError};

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, trace, warn};

pub(crate) struct LockInner {
  pub(crate) backend: Arc<dyn LockBackend>,
  pub(crate) ttl: Duration,
  pub(crate) retry_delay: Duration,
  pub(crate) backoff_multiplier: f64,
  pub(crate) max_retry_delay: Duration,
  pub(crate) lifecycle: Lifecycle,
}

/// A named mutual-exclusion lock shared by every process using the same
/// backend.
///
/// Cloning is cheap; clones share the backend and the lifecycle. There is no
/// fairness guarantee between waiters.
#[derive(Clone)]
pub struct DistributedLock {
  pub(crate) inner: Arc<LockInner>,
}

impl fmt::Debug for DistributedLock {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("DistributedLock")
      .field("instance", &self.inner.lifecycle.instance())
      .field("ttl", &self.inner.ttl)
      .field("retry_delay", &self.inner.retry_delay)
      .field("backoff_multiplier", &self.inner.backoff_multiplier)
      .finish_non_exhaustive()
  }
}

/// Proof of ownership of a lock name, consumed by
/// [`DistributedLock::release`].
#[derive(Debug)]
pub struct LockHandle {
  name: String,
  token: String,
  acquired_at: Instant,
  expires_at: Option<Instant>,
}

impl LockHandle {
  pub fn name(&self) -> &str {
    &self.name
  }

  /// The random token identifying this holder in the backend.
  pub fn token(&self) -> &str {
    &self.token
  }

  pub fn acquired_at(&self) -> Instant {
    self.acquired_at
  }

  /// When the backend forgets the lock unless it is released first. `None`
  /// for a ttl too large to represent as an `Instant`.
  pub fn expires_at(&self) -> Option<Instant> {
    self.expires_at
  }

  pub fn is_expired(&self) -> bool {
    self.expires_at.is_some_and(|at| Instant::now() >= at)
  }
}

/// 128 random bits, hex encoded.
fn new_token() -> String {
  format!("{:032x}", rand::random::<u128>())
}

impl DistributedLock {
  pub fn instance(&self) -> &str {
    self.inner.lifecycle.instance()
  }

  pub fn lifecycle_state(&self) -> LifecycleState {
    self.inner.lifecycle.state()
  }

  /// Acquires `name`, retrying until `timeout` elapses.
  ///
  /// At least one attempt is made even with a zero timeout. Between attempts
  /// the task sleeps for the retry delay, grown by the backoff multiplier up
  /// to the maximum delay, and never past the deadline. A timeout too large
  /// to represent (such as `Duration::MAX`) waits without a deadline.
  pub async fn acquire(&self, name: &str, timeout: Duration) -> Result<LockHandle, LockError> {
    let inner = &self.inner;
    inner.lifecycle.ensure_active()?;

    let token = new_token();
    let cancellation = inner.lifecycle.cancellation();
    let started = Instant::now();
    let deadline = started.checked_add(timeout);
    let mut delay = inner.retry_delay;
    let mut attempt: u32 = 0;

    loop {
      attempt += 1;
      if inner.backend.set_if_absent(name, &token, inner.ttl).await? {
        let acquired_at = Instant::now();
        trace!(instance = %inner.lifecycle.instance(), lock = name, attempt, "lock acquired");
        return Ok(LockHandle {
          name: name.to_string(),
          token,
          acquired_at,
          expires_at: acquired_at.checked_add(inner.ttl),
        });
      }

      let now = Instant::now();
      let mut pause = delay;
      if let Some(deadline) = deadline {
        if now >= deadline {
          debug!(instance = %inner.lifecycle.instance(), lock = name, attempt, "lock acquisition timed out");
          return Err(
            LockTimeoutError {
              name: name.to_string(),
              waited: now - started,
            }
            .into(),
          );
        }
        pause = pause.min(deadline - now);
      }

      tokio::select! {
        _ = tokio::time::sleep(pause) => {}
        _ = cancellation.cancelled() => {}
      }
      inner.lifecycle.ensure_active()?;
      delay = self.next_delay(delay);
    }
  }

  fn next_delay(&self, current: Duration) -> Duration {
    let inner = &self.inner;
    if inner.backoff_multiplier <= 1.0 {
      return current;
    }
    Duration::try_from_secs_f64(current.as_secs_f64() * inner.backoff_multiplier)
      .map_or(inner.max_retry_delay, |next| next.min(inner.max_retry_delay))
  }

  /// Releases a lock. Releasing a lock that already expired, or that another
  /// holder took over after expiry, does nothing.
  ///
  /// Allowed after disposal so that holders can still clean up.
  pub async fn release(&self, handle: LockHandle) -> Result<(), LockError> {
    let released = self
      .inner
      .backend
      .delete_if_matches(&handle.name, &handle.token)
      .await?;
    if released {
      trace!(instance = %self.inner.lifecycle.instance(), lock = %handle.name, "lock released");
    } else {
      debug!(
        instance = %self.inner.lifecycle.instance(),
        lock = %handle.name,
        held_for = ?handle.acquired_at.elapsed(),
        "lock was no longer held at release"
      );
    }
    Ok(())
  }

  /// Acquires `name` and returns a guard that releases it.
  pub async fn lock(&self, name: &str, timeout: Duration) -> Result<LockGuard, LockError> {
    let handle = self.acquire(name, timeout).await?;
    Ok(LockGuard {
      lock: self.clone(),
      handle: Some(handle),
    })
  }

  /// Runs `critical` while holding `name`. The lock is released however the
  /// critical section ends; its output is returned unchanged.
  pub async fn with_lock<F, Fut, T>(&self, name: &str, timeout: Duration, critical: F) -> Result<T, LockError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
  {
    let guard = self.lock(name, timeout).await?;
    let output = critical().await;
    guard.release().await?;
    Ok(output)
  }
}

#[async_trait]
impl Disposable for DistributedLock {
  /// Rejects new acquisitions and stops acquisition loops at their next
  /// retry. Locks already held stay valid until released or expired.
  async fn dispose(&self) {
    let lifecycle = &self.inner.lifecycle;
    if !lifecycle.begin_dispose() {
      lifecycle.disposed().await;
      return;
    }
    lifecycle.abandon();
    lifecycle.finish_dispose();
  }

  fn lifecycle_state(&self) -> LifecycleState {
    self.inner.lifecycle.state()
  }
}

/// Holds a lock until [`release`](LockGuard::release)d or dropped.
///
/// Dropping the guard without releasing spawns a best-effort release on the
/// current Tokio runtime. Outside of a runtime the lock is left to expire.
#[derive(Debug)]
pub struct LockGuard {
  lock: DistributedLock,
  handle: Option<LockHandle>,
}

impl LockGuard {
  pub fn name(&self) -> &str {
    self.handle.as_ref().map_or("", LockHandle::name)
  }

  pub fn handle(&self) -> Option<&LockHandle> {
    self.handle.as_ref()
  }

  pub async fn release(mut self) -> Result<(), LockError> {
    match self.handle.take() {
      Some(handle) => self.lock.release(handle).await,
      None => Ok(()),
    }
  }
}

impl Drop for LockGuard {
  fn drop(&mut self) {
    let Some(handle) = self.handle.take() else {
      return;
    };
    match tokio::runtime::Handle::try_current() {
      Ok(runtime) => {
        let lock = self.lock.clone();
        runtime.spawn(async move {
          let name = handle.name.clone();
          if let Err(error) = lock.release(handle).await {
            warn!(lock = %name, %error, "background lock release failed");
          }
        });
      }
      Err(_) => {
        warn!(lock = %handle.name, "lock guard dropped outside a runtime; leaving it to expire");
      }
    }
  }
}
