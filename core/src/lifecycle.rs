use crate::error::{DisposedError, DisposingError, LifecycleError};

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// The disposal state of a component. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LifecycleState {
  Active = 0,
  Disposing = 1,
  Disposed = 2,
}

impl LifecycleState {
  fn from_u8(raw: u8) -> Self {
    match raw {
      0 => LifecycleState::Active,
      1 => LifecycleState::Disposing,
      _ => LifecycleState::Disposed,
    }
  }
}

impl fmt::Display for LifecycleState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      LifecycleState::Active => write!(f, "active"),
      LifecycleState::Disposing => write!(f, "disposing"),
      LifecycleState::Disposed => write!(f, "disposed"),
    }
  }
}

/// The disposal state machine embedded by every stateful component.
///
/// Public operations call [`Lifecycle::ensure_active`] before doing any work.
/// `dispose()` implementations call [`Lifecycle::begin_dispose`], drain or
/// abandon their in-flight work, and finish with
/// [`Lifecycle::finish_dispose`].
pub struct Lifecycle {
  instance: Arc<str>,
  state: AtomicU8,
  // Cancelled when the owner decides to abandon in-flight callbacks.
  abandon: CancellationToken,
  // Cancelled once the state reaches `Disposed`.
  disposed: CancellationToken,
}

impl fmt::Debug for Lifecycle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Lifecycle")
      .field("instance", &self.instance)
      .field("state", &self.state())
      .finish()
  }
}

impl Lifecycle {
  /// Creates an `Active` lifecycle for the named component instance.
  pub fn new(instance: impl Into<Arc<str>>) -> Self {
    Self {
      instance: instance.into(),
      state: AtomicU8::new(LifecycleState::Active as u8),
      abandon: CancellationToken::new(),
      disposed: CancellationToken::new(),
    }
  }

  pub fn instance(&self) -> &Arc<str> {
    &self.instance
  }

  #[inline]
  pub fn state(&self) -> LifecycleState {
    LifecycleState::from_u8(self.state.load(Ordering::Acquire))
  }

  #[inline]
  pub fn is_active(&self) -> bool {
    self.state() == LifecycleState::Active
  }

  /// Fails with the error matching the current state unless `Active`.
  #[inline]
  pub fn ensure_active(&self) -> Result<(), LifecycleError> {
    match self.state() {
      LifecycleState::Active => Ok(()),
      LifecycleState::Disposing => Err(
        DisposingError {
          instance: self.instance.clone(),
        }
        .into(),
      ),
      LifecycleState::Disposed => Err(
        DisposedError {
          instance: self.instance.clone(),
        }
        .into(),
      ),
    }
  }

  /// Moves `Active -> Disposing`.
  ///
  /// Returns `false` if disposal had already begun, in which case the caller
  /// must not run its drain logic a second time.
  pub fn begin_dispose(&self) -> bool {
    let started = self
      .state
      .compare_exchange(
        LifecycleState::Active as u8,
        LifecycleState::Disposing as u8,
        Ordering::AcqRel,
        Ordering::Acquire,
      )
      .is_ok();
    if started {
      debug!(instance = %self.instance, "dispose started");
    }
    started
  }

  /// Moves `Disposing -> Disposed` and wakes every task awaiting
  /// [`Lifecycle::disposed`]. Also abandons any remaining callbacks.
  pub fn finish_dispose(&self) {
    let previous = self
      .state
      .swap(LifecycleState::Disposed as u8, Ordering::AcqRel);
    if previous != LifecycleState::Disposed as u8 {
      self.abandon.cancel();
      self.disposed.cancel();
      debug!(instance = %self.instance, "dispose finished");
    }
  }

  /// Signals fetch/flush callbacks that their results will be discarded.
  pub fn abandon(&self) {
    self.abandon.cancel();
  }

  /// A token handed to callbacks. Cancelled when in-flight work is abandoned.
  pub fn cancellation(&self) -> CancellationToken {
    self.abandon.clone()
  }

  /// Resolves once the state is `Disposed`.
  pub async fn disposed(&self) {
    self.disposed.cancelled().await
  }
}

/// A component with an explicit asynchronous shutdown.
///
/// `dispose` is idempotent: a second call waits for the first to complete and
/// then returns without doing any work of its own.
#[async_trait]
pub trait Disposable: Send + Sync {
  async fn dispose(&self);

  fn lifecycle_state(&self) -> LifecycleState;
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  #[test]
  fn active_lifecycle_accepts_work() {
    let lifecycle = Lifecycle::new("queue:test");
    assert!(lifecycle.is_active());
    assert!(lifecycle.ensure_active().is_ok());
    assert!(!lifecycle.cancellation().is_cancelled());
  }

  #[test]
  fn transitions_are_monotonic() {
    let lifecycle = Lifecycle::new("queue:test");

    assert!(lifecycle.begin_dispose());
    assert_eq!(lifecycle.state(), LifecycleState::Disposing);
    assert!(lifecycle.ensure_active().unwrap_err().is_disposing());
    assert!(!lifecycle.begin_dispose(), "second dispose must be a no-op");

    lifecycle.finish_dispose();
    assert_eq!(lifecycle.state(), LifecycleState::Disposed);
    let err = lifecycle.ensure_active().unwrap_err();
    assert!(err.is_disposed());
    assert_eq!(err.instance(), "queue:test");
    assert!(!lifecycle.begin_dispose());
    assert!(lifecycle.cancellation().is_cancelled());
  }

  #[tokio::test]
  async fn waiters_wake_when_disposed() {
    let lifecycle = Arc::new(Lifecycle::new("lock:test"));
    assert!(lifecycle.begin_dispose());

    let waiter = tokio::spawn({
      let lifecycle = lifecycle.clone();
      async move { lifecycle.disposed().await }
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    lifecycle.finish_dispose();
    tokio::time::timeout(Duration::from_secs(1), waiter)
      .await
      .expect("waiter should wake")
      .unwrap();
  }
}
