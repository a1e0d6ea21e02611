use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// The error type returned by external collaborators (fetchers, flush
/// callbacks, lock backends).
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// A shareable cause. One failure is often delivered to many waiters, so the
/// underlying error is reference counted rather than cloned.
pub type SharedCause = Arc<dyn StdError + Send + Sync + 'static>;

/// Signals whether the caller may sensibly retry the failed operation.
pub trait Retryable {
  fn is_retryable(&self) -> bool;
}

/// An operation was invoked after `dispose()` began but before it completed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("`{instance}` is being disposed")]
pub struct DisposingError {
  /// Identifies the component instance that rejected the call.
  pub instance: Arc<str>,
}

/// An operation was invoked after the component was fully disposed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("`{instance}` has been disposed")]
pub struct DisposedError {
  /// Identifies the component instance that rejected the call.
  pub instance: Arc<str>,
}

/// The union of the two disposal-state violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
  #[error(transparent)]
  Disposing(#[from] DisposingError),
  #[error(transparent)]
  Disposed(#[from] DisposedError),
}

impl LifecycleError {
  /// The instance name of the component that raised the error.
  pub fn instance(&self) -> &str {
    match self {
      LifecycleError::Disposing(e) => &e.instance,
      LifecycleError::Disposed(e) => &e.instance,
    }
  }

  pub fn is_disposing(&self) -> bool {
    matches!(self, LifecycleError::Disposing(_))
  }

  pub fn is_disposed(&self) -> bool {
    matches!(self, LifecycleError::Disposed(_))
  }
}

impl Retryable for LifecycleError {
  /// Disposal is a programmer-level condition: stop issuing work.
  fn is_retryable(&self) -> bool {
    false
  }
}

/// The fetcher rejected one or more keys.
///
/// Cloning is cheap: the cause is shared between every waiter of the same
/// in-flight fetch.
#[derive(Debug, Clone, Error)]
#[error("fetch failed for [{}]: {cause}", .keys.join(", "))]
pub struct FetchFailedError {
  keys: Vec<String>,
  #[source]
  cause: SharedCause,
}

impl FetchFailedError {
  pub fn new(keys: Vec<String>, cause: impl Into<BoxError>) -> Self {
    Self {
      keys,
      cause: Arc::from(cause.into()),
    }
  }

  /// Builds an error for a single key, rendering the key with its `Debug`
  /// representation.
  pub fn for_key<K: fmt::Debug + ?Sized>(key: &K, cause: impl Into<BoxError>) -> Self {
    Self::new(vec![format!("{:?}", key)], cause)
  }

  /// Builds an error for a single key sharing an existing cause.
  pub fn with_shared_cause<K: fmt::Debug + ?Sized>(key: &K, cause: SharedCause) -> Self {
    Self {
      keys: vec![format!("{:?}", key)],
      cause,
    }
  }

  /// The names of the keys whose fetch failed.
  pub fn keys(&self) -> &[String] {
    &self.keys
  }

  pub fn cause(&self) -> &(dyn StdError + Send + Sync + 'static) {
    &*self.cause
  }

  /// Attempts to view the cause as a concrete error type.
  pub fn downcast_cause<E: StdError + 'static>(&self) -> Option<&E> {
    self.cause.downcast_ref::<E>()
  }
}

impl Retryable for FetchFailedError {
  /// Known failures decide for themselves; anything else is assumed transient.
  fn is_retryable(&self) -> bool {
    match self.downcast_cause::<IdentifiableError>() {
      Some(identified) => identified.is_retryable(),
      None => true,
    }
  }
}

/// The lock acquisition window elapsed without success.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("timed out after {waited:?} waiting for lock `{name}`")]
pub struct LockTimeoutError {
  pub name: String,
  pub waited: Duration,
}

impl Retryable for LockTimeoutError {
  fn is_retryable(&self) -> bool {
    true
  }
}

/// A known failure condition with a stable identifier that stays the same
/// across processes and releases, so that clients and peers can match on it.
#[derive(Debug, Clone, Error)]
#[error("{id}: {message}")]
pub struct IdentifiableError {
  id: Cow<'static, str>,
  message: Cow<'static, str>,
  retryable: bool,
  #[source]
  cause: Option<SharedCause>,
}

impl IdentifiableError {
  pub fn new(id: impl Into<Cow<'static, str>>, message: impl Into<Cow<'static, str>>) -> Self {
    Self {
      id: id.into(),
      message: message.into(),
      retryable: false,
      cause: None,
    }
  }

  /// Marks the condition as transient.
  pub fn retryable(mut self, retryable: bool) -> Self {
    self.retryable = retryable;
    self
  }

  pub fn with_cause(mut self, cause: impl Into<BoxError>) -> Self {
    self.cause = Some(Arc::from(cause.into()));
    self
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn message(&self) -> &str {
    &self.message
  }
}

impl PartialEq for IdentifiableError {
  /// Two identifiable errors describe the same condition when their ids match.
  fn eq(&self, other: &Self) -> bool {
    self.id == other.id
  }
}

impl Retryable for IdentifiableError {
  fn is_retryable(&self) -> bool {
    self.retryable
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[derive(Debug, Error)]
  #[error("connection reset")]
  struct ConnectionReset;

  #[test]
  fn fetch_failed_lists_every_key() {
    let err = FetchFailedError::new(vec!["a".into(), "b".into()], ConnectionReset);
    assert_eq!(err.keys(), &["a".to_string(), "b".to_string()]);
    assert_eq!(err.to_string(), "fetch failed for [a, b]: connection reset");
    assert!(err.source().is_some());
  }

  #[test]
  fn fetch_failed_retryability_follows_identified_cause() {
    let permanent = IdentifiableError::new("b2d3f1a0-not-found", "remote actor is gone");
    let err = FetchFailedError::for_key("https://remote.example/users/alice", permanent);
    assert!(!err.is_retryable());
    assert_eq!(err.downcast_cause::<IdentifiableError>().map(|e| e.id()), Some("b2d3f1a0-not-found"));

    let transient = IdentifiableError::new("7f0c-timeout", "remote timed out").retryable(true);
    assert!(FetchFailedError::for_key(&1, transient).is_retryable());
    assert!(FetchFailedError::for_key(&1, ConnectionReset).is_retryable());
  }

  #[test]
  fn lifecycle_errors_are_not_retryable() {
    let err: LifecycleError = DisposingError {
      instance: Arc::from("cache:users"),
    }
    .into();
    assert!(err.is_disposing());
    assert_eq!(err.instance(), "cache:users");
    assert!(!err.is_retryable());
    assert_eq!(err.to_string(), "`cache:users` is being disposed");
  }

  #[test]
  fn identifiable_errors_compare_by_id() {
    let a = IdentifiableError::new("dup", "first wording");
    let b = IdentifiableError::new("dup", "second wording").retryable(true);
    assert_eq!(a, b);
    assert_eq!(a.to_string(), "dup: first wording");
  }
}
