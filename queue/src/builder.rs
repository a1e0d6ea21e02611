use crate::config::QueueConfig;
use crate::error::{BuildError, FlushError};
use crate::handle::CollapsedQueue;
use crate::merge::Collapse;
use crate::shared::{ErrorHandler, FlushFn, FlushLock, LockNameFn, QueueSettings, QueueShared};

use tessera::{BoxError, CancellationToken, Lifecycle};
use tessera_lock::DistributedLock;

use std::fmt::{self, Debug};
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;

pub(crate) const DEFAULT_NAME: &str = "collapsed";
pub(crate) const DEFAULT_DELAY: Duration = Duration::from_secs(5);
pub(crate) const DEFAULT_MAX_RETRIES: u32 = 2;
pub(crate) const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);
pub(crate) const DEFAULT_DISPOSE_TIMEOUT: Duration = Duration::from_secs(10);
pub(crate) const DEFAULT_FLUSH_LOCK_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const DEFAULT_SHARDS: usize = 16;

/// A builder for [`CollapsedQueue`] instances.
///
/// The merge function and the flush callback are required up front; every
/// other setting has a default.
pub struct CollapsedQueueBuilder<K, P> {
  name: String,
  merge: Arc<dyn Collapse<P>>,
  flush: FlushFn<K, P>,
  on_error: Option<ErrorHandler<K>>,
  flush_lock: Option<(DistributedLock, LockNameFn<K>)>,
  flush_lock_timeout: Duration,
  delay: Duration,
  max_retries: u32,
  retry_delay: Duration,
  dispose_timeout: Duration,
  shards: usize,
}

impl<K, P> fmt::Debug for CollapsedQueueBuilder<K, P> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CollapsedQueueBuilder")
      .field("name", &self.name)
      .field("delay", &self.delay)
      .field("max_retries", &self.max_retries)
      .field("retry_delay", &self.retry_delay)
      .field("dispose_timeout", &self.dispose_timeout)
      .field("has_error_handler", &self.on_error.is_some())
      .field("has_flush_lock", &self.flush_lock.is_some())
      .finish_non_exhaustive()
  }
}

impl<K, P> CollapsedQueueBuilder<K, P>
where
  K: Send + 'static,
  P: Send + 'static,
{
  /// Starts a builder from the merge function and the flush callback.
  ///
  /// The callback may be invoked more than once for the same payload when a
  /// retry follows a failure, so it should be idempotent.
  pub fn new<M, F, Fut, E>(merge: M, flush: F) -> Self
  where
    M: Collapse<P> + 'static,
    F: Fn(K, P, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Into<BoxError> + 'static,
  {
    let flush: FlushFn<K, P> =
      Arc::new(move |key, payload, token| flush(key, payload, token).map(|r| r.map_err(Into::into)).boxed());
    Self {
      name: DEFAULT_NAME.to_string(),
      merge: Arc::new(merge),
      flush,
      on_error: None,
      flush_lock: None,
      flush_lock_timeout: DEFAULT_FLUSH_LOCK_TIMEOUT,
      delay: DEFAULT_DELAY,
      max_retries: DEFAULT_MAX_RETRIES,
      retry_delay: DEFAULT_RETRY_DELAY,
      dispose_timeout: DEFAULT_DISPOSE_TIMEOUT,
      shards: DEFAULT_SHARDS,
    }
  }
}

impl<K, P> CollapsedQueueBuilder<K, P> {
  /// Names the instance for errors and log records (`queue:<name>`).
  pub fn name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  /// The window between the first update of an idle key and its flush.
  pub fn delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  /// How many times a failed flush is retried before the payload is handed
  /// to the error handler and dropped.
  pub fn max_retries(mut self, retries: u32) -> Self {
    self.max_retries = retries;
    self
  }

  pub fn retry_delay(mut self, delay: Duration) -> Self {
    self.retry_delay = delay;
    self
  }

  /// How long `dispose` waits for the final flushes.
  pub fn dispose_timeout(mut self, timeout: Duration) -> Self {
    self.dispose_timeout = timeout;
    self
  }

  /// Rounded up to a power of two.
  pub fn shards(mut self, shards: usize) -> Self {
    self.shards = shards.max(1).next_power_of_two();
    self
  }

  /// Receives every payload that could not be flushed. Without a handler
  /// such failures are logged at `warn` level.
  pub fn on_error<F>(mut self, handler: F) -> Self
  where
    F: Fn(FlushError<K>) + Send + Sync + 'static,
  {
    self.on_error = Some(Arc::new(handler));
    self
  }

  /// Holds the distributed lock `name(&key)` around every flush attempt, so
  /// that processes sharing the lock backend never flush one key at once.
  pub fn flush_lock<F>(mut self, lock: DistributedLock, name: F) -> Self
  where
    F: Fn(&K) -> String + Send + Sync + 'static,
  {
    let name: LockNameFn<K> = Arc::new(name);
    self.flush_lock = Some((lock, name));
    self
  }

  /// How long a flush attempt waits for its distributed lock.
  pub fn flush_lock_timeout(mut self, timeout: Duration) -> Self {
    self.flush_lock_timeout = timeout;
    self
  }

  pub fn with_config(mut self, config: &QueueConfig) -> Self {
    if let Some(name) = &config.name {
      self.name = name.clone();
    }
    if let Some(delay) = config.delay {
      self.delay = delay;
    }
    if let Some(retries) = config.max_retries {
      self.max_retries = retries;
    }
    if let Some(delay) = config.retry_delay {
      self.retry_delay = delay;
    }
    if let Some(timeout) = config.dispose_timeout {
      self.dispose_timeout = timeout;
    }
    if let Some(timeout) = config.flush_lock_timeout {
      self.flush_lock_timeout = timeout;
    }
    if let Some(shards) = config.shards {
      self = self.shards(shards);
    }
    self
  }
}

impl<K, P> CollapsedQueueBuilder<K, P>
where
  K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
  P: Clone + Send + 'static,
{
  /// Builds the queue. Timers and flushes run on the Tokio runtime current
  /// at this point.
  pub fn build(self) -> Result<CollapsedQueue<K, P>, BuildError> {
    if self.shards == 0 {
      return Err(BuildError::ZeroShards);
    }
    let runtime = tokio::runtime::Handle::try_current().map_err(|_| BuildError::RuntimeRequired)?;

    let flush_lock = self.flush_lock.map(|(lock, name)| FlushLock {
      lock,
      name,
      timeout: self.flush_lock_timeout,
    });

    let shared = QueueShared::new(
      self.shards,
      self.merge,
      self.flush,
      self.on_error,
      flush_lock,
      QueueSettings {
        delay: self.delay,
        max_retries: self.max_retries,
        retry_delay: self.retry_delay,
        dispose_timeout: self.dispose_timeout,
      },
      runtime,
      Lifecycle::new(format!("queue:{}", self.name)),
    );

    Ok(CollapsedQueue {
      shared: Arc::new(shared),
    })
  }
}
