use crate::error::{FlushError, FlushFailure, QueueError};
use crate::merge::Collapse;
use crate::metrics::QueueMetrics;

use tessera::{BoxError, CancellationToken, Lifecycle};
use tessera_lock::DistributedLock;

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::hash::{BuildHasher, Hash};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_utils::CachePadded;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace, warn};

pub(crate) type FlushFn<K, P> =
  Arc<dyn Fn(K, P, CancellationToken) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

pub(crate) type ErrorHandler<K> = Arc<dyn Fn(FlushError<K>) + Send + Sync>;

pub(crate) type LockNameFn<K> = Arc<dyn Fn(&K) -> String + Send + Sync>;

/// Serializes each key's flush across processes through a distributed lock.
pub(crate) struct FlushLock<K> {
  pub(crate) lock: DistributedLock,
  pub(crate) name: LockNameFn<K>,
  pub(crate) timeout: Duration,
}

/// Per-key state. The entry lives while any of the three fields is in use.
struct KeyState<P> {
  pending: Option<P>,
  /// The id of the one armed flush timer, if any.
  timer: Option<u64>,
  /// Held for the duration of a flush so that one key never has two.
  gate: Arc<tokio::sync::Mutex<()>>,
}

impl<P> KeyState<P> {
  fn new() -> Self {
    Self {
      pending: None,
      timer: None,
      gate: Arc::new(tokio::sync::Mutex::new(())),
    }
  }
}

type ShardMap<K, P> = HashMap<K, KeyState<P>, ahash::RandomState>;

pub(crate) struct QueueSettings {
  pub(crate) delay: Duration,
  pub(crate) max_retries: u32,
  pub(crate) retry_delay: Duration,
  pub(crate) dispose_timeout: Duration,
}

pub(crate) struct QueueShared<K, P> {
  shards: Box<[CachePadded<Mutex<ShardMap<K, P>>>]>,
  hasher: ahash::RandomState,
  merge: Arc<dyn Collapse<P>>,
  flush: FlushFn<K, P>,
  on_error: Option<ErrorHandler<K>>,
  flush_lock: Option<FlushLock<K>>,
  pub(crate) settings: QueueSettings,
  timer_ids: AtomicU64,
  /// Cancelled when disposal starts; armed timers exit without flushing.
  stop_timers: CancellationToken,
  pub(crate) tracker: TaskTracker,
  runtime: Handle,
  pub(crate) metrics: QueueMetrics,
  pub(crate) lifecycle: Lifecycle,
}

impl<K, P> fmt::Debug for QueueShared<K, P> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueueShared")
      .field("lifecycle", &self.lifecycle)
      .field("delay", &self.settings.delay)
      .field("max_retries", &self.settings.max_retries)
      .field("in_flight", &self.tracker.len())
      .finish_non_exhaustive()
  }
}

#[allow(clippy::too_many_arguments)]
impl<K, P> QueueShared<K, P>
where
  K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
  P: Clone + Send + 'static,
{
  pub(crate) fn new(
    num_shards: usize,
    merge: Arc<dyn Collapse<P>>,
    flush: FlushFn<K, P>,
    on_error: Option<ErrorHandler<K>>,
    flush_lock: Option<FlushLock<K>>,
    settings: QueueSettings,
    runtime: Handle,
    lifecycle: Lifecycle,
  ) -> Self {
    let hasher = ahash::RandomState::new();
    let shards = (0..num_shards)
      .map(|_| CachePadded::new(Mutex::new(HashMap::with_hasher(hasher.clone()))))
      .collect();
    Self {
      shards,
      hasher,
      merge,
      flush,
      on_error,
      flush_lock,
      settings,
      timer_ids: AtomicU64::new(0),
      stop_timers: CancellationToken::new(),
      tracker: TaskTracker::new(),
      runtime,
      metrics: QueueMetrics::default(),
      lifecycle,
    }
  }

  #[inline]
  fn shard(&self, key: &K) -> &Mutex<ShardMap<K, P>> {
    let index = self.hasher.hash_one(key) as usize & (self.shards.len() - 1);
    &self.shards[index]
  }

  /// Merges `update` into the key's accumulator and arms its flush timer if
  /// none is armed. The lifecycle is checked under the shard lock so that an
  /// accepted update is always seen by a concurrent `dispose`.
  pub(crate) fn enqueue(self: &Arc<Self>, key: K, update: P) -> Result<(), QueueError> {
    let armed = {
      let mut guard = self.shard(&key).lock();
      self.lifecycle.ensure_active()?;

      let state = guard.entry(key.clone()).or_insert_with(KeyState::new);
      match &mut state.pending {
        Some(pending) => {
          self.merge.collapse(pending, update);
          QueueMetrics::incr(&self.metrics.collapsed);
        }
        None => state.pending = Some(update),
      }

      match state.timer {
        Some(_) => None,
        None => {
          let id = self.timer_ids.fetch_add(1, Ordering::Relaxed) + 1;
          state.timer = Some(id);
          Some(id)
        }
      }
    };

    QueueMetrics::incr(&self.metrics.enqueued);
    if let Some(id) = armed {
      self.arm_timer(key, id);
    }
    Ok(())
  }

  /// The window is fixed at arming time; later enqueues do not push it back.
  fn arm_timer(self: &Arc<Self>, key: K, id: u64) {
    let shared = Arc::clone(self);
    self.tracker.spawn_on(
      async move {
        tokio::select! {
          _ = shared.stop_timers.cancelled() => return,
          _ = tokio::time::sleep(shared.settings.delay) => {}
        }
        shared.flush_key(key, Some(id)).await;
      },
      &self.runtime,
    );
  }

  /// Every key that has an entry: pending work, an armed timer or a flush in
  /// progress.
  pub(crate) fn keys(&self) -> Vec<K> {
    self
      .shards
      .iter()
      .flat_map(|shard| shard.lock().keys().cloned().collect::<Vec<_>>())
      .collect()
  }

  pub(crate) fn pending_len(&self) -> usize {
    self
      .shards
      .iter()
      .map(|shard| shard.lock().values().filter(|s| s.pending.is_some()).count())
      .sum()
  }

  /// Spawns an immediate flush of `key` on the tracker.
  pub(crate) fn spawn_flush(self: &Arc<Self>, key: K) -> tokio::task::JoinHandle<()> {
    let shared = Arc::clone(self);
    self
      .tracker
      .spawn_on(async move { shared.flush_key(key, None).await }, &self.runtime)
  }

  pub(crate) fn stop_timers(&self) {
    self.stop_timers.cancel();
  }

  /// Flushes the key's accumulator once its gate is free.
  ///
  /// With `timer`, only the timer that is still armed for the key may flush;
  /// a superseded timer does nothing. Without it the accumulator is taken
  /// unconditionally and any armed timer becomes stale.
  async fn flush_key(&self, key: K, timer: Option<u64>) {
    let gate = {
      let guard = self.shard(&key).lock();
      match guard.get(&key) {
        Some(state) => state.gate.clone(),
        None => return,
      }
    };

    let permit = gate.lock().await;
    let payload = {
      let mut guard = self.shard(&key).lock();
      match guard.get_mut(&key) {
        Some(state) if timer.is_none() || state.timer == timer => {
          state.timer = None;
          state.pending.take()
        }
        _ => None,
      }
    };

    if let Some(payload) = payload {
      self.deliver(&key, payload).await;
    }
    drop(permit);
    drop(gate);

    let mut guard = self.shard(&key).lock();
    let idle = guard.get(&key).is_some_and(|state| {
      state.pending.is_none() && state.timer.is_none() && Arc::strong_count(&state.gate) == 1
    });
    if idle {
      guard.remove(&key);
    }
  }

  /// Runs the flush callback, retrying up to `max_retries` times. A payload
  /// that still fails is reported and dropped.
  async fn deliver(&self, key: &K, payload: P) {
    let token = self.lifecycle.cancellation();
    let mut attempts: u32 = 0;

    let cause = loop {
      attempts += 1;
      let cause = match self.attempt(key, payload.clone(), token.clone()).await {
        Ok(()) => {
          QueueMetrics::incr(&self.metrics.flushes);
          trace!(instance = %self.lifecycle.instance(), ?key, attempts, "flushed");
          return;
        }
        Err(cause) => cause,
      };

      if attempts > self.settings.max_retries || token.is_cancelled() {
        break cause;
      }
      QueueMetrics::incr(&self.metrics.retries);
      debug!(instance = %self.lifecycle.instance(), ?key, attempt = attempts, error = %cause, "flush failed; retrying");

      tokio::select! {
        _ = tokio::time::sleep(self.settings.retry_delay) => {}
        _ = token.cancelled() => break cause,
      }
    };

    QueueMetrics::incr(&self.metrics.flush_failures);
    QueueMetrics::incr(&self.metrics.dropped);
    let error = FlushError {
      key: key.clone(),
      attempts,
      cause,
    };
    match &self.on_error {
      Some(handler) => handler(error),
      None => warn!(instance = %self.lifecycle.instance(), %error, "payload dropped"),
    }
  }

  async fn attempt(&self, key: &K, payload: P, token: CancellationToken) -> Result<(), BoxError> {
    let guarded = async move {
      let call = (self.flush)(key.clone(), payload, token);
      match &self.flush_lock {
        Some(flush_lock) => {
          let name = (flush_lock.name)(key);
          match flush_lock.lock.with_lock(&name, flush_lock.timeout, || call).await {
            Ok(result) => result,
            Err(error) => Err(Box::new(error) as BoxError),
          }
        }
        None => call.await,
      }
    };

    AssertUnwindSafe(guarded)
      .catch_unwind()
      .await
      .unwrap_or_else(|_| Err(Box::new(FlushFailure::Panicked) as BoxError))
  }
}
