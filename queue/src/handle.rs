use crate::error::QueueError;
use crate::metrics::QueueMetricsSnapshot;
use crate::shared::QueueShared;

use tessera::{Disposable, LifecycleState};

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future;
use tracing::{debug, warn};

/// Coalesces many logical updates per key into one physical write.
///
/// The first update for an idle key opens a window of `delay`; every update
/// arriving within the window is merged into one accumulator, which is then
/// handed to the flush callback. Flushes for the same key never overlap.
///
/// Cloning is cheap and every clone feeds the same queue.
#[derive(Debug)]
pub struct CollapsedQueue<K, P> {
  pub(crate) shared: Arc<QueueShared<K, P>>,
}

impl<K, P> Clone for CollapsedQueue<K, P> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

impl<K, P> CollapsedQueue<K, P>
where
  K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
  P: Clone + Send + 'static,
{
  pub fn instance(&self) -> &str {
    self.shared.lifecycle.instance()
  }

  pub fn lifecycle_state(&self) -> LifecycleState {
    self.shared.lifecycle.state()
  }

  /// Adds an update for `key`. Never waits for I/O.
  pub fn enqueue(&self, key: K, update: P) -> Result<(), QueueError> {
    self.shared.enqueue(key, update)
  }

  /// Flushes every pending accumulator now and waits until those flushes,
  /// and any already running, have finished.
  pub async fn perform_all_now(&self) -> Result<(), QueueError> {
    self.shared.lifecycle.ensure_active()?;
    let flushes = self
      .shared
      .keys()
      .into_iter()
      .map(|key| self.shared.spawn_flush(key));
    future::join_all(flushes).await;
    Ok(())
  }

  /// The number of keys holding updates that have not been flushed yet.
  pub fn pending_len(&self) -> usize {
    self.shared.pending_len()
  }

  pub fn metrics(&self) -> QueueMetricsSnapshot {
    self.shared.metrics.snapshot(self.pending_len())
  }
}

#[async_trait]
impl<K, P> Disposable for CollapsedQueue<K, P>
where
  K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
  P: Clone + Send + 'static,
{
  /// Rejects new updates, flushes everything pending and waits up to the
  /// dispose timeout for the flushes to finish. Flushes still running after
  /// that see their cancellation token fire.
  async fn dispose(&self) {
    let shared = &self.shared;
    let lifecycle = &shared.lifecycle;
    if !lifecycle.begin_dispose() {
      lifecycle.disposed().await;
      return;
    }

    shared.stop_timers();
    let keys = shared.keys();
    let draining = keys.len();
    for key in keys {
      shared.spawn_flush(key);
    }
    shared.tracker.close();

    let timeout = shared.settings.dispose_timeout;
    if tokio::time::timeout(timeout, shared.tracker.wait()).await.is_err() {
      warn!(
        instance = %lifecycle.instance(),
        ?timeout,
        in_flight = shared.tracker.len(),
        "flushes still running at dispose timeout; cancelling them"
      );
    } else {
      debug!(instance = %lifecycle.instance(), draining, "queue drained");
    }

    lifecycle.finish_dispose();
  }

  fn lifecycle_state(&self) -> LifecycleState {
    self.shared.lifecycle.state()
  }
}
