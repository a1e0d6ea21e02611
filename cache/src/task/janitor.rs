use crate::runtime::TaskSpawner;
use crate::shared::CacheShared;

use tessera::CancellationToken;

use std::fmt::Debug;
use std::hash::{BuildHasher, Hash};
use std::sync::Weak;
use std::time::Duration;

use tracing::trace;

/// The background task that periodically sweeps expired entries.
///
/// Reads already treat expired entries as misses; the janitor exists so that
/// entries nobody reads again still leave memory and still reach the
/// eviction listener.
pub(crate) struct Janitor;

impl Janitor {
  /// Spawns the sweep loop. It holds only a weak reference to the cache and
  /// stops when the cache is dropped or `shutdown` is cancelled.
  pub(crate) fn spawn<K, V, H>(
    shared: Weak<CacheShared<K, V, H>>,
    tick_interval: Duration,
    spawner: &dyn TaskSpawner,
    shutdown: CancellationToken,
  ) where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
    H: BuildHasher + Clone + Send + Sync + 'static,
  {
    spawner.spawn(Box::pin(async move {
      loop {
        tokio::select! {
          _ = shutdown.cancelled() => break,
          _ = tokio::time::sleep(tick_interval) => {}
        }

        let Some(shared) = shared.upgrade() else {
          break;
        };
        let removed = shared.purge_expired();
        if removed > 0 {
          trace!(instance = %shared.lifecycle.instance(), removed, "janitor swept expired entries");
        }
      }
    }));
  }
}
