use crate::listener::{EvictionListener, EvictionReason};
use crate::runtime::TaskSpawner;

use tessera::CancellationToken;

use std::sync::Arc;

use tokio::sync::mpsc;

/// A message sent to the notifier task.
pub(crate) type Notification<K, V> = (K, Arc<V>, EvictionReason);

/// The sending half held by the cache. Sending never blocks.
pub(crate) struct Notifier<K, V> {
  sender: mpsc::UnboundedSender<Notification<K, V>>,
}

impl<K, V> Notifier<K, V>
where
  K: Send + 'static,
  V: Send + Sync + 'static,
{
  /// Spawns the task that feeds notifications to `listener`.
  ///
  /// The task exits when every sender is dropped, or when `shutdown` is
  /// cancelled, in which case notifications already queued are still
  /// delivered.
  pub(crate) fn spawn(
    listener: Arc<dyn EvictionListener<K, V>>,
    spawner: &dyn TaskSpawner,
    shutdown: CancellationToken,
  ) -> Self {
    let (sender, mut receiver) = mpsc::unbounded_channel::<Notification<K, V>>();

    spawner.spawn(Box::pin(async move {
      loop {
        tokio::select! {
          biased;
          message = receiver.recv() => match message {
            Some((key, value, reason)) => listener.on_evict(key, value, reason),
            None => break,
          },
          _ = shutdown.cancelled() => {
            while let Ok((key, value, reason)) = receiver.try_recv() {
              listener.on_evict(key, value, reason);
            }
            break;
          }
        }
      }
    }));

    Self { sender }
  }

  #[inline]
  pub(crate) fn notify(&self, key: K, value: Arc<V>, reason: EvictionReason) {
    // A closed channel only means the notifier already shut down.
    let _ = self.sender.send((key, value, reason));
  }
}
