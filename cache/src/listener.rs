use std::fmt;
use std::sync::Arc;

/// Describes the reason an entry was removed from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EvictionReason {
  /// The entry was removed due to exceeding the cache's capacity.
  Capacity,
  /// The entry's time-to-live elapsed.
  Expired,
  /// The entry was removed with `delete`.
  Invalidated,
  /// The entry was removed with `clear`.
  Cleared,
}

impl fmt::Display for EvictionReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      EvictionReason::Capacity => write!(f, "evicted due to capacity"),
      EvictionReason::Expired => write!(f, "evicted due to expiration"),
      EvictionReason::Invalidated => write!(f, "manually invalidated"),
      EvictionReason::Cleared => write!(f, "cleared"),
    }
  }
}

/// A listener that can be registered with the cache to receive notifications
/// when resolved entries leave it.
///
/// A typical use is broadcasting invalidations to peer processes that hold
/// their own copy of the same cache. Calls happen on a background task, in
/// removal order, and never while a shard lock is held.
pub trait EvictionListener<K, V>: Send + Sync {
  fn on_evict(&self, key: K, value: Arc<V>, reason: EvictionReason);
}

impl<K, V, F> EvictionListener<K, V> for F
where
  F: Fn(K, Arc<V>, EvictionReason) + Send + Sync,
{
  fn on_evict(&self, key: K, value: Arc<V>, reason: EvictionReason) {
    self(key, value, reason)
  }
}
