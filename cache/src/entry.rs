use crate::loader::LoadFuture;
use crate::time;

use std::sync::Arc;
use std::time::Duration;

/// A resolved value together with its expiry deadline.
#[derive(Debug)]
pub(crate) struct CacheEntry<V> {
  value: Arc<V>,
  /// Deadline in nanoseconds since the cache epoch. 0 means no TTL.
  expires_at: u64,
}

impl<V> CacheEntry<V> {
  pub(crate) fn new(value: Arc<V>, ttl: Option<Duration>) -> Self {
    Self {
      value,
      expires_at: ttl.map_or(0, time::deadline_after),
    }
  }

  #[inline]
  pub(crate) fn value(&self) -> Arc<V> {
    self.value.clone()
  }

  #[inline]
  pub(crate) fn is_expired_at(&self, now_nanos: u64) -> bool {
    self.expires_at > 0 && now_nanos >= self.expires_at
  }

  #[inline]
  pub(crate) fn is_expired(&self) -> bool {
    self.is_expired_at(time::now_nanos())
  }
}

/// The per-key state held by a shard.
///
/// A key is either resolved or has exactly one fetch in flight, never both.
/// `version` is drawn from the cache-wide counter whenever the slot is
/// (re)created, so a completing fetch can tell whether the slot it started
/// from is still the one in the map.
pub(crate) enum Slot<V> {
  Ready {
    entry: CacheEntry<V>,
    version: u64,
  },
  Loading {
    future: Arc<LoadFuture<V>>,
    version: u64,
  },
}

impl<V> Slot<V> {
  #[inline]
  pub(crate) fn version(&self) -> u64 {
    match self {
      Slot::Ready { version, .. } | Slot::Loading { version, .. } => *version,
    }
  }

  #[inline]
  pub(crate) fn is_ready(&self) -> bool {
    matches!(self, Slot::Ready { .. })
  }
}
