//! Size-bounded eviction.
//!
//! Expiry is handled by the cache itself; a policy only decides which
//! resolved keys to drop when the cache holds more entries than its
//! configured capacity.

pub mod lru;
mod lru_list;
pub mod null;

pub use lru::LruPolicy;
pub use null::NullPolicy;

/// A trait for implementing cache eviction policies.
///
/// `on_insert` and `on_remove` run while the cache holds the key's shard
/// lock, so the policy sees them in the same order as the store. `on_access`
/// and `evict` run without it. An implementation may take its own locks but
/// must not call back into the cache.
pub trait CachePolicy<K>: Send + Sync {
  /// A resolved entry was read.
  fn on_access(&self, key: &K);

  /// A resolved entry was installed, either by `set` or by a fetch.
  fn on_insert(&self, key: &K);

  /// A resolved entry was removed for any reason other than this policy's
  /// own `evict` decision.
  fn on_remove(&self, key: &K);

  /// Chooses up to `count` victims and stops tracking them.
  fn evict(&self, count: usize) -> Vec<K>;

  /// Clears all state from the policy.
  fn clear(&self);
}
