use crate::policy::CachePolicy;

/// The policy used by unbounded caches. It tracks nothing and never evicts.
#[derive(Debug, Default)]
pub struct NullPolicy;

impl<K> CachePolicy<K> for NullPolicy {
  fn on_access(&self, _key: &K) {}

  fn on_insert(&self, _key: &K) {}

  fn on_remove(&self, _key: &K) {}

  fn evict(&self, _count: usize) -> Vec<K> {
    Vec::new()
  }

  fn clear(&self) {}
}
