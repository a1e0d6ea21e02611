use super::lru_list::LruList;
use super::CachePolicy;

use parking_lot::Mutex;
use std::hash::Hash;

/// Evicts the least recently used entries first.
#[derive(Debug)]
pub struct LruPolicy<K: Eq + Hash + Clone> {
  list: Mutex<LruList<K>>,
}

impl<K: Eq + Hash + Clone> LruPolicy<K> {
  pub fn new() -> Self {
    Self {
      list: Mutex::new(LruList::new()),
    }
  }

  /// The number of keys currently tracked.
  pub fn len(&self) -> usize {
    self.list.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl<K: Eq + Hash + Clone> Default for LruPolicy<K> {
  fn default() -> Self {
    Self::new()
  }
}

impl<K> CachePolicy<K> for LruPolicy<K>
where
  K: Eq + Hash + Clone + Send + Sync,
{
  fn on_access(&self, key: &K) {
    self.list.lock().move_to_front(key);
  }

  fn on_insert(&self, key: &K) {
    self.list.lock().push_front(key.clone());
  }

  fn on_remove(&self, key: &K) {
    self.list.lock().remove(key);
  }

  fn evict(&self, count: usize) -> Vec<K> {
    let mut list = self.list.lock();
    let mut victims = Vec::with_capacity(count.min(list.len()));
    while victims.len() < count {
      match list.pop_back() {
        Some(key) => victims.push(key),
        None => break,
      }
    }
    victims
  }

  fn clear(&self) {
    self.list.lock().clear();
  }
}
