use std::{collections::HashMap, hash::Hash};

use generational_arena::{Arena, Index};

#[derive(Debug)]
struct Node<K> {
  key: K,
  next: Option<Index>,
  prev: Option<Index>,
}

/// An arena-backed doubly linked list of keys with O(1) lookup, move-to-front
/// and removal. The head is the most recently used key.
#[derive(Debug)]
pub(super) struct LruList<K: Eq + Hash + Clone> {
  nodes: Arena<Node<K>>,
  lookup: HashMap<K, Index>,
  head: Option<Index>,
  tail: Option<Index>,
}

impl<K: Eq + Hash + Clone> LruList<K> {
  pub fn new() -> Self {
    Self {
      nodes: Arena::new(),
      lookup: HashMap::new(),
      head: None,
      tail: None,
    }
  }

  fn unlink(&mut self, index: Index) {
    let (prev, next) = {
      let node = &self.nodes[index];
      (node.prev, node.next)
    };

    match prev {
      Some(prev_idx) => self.nodes[prev_idx].next = next,
      None => self.head = next,
    }
    match next {
      Some(next_idx) => self.nodes[next_idx].prev = prev,
      None => self.tail = prev,
    }
  }

  fn link_front(&mut self, index: Index) {
    let old_head = self.head;
    self.nodes[index].next = old_head;
    self.nodes[index].prev = None;
    self.head = Some(index);

    if let Some(old_head) = old_head {
      self.nodes[old_head].prev = Some(index);
    }
    if self.tail.is_none() {
      self.tail = Some(index);
    }
  }

  pub fn len(&self) -> usize {
    self.lookup.len()
  }

  #[cfg(test)]
  pub fn contains(&self, key: &K) -> bool {
    self.lookup.contains_key(key)
  }

  /// Inserts `key` at the front, or moves it there if already present.
  pub fn push_front(&mut self, key: K) {
    if self.lookup.contains_key(&key) {
      self.move_to_front(&key);
      return;
    }
    let index = self.nodes.insert(Node {
      key: key.clone(),
      next: None,
      prev: None,
    });
    self.lookup.insert(key, index);
    self.link_front(index);
  }

  pub fn move_to_front(&mut self, key: &K) {
    if let Some(&index) = self.lookup.get(key) {
      if self.head != Some(index) {
        self.unlink(index);
        self.link_front(index);
      }
    }
  }

  pub fn pop_back(&mut self) -> Option<K> {
    let tail = self.tail?;
    let key = self.nodes[tail].key.clone();
    self.remove(&key);
    Some(key)
  }

  pub fn remove(&mut self, key: &K) -> bool {
    match self.lookup.remove(key) {
      Some(index) => {
        self.unlink(index);
        self.nodes.remove(index);
        true
      }
      None => false,
    }
  }

  pub fn clear(&mut self) {
    self.nodes.clear();
    self.lookup.clear();
    self.head = None;
    self.tail = None;
  }

  #[cfg(test)]
  fn keys_as_vec(&self) -> Vec<K> {
    let mut keys = Vec::new();
    let mut current = self.head;
    while let Some(index) = current {
      keys.push(self.nodes[index].key.clone());
      current = self.nodes[index].next;
    }
    keys
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn new_list_is_empty() {
    let list = LruList::<i32>::new();
    assert!(list.keys_as_vec().is_empty());
    assert_eq!(list.len(), 0);
    assert!(!list.contains(&123));
  }

  #[test]
  fn push_front_orders_newest_first() {
    let mut list = LruList::new();
    list.push_front(10);
    list.push_front(20);
    assert_eq!(list.keys_as_vec(), vec![20, 10]);
    assert_eq!(list.len(), 2);
  }

  #[test]
  fn push_front_existing_item_moves_to_front() {
    let mut list = LruList::new();
    list.push_front(1);
    list.push_front(2);
    list.push_front(3);

    list.push_front(1);
    assert_eq!(list.len(), 3, "re-pushing must not duplicate");
    assert_eq!(list.keys_as_vec(), vec![1, 3, 2]);
  }

  #[test]
  fn pop_back_returns_least_recent() {
    let mut list = LruList::new();
    list.push_front(1);
    list.push_front(2);
    list.push_front(3);
    list.move_to_front(&1);

    assert_eq!(list.pop_back(), Some(2));
    assert_eq!(list.keys_as_vec(), vec![1, 3]);
    assert!(!list.contains(&2));
  }

  #[test]
  fn pop_back_from_empty_list() {
    let mut list = LruList::<i32>::new();
    assert_eq!(list.pop_back(), None);
  }

  #[test]
  fn remove_item_from_middle() {
    let mut list = LruList::new();
    list.push_front(1);
    list.push_front(2);
    list.push_front(3);

    assert!(list.remove(&2));
    assert!(!list.remove(&2));
    assert_eq!(list.keys_as_vec(), vec![3, 1]);

    // Head and tail stay consistent after removing both ends.
    assert!(list.remove(&3));
    assert!(list.remove(&1));
    assert_eq!(list.pop_back(), None);
  }

  #[test]
  fn clear_resets_list() {
    let mut list = LruList::new();
    list.push_front(1);
    list.push_front(2);
    list.clear();
    assert!(list.keys_as_vec().is_empty());
    assert_eq!(list.len(), 0);
  }
}
