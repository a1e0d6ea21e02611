use crate::entry::Slot;

use core::fmt;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

/// Hashes a key using a `BuildHasher`.
#[inline]
pub(crate) fn hash_key<K: Hash + ?Sized, H: BuildHasher>(hasher: &H, key: &K) -> u64 {
  hasher.hash_one(key)
}

pub(crate) type ShardMap<K, V, H> = HashMap<K, Slot<V>, H>;

/// The slot map, partitioned into independently locked shards.
///
/// Operations on keys that land in different shards never contend. A shard
/// lock is only ever held for map bookkeeping and never across an `.await`.
pub(crate) struct ShardedStore<K, V, H> {
  shards: Box<[CachePadded<Mutex<ShardMap<K, V, H>>>]>,
  hasher: H,
}

impl<K, V, H> fmt::Debug for ShardedStore<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ShardedStore")
      .field("num_shards", &self.shards.len())
      .finish()
  }
}

impl<K, V, H> ShardedStore<K, V, H>
where
  K: Eq + Hash,
  H: BuildHasher + Clone,
{
  /// Creates a store with `num_shards` shards. The builder guarantees a
  /// non-zero power of two.
  pub(crate) fn new(num_shards: usize, hasher: H) -> Self {
    let shards = (0..num_shards)
      .map(|_| CachePadded::new(Mutex::new(HashMap::with_hasher(hasher.clone()))))
      .collect::<Vec<_>>();

    Self {
      shards: shards.into_boxed_slice(),
      hasher,
    }
  }

  /// Returns the lock guarding the shard that owns `key`.
  #[inline]
  pub(crate) fn shard(&self, key: &K) -> &Mutex<ShardMap<K, V, H>> {
    let index = hash_key(&self.hasher, key) as usize & (self.shards.len() - 1);
    &self.shards[index]
  }

  /// Iterates over every shard lock, for whole-cache sweeps such as
  /// `clear()` and `gc()`.
  pub(crate) fn iter_shards(&self) -> impl Iterator<Item = &Mutex<ShardMap<K, V, H>>> {
    self.shards.iter().map(|padded| &**padded)
  }

  pub(crate) fn num_shards(&self) -> usize {
    self.shards.len()
  }
}
