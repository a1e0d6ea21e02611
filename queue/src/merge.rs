//! How a new update folds into the pending accumulator of its key.

use std::collections::{BTreeMap, HashMap};
use std::hash::{BuildHasher, Hash};

/// Merges `update` into `pending`. Called under the queue's shard lock, so it
/// must be quick and must not block.
pub trait Collapse<P>: Send + Sync {
  fn collapse(&self, pending: &mut P, update: P);
}

impl<P, F> Collapse<P> for F
where
  F: Fn(&mut P, P) + Send + Sync,
{
  fn collapse(&self, pending: &mut P, update: P) {
    self(pending, update)
  }
}

/// Keeps only the newest update.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriteWins;

impl<P> Collapse<P> for LastWriteWins {
  fn collapse(&self, pending: &mut P, update: P) {
    *pending = update;
  }
}

/// Field-wise merge: every field of the update overwrites the same field of
/// the accumulator, fields absent from the update are kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShallowMerge;

/// Payloads [`ShallowMerge`] knows how to combine.
pub trait ShallowMergeable {
  fn shallow_merge(&mut self, update: Self);
}

impl<K: Eq + Hash, V, S: BuildHasher> ShallowMergeable for HashMap<K, V, S> {
  fn shallow_merge(&mut self, update: Self) {
    self.extend(update);
  }
}

impl<K: Ord, V> ShallowMergeable for BTreeMap<K, V> {
  fn shallow_merge(&mut self, mut update: Self) {
    self.append(&mut update);
  }
}

impl ShallowMergeable for serde_json::Map<String, serde_json::Value> {
  fn shallow_merge(&mut self, update: Self) {
    self.extend(update);
  }
}

impl<P: ShallowMergeable> Collapse<P> for ShallowMerge {
  fn collapse(&self, pending: &mut P, update: P) {
    pending.shallow_merge(update);
  }
}
