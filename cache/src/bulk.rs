use tessera::FetchFailedError;

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// The outcome of `bulk_get`: every distinct requested key lands in exactly
/// one of the two maps. A failure for one key never hides the values fetched
/// for the others.
pub struct BulkFetchResult<K, V> {
  succeeded: HashMap<K, Arc<V>>,
  failed: HashMap<K, FetchFailedError>,
}

impl<K, V> Default for BulkFetchResult<K, V> {
  fn default() -> Self {
    Self {
      succeeded: HashMap::new(),
      failed: HashMap::new(),
    }
  }
}

impl<K: fmt::Debug, V> fmt::Debug for BulkFetchResult<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BulkFetchResult")
      .field("succeeded", &self.succeeded.keys().collect::<Vec<_>>())
      .field("failed", &self.failed)
      .finish()
  }
}

impl<K: Eq + Hash, V> BulkFetchResult<K, V> {
  pub(crate) fn record(&mut self, key: K, outcome: Result<Arc<V>, FetchFailedError>) {
    match outcome {
      Ok(value) => {
        self.succeeded.insert(key, value);
      }
      Err(error) => {
        self.failed.insert(key, error);
      }
    }
  }

  /// The outcome for a single key, or `None` if it was not requested.
  pub fn get(&self, key: &K) -> Option<Result<&Arc<V>, &FetchFailedError>> {
    if let Some(value) = self.succeeded.get(key) {
      return Some(Ok(value));
    }
    self.failed.get(key).map(Err)
  }

  pub fn value(&self, key: &K) -> Option<&Arc<V>> {
    self.succeeded.get(key)
  }

  pub fn error(&self, key: &K) -> Option<&FetchFailedError> {
    self.failed.get(key)
  }

  pub fn succeeded(&self) -> &HashMap<K, Arc<V>> {
    &self.succeeded
  }

  pub fn failed(&self) -> &HashMap<K, FetchFailedError> {
    &self.failed
  }

  /// `true` when no key failed.
  pub fn is_complete(&self) -> bool {
    self.failed.is_empty()
  }

  /// The number of distinct keys covered.
  pub fn len(&self) -> usize {
    self.succeeded.len() + self.failed.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn into_parts(self) -> (HashMap<K, Arc<V>>, HashMap<K, FetchFailedError>) {
    (self.succeeded, self.failed)
  }
}
