#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tessera_cache::{CacheBuilder, QuantumCache};

/// Counts fetcher invocations and records which keys were fetched.
#[derive(Clone, Default)]
pub struct FetchLog {
  calls: Arc<AtomicUsize>,
  keys: Arc<Mutex<Vec<i32>>>,
}

impl FetchLog {
  pub fn record(&self, key: i32) {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.keys.lock().push(key);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn distinct_keys(&self) -> HashSet<i32> {
    self.keys.lock().iter().copied().collect()
  }
}

/// A cache whose fetcher sleeps for `delay` and answers `key * 10` as a
/// string, failing for negative keys.
pub fn slow_cache(delay: Duration, log: FetchLog) -> QuantumCache<i32, String> {
  CacheBuilder::new()
    .name("test")
    .fetcher(move |key: i32, _cancel| {
      let log = log.clone();
      async move {
        log.record(key);
        tokio::time::sleep(delay).await;
        if key < 0 {
          Err(format!("no such key {key}"))
        } else {
          Ok((key * 10).to_string())
        }
      }
    })
    .build()
    .unwrap()
}
