use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_utils::CachePadded;

/// A thread-safe, internal metrics collector for the cache.
/// All fields are atomic to allow for lock-free updates.
#[derive(Debug)]
pub(crate) struct Metrics {
  // --- Lookups ---
  pub(crate) hits: CachePadded<AtomicU64>,
  pub(crate) misses: CachePadded<AtomicU64>,
  pub(crate) coalesced: CachePadded<AtomicU64>,

  // --- Fetches ---
  pub(crate) fetches: CachePadded<AtomicU64>,
  pub(crate) fetch_failures: CachePadded<AtomicU64>,
  pub(crate) discarded_results: CachePadded<AtomicU64>,

  // --- Writes ---
  pub(crate) inserts: CachePadded<AtomicU64>,
  pub(crate) invalidations: CachePadded<AtomicU64>,

  // --- Evictions ---
  pub(crate) evicted_by_capacity: CachePadded<AtomicU64>,
  pub(crate) evicted_by_ttl: CachePadded<AtomicU64>,

  created_at: Instant,
}

impl Default for Metrics {
  fn default() -> Self {
    Self {
      hits: CachePadded::new(AtomicU64::new(0)),
      misses: CachePadded::new(AtomicU64::new(0)),
      coalesced: CachePadded::new(AtomicU64::new(0)),
      fetches: CachePadded::new(AtomicU64::new(0)),
      fetch_failures: CachePadded::new(AtomicU64::new(0)),
      discarded_results: CachePadded::new(AtomicU64::new(0)),
      inserts: CachePadded::new(AtomicU64::new(0)),
      invalidations: CachePadded::new(AtomicU64::new(0)),
      evicted_by_capacity: CachePadded::new(AtomicU64::new(0)),
      evicted_by_ttl: CachePadded::new(AtomicU64::new(0)),
      created_at: Instant::now(),
    }
  }
}

impl Metrics {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  #[inline]
  pub(crate) fn incr(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
  }

  /// Creates a point-in-time snapshot of the current metrics.
  pub(crate) fn snapshot(&self, entries: usize) -> MetricsSnapshot {
    let hits = self.hits.load(Ordering::Relaxed);
    let misses = self.misses.load(Ordering::Relaxed);
    let coalesced = self.coalesced.load(Ordering::Relaxed);
    let total_lookups = hits + misses + coalesced;

    MetricsSnapshot {
      hits,
      misses,
      coalesced,
      hit_ratio: if total_lookups == 0 {
        0.0
      } else {
        hits as f64 / total_lookups as f64
      },
      fetches: self.fetches.load(Ordering::Relaxed),
      fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
      discarded_results: self.discarded_results.load(Ordering::Relaxed),
      inserts: self.inserts.load(Ordering::Relaxed),
      invalidations: self.invalidations.load(Ordering::Relaxed),
      evicted_by_capacity: self.evicted_by_capacity.load(Ordering::Relaxed),
      evicted_by_ttl: self.evicted_by_ttl.load(Ordering::Relaxed),
      entries,
      uptime_secs: self.created_at.elapsed().as_secs(),
    }
  }
}

/// A point-in-time, public-facing snapshot of the cache's metrics.
#[derive(Clone)]
pub struct MetricsSnapshot {
  /// Lookups answered from a resolved, unexpired entry.
  pub hits: u64,
  /// Lookups that started a fetch.
  pub misses: u64,
  /// Lookups that joined a fetch already in flight.
  pub coalesced: u64,
  /// hits / (hits + misses + coalesced).
  pub hit_ratio: f64,
  /// Fetches completed (successful or not).
  pub fetches: u64,
  /// Fetches that ended in a `FetchFailedError`.
  pub fetch_failures: u64,
  /// Fetch results that were not installed because the slot had been
  /// replaced, deleted or the cache disposed in the meantime.
  pub discarded_results: u64,
  /// Values installed, either by `set` or by a completed fetch.
  pub inserts: u64,
  /// Entries removed by `delete` or `clear`.
  pub invalidations: u64,
  pub evicted_by_capacity: u64,
  pub evicted_by_ttl: u64,
  /// Resolved entries currently held.
  pub entries: usize,
  pub uptime_secs: u64,
}

impl fmt::Debug for MetricsSnapshot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MetricsSnapshot")
      .field("hits", &self.hits)
      .field("misses", &self.misses)
      .field("coalesced", &self.coalesced)
      .field("hit_ratio", &format!("{:.2}%", self.hit_ratio * 100.0))
      .field("fetches", &self.fetches)
      .field("fetch_failures", &self.fetch_failures)
      .field("discarded_results", &self.discarded_results)
      .field("inserts", &self.inserts)
      .field("invalidations", &self.invalidations)
      .field("evicted_by_capacity", &self.evicted_by_capacity)
      .field("evicted_by_ttl", &self.evicted_by_ttl)
      .field("entries", &self.entries)
      .field("uptime_secs", &self.uptime_secs)
      .finish()
  }
}
