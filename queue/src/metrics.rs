use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::CachePadded;

#[derive(Debug, Default)]
pub(crate) struct QueueMetrics {
  pub(crate) enqueued: CachePadded<AtomicU64>,
  pub(crate) collapsed: CachePadded<AtomicU64>,
  pub(crate) flushes: CachePadded<AtomicU64>,
  pub(crate) flush_failures: CachePadded<AtomicU64>,
  pub(crate) retries: CachePadded<AtomicU64>,
  pub(crate) dropped: CachePadded<AtomicU64>,
}

impl QueueMetrics {
  #[inline]
  pub(crate) fn incr(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
  }

  pub(crate) fn snapshot(&self, pending: usize) -> QueueMetricsSnapshot {
    QueueMetricsSnapshot {
      enqueued: self.enqueued.load(Ordering::Relaxed),
      collapsed: self.collapsed.load(Ordering::Relaxed),
      flushes: self.flushes.load(Ordering::Relaxed),
      flush_failures: self.flush_failures.load(Ordering::Relaxed),
      retries: self.retries.load(Ordering::Relaxed),
      dropped: self.dropped.load(Ordering::Relaxed),
      pending,
    }
  }
}

/// A point-in-time snapshot of the queue's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMetricsSnapshot {
  /// Updates accepted by `enqueue`.
  pub enqueued: u64,
  /// Updates merged into an existing accumulator instead of starting one.
  pub collapsed: u64,
  /// Successful flush callback invocations.
  pub flushes: u64,
  /// Payloads given up on after exhausting their retries.
  pub flush_failures: u64,
  pub retries: u64,
  /// Payloads discarded without a successful flush.
  pub dropped: u64,
  /// Keys holding an accumulator right now.
  pub pending: usize,
}
