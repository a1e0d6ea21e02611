use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tessera_lock::{DistributedLockBuilder, InMemoryLockBackend};
use tessera_queue::{
  CollapsedQueue, CollapsedQueueBuilder, FlushError, FlushFailure, LastWriteWins, ShallowMerge,
};

type Flushed<P> = Arc<Mutex<Vec<(String, P)>>>;

/// A summing queue recording every flush it performs.
fn counting_queue(delay: Duration) -> (CollapsedQueue<String, u64>, Flushed<u64>) {
  let flushed: Flushed<u64> = Arc::default();
  let queue = CollapsedQueueBuilder::new(|pending: &mut u64, update: u64| *pending += update, {
    let flushed = flushed.clone();
    move |key: String, total: u64, _cancel| {
      let flushed = flushed.clone();
      async move {
        flushed.lock().push((key, total));
        Ok::<_, std::io::Error>(())
      }
    }
  })
  .name("test")
  .delay(delay)
  .build()
  .unwrap();
  (queue, flushed)
}

#[tokio::test]
async fn updates_within_window_flush_once() {
  let (queue, flushed) = counting_queue(Duration::from_millis(50));

  for _ in 0..10 {
    queue.enqueue("note:1".to_string(), 1).unwrap();
  }
  queue.enqueue("note:2".to_string(), 5).unwrap();
  assert_eq!(queue.pending_len(), 2);
  assert!(flushed.lock().is_empty(), "nothing flushes before the window closes");

  tokio::time::sleep(Duration::from_millis(100)).await;

  let mut seen = flushed.lock().clone();
  seen.sort();
  assert_eq!(seen, vec![("note:1".to_string(), 10), ("note:2".to_string(), 5)]);
  assert_eq!(queue.pending_len(), 0);

  let metrics = queue.metrics();
  assert_eq!(metrics.enqueued, 11);
  assert_eq!(metrics.collapsed, 9);
  assert_eq!(metrics.flushes, 2);
}

#[tokio::test]
async fn window_is_not_extended_by_later_updates() {
  let (queue, flushed) = counting_queue(Duration::from_millis(60));

  queue.enqueue("k".to_string(), 1).unwrap();
  // Keep updating past the end of the first window.
  for _ in 0..8 {
    tokio::time::sleep(Duration::from_millis(10)).await;
    queue.enqueue("k".to_string(), 1).unwrap();
  }

  // The first window closed while updates were still arriving.
  assert!(!flushed.lock().is_empty());
  tokio::time::sleep(Duration::from_millis(120)).await;

  let flushed = flushed.lock().clone();
  assert!(flushed.len() >= 2);
  assert_eq!(flushed.iter().map(|(_, n)| n).sum::<u64>(), 9);
}

#[tokio::test]
async fn perform_all_now_flushes_immediately() {
  let (queue, flushed) = counting_queue(Duration::from_secs(60));

  queue.enqueue("a".to_string(), 2).unwrap();
  queue.enqueue("a".to_string(), 3).unwrap();
  queue.enqueue("b".to_string(), 1).unwrap();
  queue.perform_all_now().await.unwrap();

  let mut seen = flushed.lock().clone();
  seen.sort();
  assert_eq!(seen, vec![("a".to_string(), 5), ("b".to_string(), 1)]);
  assert_eq!(queue.pending_len(), 0);

  // A fresh window starts for the next update.
  queue.enqueue("a".to_string(), 1).unwrap();
  assert_eq!(queue.pending_len(), 1);
  queue.perform_all_now().await.unwrap();
  assert_eq!(flushed.lock().len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn flushes_of_one_key_never_overlap() {
  let inside = Arc::new(AtomicUsize::new(0));
  let peak = Arc::new(AtomicUsize::new(0));
  let flushes = Arc::new(AtomicUsize::new(0));

  let queue = CollapsedQueueBuilder::new(LastWriteWins, {
    let (inside, peak, flushes) = (inside.clone(), peak.clone(), flushes.clone());
    move |_key: u32, _value: u32, _cancel| {
      let (inside, peak, flushes) = (inside.clone(), peak.clone(), flushes.clone());
      async move {
        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(40)).await;
        inside.fetch_sub(1, Ordering::SeqCst);
        flushes.fetch_add(1, Ordering::SeqCst);
        Ok::<_, std::io::Error>(())
      }
    }
  })
  .delay(Duration::from_millis(5))
  .build()
  .unwrap();

  // Each update lands while the previous flush of the key is still running.
  for value in 0..4 {
    queue.enqueue(1, value).unwrap();
    tokio::time::sleep(Duration::from_millis(15)).await;
  }
  queue.perform_all_now().await.unwrap();

  assert_eq!(peak.load(Ordering::SeqCst), 1);
  assert!(flushes.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn failed_flush_is_retried_then_reported() {
  let attempts = Arc::new(AtomicUsize::new(0));
  let failures: Arc<Mutex<Vec<FlushError<String>>>> = Arc::default();

  let queue = CollapsedQueueBuilder::new(LastWriteWins, {
    let attempts = attempts.clone();
    move |_key: String, _value: u8, _cancel| {
      let attempts = attempts.clone();
      async move {
        attempts.fetch_add(1, Ordering::SeqCst);
        Err::<(), _>("database unavailable")
      }
    }
  })
  .delay(Duration::from_millis(5))
  .max_retries(2)
  .retry_delay(Duration::from_millis(5))
  .on_error({
    let failures = failures.clone();
    move |error| failures.lock().push(error)
  })
  .build()
  .unwrap();

  queue.enqueue("instance:stats".to_string(), 1).unwrap();
  queue.perform_all_now().await.unwrap();

  assert_eq!(attempts.load(Ordering::SeqCst), 3);
  let failures = failures.lock();
  assert_eq!(failures.len(), 1);
  assert_eq!(failures[0].key, "instance:stats");
  assert_eq!(failures[0].attempts, 3);
  assert_eq!(failures[0].cause.to_string(), "database unavailable");

  let metrics = queue.metrics();
  assert_eq!(metrics.retries, 2);
  assert_eq!(metrics.flush_failures, 1);
  assert_eq!(metrics.dropped, 1);
}

#[tokio::test]
async fn failed_payload_is_not_merged_into_next_window() {
  let calls = Arc::new(AtomicUsize::new(0));
  let flushed: Flushed<u64> = Arc::default();

  let queue = CollapsedQueueBuilder::new(|pending: &mut u64, update: u64| *pending += update, {
    let (calls, flushed) = (calls.clone(), flushed.clone());
    move |key: String, total: u64, _cancel| {
      let (calls, flushed) = (calls.clone(), flushed.clone());
      async move {
        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
          return Err("first write fails");
        }
        flushed.lock().push((key, total));
        Ok(())
      }
    }
  })
  .max_retries(0)
  .on_error(|_| {})
  .build()
  .unwrap();

  queue.enqueue("k".to_string(), 7).unwrap();
  queue.perform_all_now().await.unwrap();
  queue.enqueue("k".to_string(), 1).unwrap();
  queue.perform_all_now().await.unwrap();

  assert_eq!(*flushed.lock(), vec![("k".to_string(), 1)]);
}

#[tokio::test]
async fn panicking_flush_is_contained() {
  let failures: Arc<Mutex<Vec<FlushError<u8>>>> = Arc::default();
  let queue = CollapsedQueueBuilder::new(LastWriteWins, |key: u8, _value: (), _cancel| async move {
    if key == 0 {
      panic!("flush blew up");
    }
    Ok::<_, std::io::Error>(())
  })
  .max_retries(0)
  .on_error({
    let failures = failures.clone();
    move |error| failures.lock().push(error)
  })
  .build()
  .unwrap();

  queue.enqueue(0, ()).unwrap();
  queue.enqueue(1, ()).unwrap();
  queue.perform_all_now().await.unwrap();

  let failures = failures.lock();
  assert_eq!(failures.len(), 1);
  assert_eq!(failures[0].key, 0);
  assert_eq!(failures[0].cause.downcast_ref::<FlushFailure>(), Some(&FlushFailure::Panicked));
  assert_eq!(queue.metrics().flushes, 1);
}

#[tokio::test]
async fn shallow_merge_combines_fields() {
  let flushed: Flushed<BTreeMap<&'static str, i64>> = Arc::default();
  let queue = CollapsedQueueBuilder::new(ShallowMerge, {
    let flushed = flushed.clone();
    move |key: String, fields: BTreeMap<&'static str, i64>, _cancel| {
      let flushed = flushed.clone();
      async move {
        flushed.lock().push((key, fields));
        Ok::<_, std::io::Error>(())
      }
    }
  })
  .delay(Duration::from_secs(60))
  .build()
  .unwrap();

  queue.enqueue("user:1".to_string(), BTreeMap::from([("lastActiveDate", 1)])).unwrap();
  queue.enqueue("user:1".to_string(), BTreeMap::from([("followersCount", 10)])).unwrap();
  queue.enqueue("user:1".to_string(), BTreeMap::from([("lastActiveDate", 2)])).unwrap();
  queue.perform_all_now().await.unwrap();

  assert_eq!(
    *flushed.lock(),
    vec![(
      "user:1".to_string(),
      BTreeMap::from([("followersCount", 10), ("lastActiveDate", 2)])
    )]
  );
}

#[tokio::test]
async fn flush_lock_wraps_every_flush() {
  let backend = Arc::new(InMemoryLockBackend::new());
  let lock = DistributedLockBuilder::new(backend.clone())
    .retry_delay(Duration::from_millis(5))
    .build()
    .unwrap();
  let held_during_flush = Arc::new(AtomicUsize::new(0));

  let queue = CollapsedQueueBuilder::new(LastWriteWins, {
    let (backend, held) = (backend.clone(), held_during_flush.clone());
    move |key: String, _value: u8, _cancel| {
      let (backend, held) = (backend.clone(), held.clone());
      async move {
        if backend.is_held(&format!("chart-insert:{key}")) {
          held.fetch_add(1, Ordering::SeqCst);
        }
        Ok::<_, std::io::Error>(())
      }
    }
  })
  .flush_lock(lock, |key: &String| tessera_lock::chart_insert_lock_name(key))
  .build()
  .unwrap();

  queue.enqueue("notes:day".to_string(), 1).unwrap();
  queue.enqueue("users:day".to_string(), 1).unwrap();
  queue.perform_all_now().await.unwrap();

  assert_eq!(held_during_flush.load(Ordering::SeqCst), 2);
  assert!(!backend.is_held("chart-insert:notes:day"));
}

#[tokio::test]
async fn flush_lock_timeout_counts_as_failed_attempt() {
  let backend = Arc::new(InMemoryLockBackend::new());
  let lock = DistributedLockBuilder::new(backend.clone())
    .retry_delay(Duration::from_millis(5))
    .build()
    .unwrap();
  let failures: Arc<Mutex<Vec<FlushError<String>>>> = Arc::default();

  // Another process holds the row's lock for the whole test.
  let _other = lock.acquire("chart-insert:busy", Duration::ZERO).await.unwrap();

  let queue = CollapsedQueueBuilder::new(LastWriteWins, |_key: String, _value: u8, _cancel| async {
    Ok::<_, std::io::Error>(())
  })
  .flush_lock(lock.clone(), |key: &String| format!("chart-insert:{key}"))
  .flush_lock_timeout(Duration::from_millis(20))
  .max_retries(0)
  .on_error({
    let failures = failures.clone();
    move |error| failures.lock().push(error)
  })
  .build()
  .unwrap();

  queue.enqueue("busy".to_string(), 1).unwrap();
  queue.perform_all_now().await.unwrap();

  let failures = failures.lock();
  assert_eq!(failures.len(), 1);
  let lock_error = failures[0]
    .cause
    .downcast_ref::<tessera_lock::LockError>()
    .expect("lock error cause");
  assert!(lock_error.is_timeout());
}
