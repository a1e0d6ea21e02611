use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tessera::Retryable;
use tessera_lock::{
  chart_insert_lock_name, Disposable, DistributedLock, DistributedLockBuilder, InMemoryLockBackend,
  LockError,
};
use tokio::sync::Barrier;

fn build_lock(backend: &Arc<InMemoryLockBackend>) -> DistributedLock {
  DistributedLockBuilder::new(backend.clone())
    .name("test")
    .retry_delay(Duration::from_millis(5))
    .build()
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn critical_sections_never_overlap() {
  let backend = Arc::new(InMemoryLockBackend::new());
  // Two lock instances over one backend stand in for two processes.
  let locks = [build_lock(&backend), build_lock(&backend)];
  let inside = Arc::new(AtomicUsize::new(0));
  let peak = Arc::new(AtomicUsize::new(0));
  let completed = Arc::new(AtomicUsize::new(0));
  let num_tasks = 16;
  let barrier = Arc::new(Barrier::new(num_tasks));

  let mut handles = Vec::new();
  for i in 0..num_tasks {
    let lock = locks[i % 2].clone();
    let (inside, peak, completed, barrier) =
      (inside.clone(), peak.clone(), completed.clone(), barrier.clone());
    handles.push(tokio::spawn(async move {
      barrier.wait().await;
      let name = chart_insert_lock_name("notes:hour");
      lock
        .with_lock(&name, Duration::from_secs(10), || async move {
          let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
          peak.fetch_max(now, Ordering::SeqCst);
          tokio::time::sleep(Duration::from_millis(3)).await;
          inside.fetch_sub(1, Ordering::SeqCst);
          completed.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();
    }));
  }
  for handle in handles {
    handle.await.unwrap();
  }

  assert_eq!(peak.load(Ordering::SeqCst), 1);
  assert_eq!(completed.load(Ordering::SeqCst), num_tasks);
  assert!(!backend.is_held("chart-insert:notes:hour"));
}

#[tokio::test]
async fn acquisition_times_out_while_held() {
  let backend = Arc::new(InMemoryLockBackend::new());
  let lock = build_lock(&backend);

  let held = lock.acquire("busy", Duration::from_millis(10)).await.unwrap();

  let started = std::time::Instant::now();
  let error = lock.acquire("busy", Duration::from_millis(40)).await.unwrap_err();
  let waited = started.elapsed();

  match &error {
    LockError::Timeout(timeout) => {
      assert_eq!(timeout.name, "busy");
      assert!(timeout.waited >= Duration::from_millis(40));
    }
    other => panic!("expected a timeout, got {other:?}"),
  }
  assert!(error.is_retryable());
  assert!(waited < Duration::from_secs(1));

  lock.release(held).await.unwrap();
  assert!(lock.acquire("busy", Duration::ZERO).await.is_ok());
}

#[tokio::test]
async fn zero_timeout_still_attempts_once() {
  let backend = Arc::new(InMemoryLockBackend::new());
  let lock = build_lock(&backend);

  let handle = lock.acquire("free", Duration::ZERO).await.unwrap();
  assert_eq!(handle.name(), "free");
  assert_eq!(handle.token().len(), 32);
  assert!(lock.acquire("free", Duration::ZERO).await.unwrap_err().is_timeout());
}

#[tokio::test]
async fn waiter_gets_lock_after_release() {
  let backend = Arc::new(InMemoryLockBackend::new());
  let lock = build_lock(&backend);

  let first = lock.acquire("row", Duration::from_secs(1)).await.unwrap();
  let waiter = {
    let lock = lock.clone();
    tokio::spawn(async move { lock.acquire("row", Duration::from_secs(2)).await })
  };
  tokio::time::sleep(Duration::from_millis(30)).await;
  lock.release(first).await.unwrap();

  let second = waiter.await.unwrap().unwrap();
  assert!(backend.is_held("row"));
  lock.release(second).await.unwrap();
  assert!(!backend.is_held("row"));
}

#[tokio::test]
async fn stale_release_does_not_steal_new_owner() {
  let backend = Arc::new(InMemoryLockBackend::new());
  let lock = DistributedLockBuilder::new(backend.clone())
    .ttl(Duration::from_millis(20))
    .retry_delay(Duration::from_millis(5))
    .build()
    .unwrap();

  let stale = lock.acquire("object", Duration::ZERO).await.unwrap();
  tokio::time::sleep(Duration::from_millis(40)).await;
  assert!(stale.is_expired());

  let current = lock.acquire("object", Duration::ZERO).await.unwrap();
  lock.release(stale).await.unwrap();
  assert!(backend.is_held("object"), "stale holder must not release the new owner");
  lock.release(current).await.unwrap();
}

#[tokio::test]
async fn dropped_guard_releases_in_background() {
  let backend = Arc::new(InMemoryLockBackend::new());
  let lock = build_lock(&backend);

  {
    let guard = lock.lock("scoped", Duration::ZERO).await.unwrap();
    assert_eq!(guard.name(), "scoped");
    assert!(backend.is_held("scoped"));
  }
  tokio::time::sleep(Duration::from_millis(20)).await;
  assert!(!backend.is_held("scoped"));

  let guard = lock.lock("scoped", Duration::ZERO).await.unwrap();
  guard.release().await.unwrap();
  assert!(!backend.is_held("scoped"));
}

#[tokio::test]
async fn with_lock_releases_when_section_fails() {
  let backend = Arc::new(InMemoryLockBackend::new());
  let lock = build_lock(&backend);

  let outcome: Result<Result<(), &str>, LockError> = lock
    .with_lock("failing", Duration::ZERO, || async { Err("insert conflict") })
    .await;
  assert_eq!(outcome.unwrap(), Err("insert conflict"));
  assert!(!backend.is_held("failing"));
}

#[tokio::test]
async fn backoff_grows_between_attempts() {
  let backend = Arc::new(InMemoryLockBackend::new());
  let lock = DistributedLockBuilder::new(backend.clone())
    .retry_delay(Duration::from_millis(5))
    .backoff_multiplier(2.0)
    .max_retry_delay(Duration::from_millis(20))
    .build()
    .unwrap();

  let _held = lock.acquire("slow", Duration::ZERO).await.unwrap();
  let error = lock.acquire("slow", Duration::from_millis(60)).await.unwrap_err();
  assert!(error.is_timeout());
}

#[tokio::test]
async fn dispose_stops_waiters_and_rejects_new_calls() {
  let backend = Arc::new(InMemoryLockBackend::new());
  let lock = build_lock(&backend);

  let held = lock.acquire("shutdown", Duration::ZERO).await.unwrap();
  let waiter = {
    let lock = lock.clone();
    tokio::spawn(async move { lock.acquire("shutdown", Duration::from_secs(30)).await })
  };
  tokio::time::sleep(Duration::from_millis(20)).await;

  lock.dispose().await;

  let error = tokio::time::timeout(Duration::from_secs(1), waiter)
    .await
    .expect("waiter stops at its next retry")
    .unwrap()
    .unwrap_err();
  assert!(matches!(error, LockError::Lifecycle(_)));
  assert!(!error.is_retryable());

  assert!(matches!(
    lock.acquire("other", Duration::ZERO).await,
    Err(LockError::Lifecycle(ref e)) if e.is_disposed()
  ));

  // Holders can still clean up after disposal.
  lock.release(held).await.unwrap();
  assert!(!backend.is_held("shutdown"));
}

#[tokio::test]
async fn unbounded_timeout_waits_for_release() {
  let backend = Arc::new(InMemoryLockBackend::new());
  let lock = build_lock(&backend);
  let held = lock.acquire("inbox", Duration::ZERO).await.unwrap();

  let waiter = {
    let lock = lock.clone();
    tokio::spawn(async move { lock.acquire("inbox", Duration::MAX).await })
  };
  tokio::time::sleep(Duration::from_millis(30)).await;
  assert!(!waiter.is_finished());

  lock.release(held).await.unwrap();
  let handle = waiter.await.unwrap().unwrap();
  assert_eq!(handle.name(), "inbox");
  lock.release(handle).await.unwrap();
}

#[tokio::test]
async fn unbounded_ttl_is_held_until_released() {
  let backend = Arc::new(InMemoryLockBackend::new());
  let lock = DistributedLockBuilder::new(backend.clone())
    .ttl(Duration::MAX)
    .retry_delay(Duration::from_millis(5))
    .build()
    .unwrap();

  let handle = lock.acquire("relay", Duration::ZERO).await.unwrap();
  assert_eq!(handle.expires_at(), None);
  assert!(!handle.is_expired());
  assert!(backend.is_held("relay"));

  let error = lock.acquire("relay", Duration::ZERO).await.unwrap_err();
  assert!(error.is_timeout());

  lock.release(handle).await.unwrap();
  assert!(!backend.is_held("relay"));
}

#[tokio::test]
async fn huge_backoff_is_capped_at_max_delay() {
  let backend = Arc::new(InMemoryLockBackend::new());
  let lock = DistributedLockBuilder::new(backend.clone())
    .retry_delay(Duration::from_millis(5))
    .backoff_multiplier(f64::MAX)
    .max_retry_delay(Duration::from_millis(10))
    .build()
    .unwrap();

  let _held = lock.acquire("feed", Duration::ZERO).await.unwrap();
  let error = lock.acquire("feed", Duration::from_millis(40)).await.unwrap_err();
  assert!(error.is_timeout());
}

#[test]
fn builder_rejects_invalid_settings() {
  let backend = Arc::new(InMemoryLockBackend::new());
  assert!(DistributedLockBuilder::new(backend.clone()).ttl(Duration::ZERO).build().is_err());
  assert!(DistributedLockBuilder::new(backend).backoff_multiplier(0.5).build().is_err());
}
