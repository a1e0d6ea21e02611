mod common;

use common::{slow_cache, FetchLog};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tessera::Retryable;
use tessera_cache::{CacheBuilder, Disposable, LifecycleState};

#[tokio::test]
async fn operations_after_dispose_fail_with_disposed() {
  let cache = slow_cache(Duration::from_millis(1), FetchLog::default());
  cache.set(1, "one".to_string()).unwrap();

  cache.dispose().await;
  assert_eq!(cache.lifecycle_state(), LifecycleState::Disposed);

  let error = cache.get(&1).await.unwrap_err();
  let lifecycle = error.as_lifecycle().expect("lifecycle error");
  assert!(lifecycle.is_disposed());
  assert_eq!(lifecycle.instance(), "cache:test");
  assert!(!error.is_retryable());

  assert!(cache.bulk_get([1, 2]).await.is_err());
  assert!(cache.set(2, "two".to_string()).is_err());
  assert!(cache.delete(&1).is_err());
  assert!(cache.clear().is_err());

  // Cache-only reads simply find nothing.
  assert!(cache.get_cached(&1).is_none());
  assert!(cache.is_empty());
  assert_eq!(cache.gc(), 0);
}

#[tokio::test]
async fn in_flight_fetch_is_not_installed_after_dispose() {
  let log = FetchLog::default();
  let cache = slow_cache(Duration::from_millis(60), log.clone());

  let pending = {
    let cache = cache.clone();
    tokio::spawn(async move { cache.get(&5).await })
  };
  tokio::time::sleep(Duration::from_millis(10)).await;

  cache.dispose().await;

  // The waiter is released with the fetched value, which never lands in the
  // disposed store.
  assert_eq!(pending.await.unwrap().unwrap().as_str(), "50");
  assert!(cache.get_cached(&5).is_none());
  assert_eq!(cache.len(), 0);
}

#[tokio::test]
async fn fetchers_observe_cancellation() {
  let cancelled = Arc::new(AtomicBool::new(false));
  let cache = CacheBuilder::<u32, u32>::new()
    .fetcher({
      let cancelled = cancelled.clone();
      move |key: u32, cancel| {
        let cancelled = cancelled.clone();
        async move {
          tokio::select! {
            _ = cancel.cancelled() => {
              cancelled.store(true, Ordering::SeqCst);
              Err("cancelled by dispose")
            }
            _ = tokio::time::sleep(Duration::from_secs(5)) => Ok(key),
          }
        }
      }
    })
    .build()
    .unwrap();

  let pending = {
    let cache = cache.clone();
    tokio::spawn(async move { cache.get(&1).await })
  };
  tokio::time::sleep(Duration::from_millis(10)).await;
  cache.dispose().await;

  let result = tokio::time::timeout(Duration::from_secs(1), pending)
    .await
    .expect("waiter released promptly")
    .unwrap();
  assert!(result.is_err());
  assert!(cancelled.load(Ordering::SeqCst));
}

#[tokio::test]
async fn dispose_is_idempotent() {
  let cache = slow_cache(Duration::from_millis(1), FetchLog::default());

  tokio::join!(cache.dispose(), cache.dispose(), cache.dispose());
  cache.dispose().await;

  assert_eq!(Disposable::lifecycle_state(&cache), LifecycleState::Disposed);
}
