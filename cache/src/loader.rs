use tessera::{BoxError, CancellationToken, FetchFailedError};

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// What every waiter of one fetch receives. `Ok(None)` means the fetcher
/// reported that the key has no value.
pub(crate) type LoadResult<V> = Result<Option<Arc<V>>, FetchFailedError>;

/// The internal state of a value being fetched.
enum State<V> {
  Fetching,
  Complete(LoadResult<V>),
}

struct Inner<V> {
  state: State<V>,
  waiters: VecDeque<Waker>,
}

/// A fetch in progress for one key.
///
/// Any number of tasks can await the same `LoadFuture`; all of them observe
/// the single result passed to [`LoadFuture::complete`].
pub(crate) struct LoadFuture<V> {
  inner: Mutex<Inner<V>>,
}

impl<V> LoadFuture<V> {
  pub(crate) fn new() -> Self {
    Self {
      inner: Mutex::new(Inner {
        state: State::Fetching,
        waiters: VecDeque::new(),
      }),
    }
  }

  /// Completes the future, waking all waiters. Only the first call has an
  /// effect.
  pub(crate) fn complete(&self, result: LoadResult<V>) {
    let waiters = {
      let mut inner = self.inner.lock();
      if matches!(inner.state, State::Complete(_)) {
        return;
      }
      inner.state = State::Complete(result);
      std::mem::take(&mut inner.waiters)
    };
    for waker in waiters {
      waker.wake();
    }
  }
}

impl<V> Future for &LoadFuture<V> {
  type Output = LoadResult<V>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let mut inner = self.inner.lock();
    match &inner.state {
      State::Complete(result) => Poll::Ready(result.clone()),
      State::Fetching => {
        if !inner.waiters.iter().any(|w| w.will_wake(cx.waker())) {
          inner.waiters.push_back(cx.waker().clone());
        }
        Poll::Pending
      }
    }
  }
}

pub(crate) type FetchFn<K, V> =
  Arc<dyn Fn(K, CancellationToken) -> BoxFuture<'static, Result<V, BoxError>> + Send + Sync>;

pub(crate) type MaybeFetchFn<K, V> =
  Arc<dyn Fn(K, CancellationToken) -> BoxFuture<'static, Result<Option<V>, BoxError>> + Send + Sync>;

pub(crate) type BulkFetchFn<K, V> = Arc<
  dyn Fn(Vec<K>, CancellationToken) -> BoxFuture<'static, Vec<(K, Result<V, BoxError>)>>
    + Send
    + Sync,
>;

/// Which operation triggered a fetch. It decides which fetcher is preferred
/// when both the plain and the "maybe" fetcher are configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FetchMode {
  Value,
  Maybe,
}

/// The external collaborators that produce values for missing keys.
pub(crate) struct Fetchers<K, V> {
  pub(crate) single: Option<FetchFn<K, V>>,
  pub(crate) maybe: Option<MaybeFetchFn<K, V>>,
  pub(crate) bulk: Option<BulkFetchFn<K, V>>,
}

impl<K, V> Default for Fetchers<K, V> {
  fn default() -> Self {
    Self {
      single: None,
      maybe: None,
      bulk: None,
    }
  }
}

impl<K, V> Fetchers<K, V>
where
  K: Send + 'static,
  V: Send + 'static,
{
  /// Runs the fetcher best suited to `mode` for a single key.
  pub(crate) fn fetch_one(
    &self,
    key: K,
    mode: FetchMode,
    token: CancellationToken,
  ) -> BoxFuture<'static, Result<Option<V>, BoxError>> {
    use futures_util::FutureExt;

    match (mode, &self.single, &self.maybe) {
      (FetchMode::Maybe, _, Some(maybe)) | (FetchMode::Value, None, Some(maybe)) => {
        maybe(key, token)
      }
      (_, Some(single), _) => single(key, token).map(|r| r.map(Some)).boxed(),
      (_, None, None) => {
        futures_util::future::ready(Err(Box::new(crate::error::LookupMiss::NoFetcher) as BoxError))
          .boxed()
      }
    }
  }
}
