//! Resolves remote actors through a fetch-through cache while several
//! timelines ask for the same authors at once.
//!
//! Run with `RUST_LOG=tessera_cache=trace` to watch the cache at work.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tessera_cache::{CacheBuilder, Disposable, EvictionReason};
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
struct RemoteActor {
  uri: String,
  display_name: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .init();

  let lookups = Arc::new(AtomicUsize::new(0));

  let actors = CacheBuilder::<String, RemoteActor>::new()
    .name("remote-actors")
    .capacity(1_000)
    .time_to_live(Duration::from_secs(30 * 60))
    .fetcher({
      let lookups = lookups.clone();
      move |uri: String, _cancel| {
        let lookups = lookups.clone();
        async move {
          lookups.fetch_add(1, Ordering::Relaxed);
          // Stands in for an HTTP round-trip to the actor's home server.
          tokio::time::sleep(Duration::from_millis(150)).await;
          let display_name = uri.rsplit('/').next().unwrap_or_default().to_string();
          Ok::<_, std::io::Error>(RemoteActor { uri, display_name })
        }
      }
    })
    .eviction_listener(|uri: String, _actor: Arc<RemoteActor>, reason: EvictionReason| {
      println!("dropped {uri}: {reason}");
    })
    .build()?;

  let authors = ["alice", "bob", "alice", "carol", "bob", "alice"]
    .map(|name| format!("https://remote.example/users/{name}"));

  let timelines = (0..4).map(|_| {
    let actors = actors.clone();
    let authors = authors.clone();
    tokio::spawn(async move { actors.bulk_get(authors).await })
  });

  for timeline in futures_util::future::join_all(timelines).await {
    let resolved = timeline??;
    for (uri, actor) in resolved.succeeded() {
      println!("{uri} -> {} ({})", actor.display_name, actor.uri);
    }
  }

  println!(
    "resolved {} distinct actors with {} remote lookups",
    actors.len(),
    lookups.load(Ordering::Relaxed)
  );

  actors.delete(&authors[0])?;
  println!("{:#?}", actors.metrics());

  actors.dispose().await;
  Ok(())
}
