//! A concurrent fetch-through cache with single-flight deduplication.
//!
//! # Features
//! - **Single-flight**: concurrent misses for one key share a single fetcher
//!   call, and every waiter receives its result. Failures are never cached.
//! - **Bulk fetching**: `bulk_get` resolves many keys at once with bounded
//!   concurrency, reporting per-key failures without failing the whole call.
//! - **Versioned writes**: `set` and `delete` always win over fetches that
//!   were already in flight.
//! - **Expiry and bounding**: per-cache and per-entry time-to-live, plus an
//!   optional capacity with pluggable eviction (LRU by default).
//! - **Lifecycle**: `dispose` rejects further calls with typed errors and
//!   signals in-flight fetchers through a cancellation token.
//!
//! ```no_run
//! use tessera_cache::CacheBuilder;
//! use std::time::Duration;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let cache = CacheBuilder::<String, String>::new()
//!   .name("remote-actors")
//!   .time_to_live(Duration::from_secs(60))
//!   .fetcher(|uri: String, _cancel| async move {
//!     Ok::<_, std::io::Error>(format!("actor at {uri}"))
//!   })
//!   .build()?;
//!
//! let actor = cache.get(&"https://example.social/users/alice".to_string()).await?;
//! # let _ = actor;
//! # Ok(())
//! # }
//! ```

// Public modules that form the API
pub mod builder;
pub mod config;
pub mod error;
pub mod handles;
pub mod listener;
pub mod metrics;
pub mod policy;
pub mod runtime;

// Internal, crate-only modules
mod bulk;
mod entry;
mod loader;
mod shared;
mod store;
mod task;
mod time;

// Re-export the primary user-facing types for convenience
pub use builder::CacheBuilder;
pub use bulk::BulkFetchResult;
pub use config::CacheConfig;
pub use error::{BuildError, CacheError, LookupMiss};
pub use handles::QuantumCache;
pub use listener::{EvictionListener, EvictionReason};
pub use metrics::MetricsSnapshot;
pub use runtime::{TaskSpawner, TokioSpawner};

pub use tessera::{CancellationToken, Disposable, FetchFailedError, LifecycleState};
