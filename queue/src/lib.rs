//! A write-coalescing queue.
//!
//! Hot rows (an account's last-active timestamp, per-note reaction counters,
//! instance statistics) receive far more logical updates than the database
//! should see writes. A [`CollapsedQueue`] merges the updates for each key
//! during a fixed window and writes the merged result once.
//!
//! # Features
//! - **Explicit merge**: the merge function is part of the queue's
//!   construction; [`LastWriteWins`], [`ShallowMerge`] or any closure.
//! - **Fixed windows**: the first update of an idle key arms its timer; later
//!   updates ride along without extending the window.
//! - **Retries**: failed flushes are retried a bounded number of times, then
//!   reported to an error handler and dropped.
//! - **Draining dispose**: pending updates are flushed on shutdown, bounded by
//!   a timeout.
//!
//! ```no_run
//! use std::time::Duration;
//! use tessera_queue::{CollapsedQueueBuilder, Disposable};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let queue = CollapsedQueueBuilder::new(
//!   |pending: &mut u64, update: u64| *pending += update,
//!   |note_id: String, reactions: u64, _cancel| async move {
//!     println!("UPDATE note SET reactions = reactions + {reactions} WHERE id = {note_id}");
//!     Ok::<_, std::io::Error>(())
//!   },
//! )
//! .delay(Duration::from_secs(1))
//! .build()?;
//!
//! queue.enqueue("9abc".to_string(), 1)?;
//! queue.enqueue("9abc".to_string(), 1)?;
//! queue.dispose().await;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod config;
pub mod error;
pub mod handle;
pub mod merge;
pub mod metrics;

mod shared;

pub use builder::CollapsedQueueBuilder;
pub use config::QueueConfig;
pub use error::{BuildError, FlushError, FlushFailure, QueueError};
pub use handle::CollapsedQueue;
pub use merge::{Collapse, LastWriteWins, ShallowMerge, ShallowMergeable};
pub use metrics::QueueMetricsSnapshot;

pub use tessera::{CancellationToken, Disposable, LifecycleState};
