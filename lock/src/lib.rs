//! Distributed mutual exclusion over a pluggable backend.
//!
//! A [`DistributedLock`] serializes critical sections across every process
//! sharing one [`LockBackend`]. Acquisition always has a timeout; holders
//! prove ownership with a random token so a stale holder can never release
//! somebody else's lock.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tessera_lock::{ap_object_lock_name, DistributedLockBuilder, InMemoryLockBackend};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let lock = DistributedLockBuilder::new(Arc::new(InMemoryLockBackend::new())).build()?;
//!
//! let name = ap_object_lock_name("https://remote.example/notes/1");
//! lock
//!   .with_lock(&name, Duration::from_secs(30), || async {
//!     // resolve and persist the object exactly once
//!   })
//!   .await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod builder;
pub mod config;
pub mod error;
pub mod lock;
pub mod names;

pub use backend::{BackendError, InMemoryLockBackend, LockBackend};
pub use builder::DistributedLockBuilder;
pub use config::LockConfig;
pub use error::{BuildError, LockError};
pub use lock::{DistributedLock, LockGuard, LockHandle};
pub use names::{ap_object_lock_name, chart_insert_lock_name};

pub use tessera::{Disposable, LifecycleState, LockTimeoutError};
