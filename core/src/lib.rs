//! Shared building blocks for the tessera coordination layer.
//!
//! Every stateful component (the fetch-through cache, the collapsed write
//! queue and the distributed lock) embeds a [`Lifecycle`] and reports
//! failures using the error vocabulary defined in [`error`].
//!
//! # Features
//! - **Disposal lifecycle**: a monotonic `Active -> Disposing -> Disposed`
//!   state machine that turns use-after-shutdown into typed errors.
//! - **Error taxonomy**: `FetchFailedError`, `DisposingError`,
//!   `DisposedError`, `LockTimeoutError` and the application-level
//!   `IdentifiableError`, all carrying a retryability signal.
//! - **Configuration helpers**: `serde` deserializers for human-readable
//!   durations such as `"30s"` or `"250ms"`.

pub mod config;
pub mod error;
pub mod lifecycle;

pub use error::{
  BoxError, DisposedError, DisposingError, FetchFailedError, IdentifiableError, LifecycleError,
  LockTimeoutError, Retryable,
};
pub use lifecycle::{Disposable, Lifecycle, LifecycleState};

// Re-exported so downstream crates and callbacks share one token type.
pub use tokio_util::sync::CancellationToken;
