use once_cell::sync::Lazy;
use std::time::{Duration, Instant};

// Every expiry deadline in the cache is measured from this instant, which
// lets a deadline live in a plain `u64` of nanoseconds.
static CACHE_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Nanoseconds elapsed since the cache epoch.
#[inline]
pub(crate) fn now_nanos() -> u64 {
  Instant::now()
    .saturating_duration_since(*CACHE_EPOCH)
    .as_nanos() as u64
}

/// The deadline `ttl` from now, in epoch nanoseconds. `0` is reserved for
/// "never expires", so the result is at least `1`.
#[inline]
pub(crate) fn deadline_after(ttl: Duration) -> u64 {
  now_nanos()
    .saturating_add(ttl.as_nanos().min(u64::MAX as u128) as u64)
    .max(1)
}
