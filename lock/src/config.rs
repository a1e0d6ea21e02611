use std::time::Duration;

use serde::Deserialize;

/// Deserializable lock settings, applied with
/// [`DistributedLockBuilder::with_config`](crate::DistributedLockBuilder::with_config).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LockConfig {
  pub name: Option<String>,
  #[serde(deserialize_with = "tessera::config::option_duration")]
  pub ttl: Option<Duration>,
  #[serde(deserialize_with = "tessera::config::option_duration")]
  pub retry_delay: Option<Duration>,
  pub backoff_multiplier: Option<f64>,
  #[serde(deserialize_with = "tessera::config::option_duration")]
  pub max_retry_delay: Option<Duration>,
}
