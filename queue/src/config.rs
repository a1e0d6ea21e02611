use std::time::Duration;

use serde::Deserialize;

/// Deserializable queue settings, applied with
/// [`CollapsedQueueBuilder::with_config`](crate::CollapsedQueueBuilder::with_config).
///
/// ```yaml
/// name: user-activity
/// delay: 5s
/// max_retries: 2
/// retry_delay: 500ms
/// dispose_timeout: 10s
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
  pub name: Option<String>,
  #[serde(deserialize_with = "tessera::config::option_duration")]
  pub delay: Option<Duration>,
  pub max_retries: Option<u32>,
  #[serde(deserialize_with = "tessera::config::option_duration")]
  pub retry_delay: Option<Duration>,
  #[serde(deserialize_with = "tessera::config::option_duration")]
  pub dispose_timeout: Option<Duration>,
  #[serde(deserialize_with = "tessera::config::option_duration")]
  pub flush_lock_timeout: Option<Duration>,
  pub shards: Option<usize>,
}
