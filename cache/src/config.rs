use std::time::Duration;

use serde::Deserialize;

/// Deserializable cache settings, applied with
/// [`CacheBuilder::from_config`](crate::CacheBuilder::from_config).
///
/// Every field is optional; absent fields keep the builder default.
///
/// ```yaml
/// name: remote-actors
/// capacity: 10000
/// time_to_live: 30m
/// bulk_concurrency: 8
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
  pub name: Option<String>,
  pub capacity: Option<usize>,
  pub shards: Option<usize>,
  #[serde(deserialize_with = "tessera::config::option_duration")]
  pub time_to_live: Option<Duration>,
  #[serde(deserialize_with = "tessera::config::option_duration")]
  pub janitor_interval: Option<Duration>,
  pub bulk_concurrency: Option<usize>,
  pub bulk_batch_size: Option<usize>,
}
