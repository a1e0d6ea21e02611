//! `serde` helpers shared by the component configuration structs.
//!
//! Durations are written in `humantime` notation (`"150ms"`, `"30s"`,
//! `"5m"`), which is how they appear in deployment YAML files.

use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// Deserializes a required `humantime` duration.
pub fn duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
  D: Deserializer<'de>,
{
  let raw = String::deserialize(deserializer)?;
  humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

/// Deserializes an optional `humantime` duration. Use together with
/// `#[serde(default)]`.
pub fn option_duration<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
  D: Deserializer<'de>,
{
  match Option::<String>::deserialize(deserializer)? {
    Some(raw) => humantime::parse_duration(&raw)
      .map(Some)
      .map_err(serde::de::Error::custom),
    None => Ok(None),
  }
}
