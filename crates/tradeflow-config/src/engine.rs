use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Engine settings, typically read from a JSON file.
///
/// Every field has a default so an empty object `{}` is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  /// SQLite connection string. When unset the CLI derives one from its data directory.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub database_url: Option<String>,
  /// Upper bound for a single plugin `start`/`resume` call.
  pub execution_timeout_ms: u64,
  /// Capacity of the completion notification channel.
  pub channel_capacity: usize,
  /// Soft limit on task containers kept in memory. Idle containers are
  /// dropped once it is reached and rehydrated from the store on demand.
  pub task_cache_capacity: usize,
  /// Public base URL of this service, handed to form submission targets.
  pub service_url: String,
  /// Directory of the filesystem form registry.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub forms_dir: Option<PathBuf>,
  pub notifier: NotifierConfig,
}

impl EngineConfig {
  pub fn execution_timeout(&self) -> Duration {
    Duration::from_millis(self.execution_timeout_ms)
  }
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      database_url: None,
      execution_timeout_ms: 60_000,
      channel_capacity: 100,
      task_cache_capacity: 1_000,
      service_url: "http://localhost:8080".to_string(),
      forms_dir: None,
      notifier: NotifierConfig::default(),
    }
  }
}

/// Retry settings for outbound notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
  /// Total attempts, including the first.
  pub max_attempts: u32,
  /// Delay before the first retry; doubles on every further retry.
  pub base_delay_ms: u64,
  /// Budget for one notification including all of its retries.
  pub request_timeout_ms: u64,
}

impl Default for NotifierConfig {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      base_delay_ms: 1_000,
      request_timeout_ms: 120_000,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_object_uses_defaults() {
    let config: EngineConfig = serde_json::from_str("{}").unwrap();
    assert_eq!(config, EngineConfig::default());
    assert_eq!(config.execution_timeout(), Duration::from_secs(60));
    assert_eq!(config.channel_capacity, 100);
    assert_eq!(config.task_cache_capacity, 1_000);
    assert_eq!(config.notifier.max_attempts, 3);
  }

  #[test]
  fn test_partial_notifier_override() {
    let config: EngineConfig =
      serde_json::from_str(r#"{"execution_timeout_ms": 500, "notifier": {"base_delay_ms": 10}}"#)
        .unwrap();
    assert_eq!(config.execution_timeout_ms, 500);
    assert_eq!(config.notifier.base_delay_ms, 10);
    assert_eq!(config.notifier.max_attempts, 3);
  }
}
