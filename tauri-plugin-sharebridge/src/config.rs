use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::controller::DeliveryPolicy;
use crate::error::{Result, ShareBridgeError};
use crate::poller::PollSchedule;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeConfig {
    /// Where content without a direct path is materialized.
    pub cache_dir: PathBuf,
    /// Root for `primary:` external storage documents.
    pub external_storage_dir: PathBuf,
    /// Staging directory polled for shared files. `None` disables polling.
    pub inbox_dir: Option<PathBuf>,
    pub poll_backoff_ms: Vec<u64>,
    pub poll_interval_ms: u64,
    pub poll_ceiling_ms: u64,
    pub cleanup_delay_ms: u64,
    pub delivery: DeliveryPolicy,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            cache_dir: std::env::temp_dir().join("sharebridge"),
            external_storage_dir: PathBuf::from("/storage/emulated/0"),
            inbox_dir: None,
            poll_backoff_ms: vec![300, 700, 1200, 2000, 3000, 4000, 5000],
            poll_interval_ms: 1000,
            poll_ceiling_ms: 10_000,
            cleanup_delay_ms: 1000,
            delivery: DeliveryPolicy::default(),
        }
    }
}

impl BridgeConfig {
    pub fn android(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            delivery: DeliveryPolicy::android(),
            ..Self::default()
        }
    }

    pub fn ios(cache_dir: impl Into<PathBuf>, inbox_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            inbox_dir: Some(inbox_dir.into()),
            delivery: DeliveryPolicy::ios(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(ShareBridgeError::Config(
                "pollIntervalMs must be greater than zero".into(),
            ));
        }
        if self.poll_ceiling_ms == 0 {
            return Err(ShareBridgeError::Config(
                "pollCeilingMs must be greater than zero".into(),
            ));
        }
        if self.cache_dir.as_os_str().is_empty() {
            return Err(ShareBridgeError::Config("cacheDir must be set".into()));
        }
        Ok(())
    }

    pub fn poll_schedule(&self) -> PollSchedule {
        PollSchedule {
            backoff: self
                .poll_backoff_ms
                .iter()
                .map(|ms| Duration::from_millis(*ms))
                .collect(),
            interval: Duration::from_millis(self.poll_interval_ms),
            ceiling: Duration::from_millis(self.poll_ceiling_ms),
        }
    }

    pub fn cleanup_delay(&self) -> Duration {
        Duration::from_millis(self.cleanup_delay_ms)
    }
}

pub fn load_config(path: &Path) -> Result<BridgeConfig> {
    if !path.exists() {
        return Ok(BridgeConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: BridgeConfig = serde_json::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

pub fn save_config(path: &Path, config: &BridgeConfig) -> Result<()> {
    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ListenerCardinality;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.json");
        let config = BridgeConfig::ios("/cache", "/docs/Inbox");
        save_config(&path, &config).unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.inbox_dir, Some(PathBuf::from("/docs/Inbox")));
        assert_eq!(loaded.delivery.listeners, ListenerCardinality::Accumulate);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.json");
        std::fs::write(&path, r#"{ "cacheDir": "/c", "pollCeilingMs": 4000 }"#).unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.cache_dir, PathBuf::from("/c"));
        assert_eq!(config.poll_schedule().ceiling, Duration::from_secs(4));
        assert_eq!(config.poll_interval_ms, 1000);
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let config = BridgeConfig {
            poll_interval_ms: 0,
            ..BridgeConfig::default()
        };
        assert!(matches!(config.validate(), Err(ShareBridgeError::Config(_))));
    }
}
