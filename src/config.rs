use std::{fs, path::PathBuf, sync::RwLock};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::limits::LimitRule;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TrackerConfig {
    /// Period of the incremental-commit heartbeat, in seconds. Bounds the
    /// window of uncommitted data after a crash to one period.
    pub heartbeat_secs: u64,
    /// Days of daily buckets to retain.
    pub retention_days: i64,
    /// Local hour at which the daily retention pass runs.
    pub cleanup_hour: u32,
    /// Daily time budgets, owned by the options UI; the engine only reads
    /// them. Listed order decides which rule wins for overlapping patterns.
    pub limits: Vec<LimitRule>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: 60,
            retention_days: 7,
            cleanup_hour: 3,
            limits: Vec::new(),
        }
    }
}

/// JSON-file-backed configuration shared between the engine and the
/// embedding UI.
pub struct ConfigStore {
    path: Option<PathBuf>,
    data: RwLock<TrackerConfig>,
}

impl ConfigStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            TrackerConfig::default()
        };

        Ok(Self {
            path: Some(path),
            data: RwLock::new(data),
        })
    }

    /// A store with no backing file; used by tests and embedders that
    /// manage persistence themselves.
    pub fn in_memory(config: TrackerConfig) -> Self {
        Self {
            path: None,
            data: RwLock::new(config),
        }
    }

    pub fn config(&self) -> TrackerConfig {
        self.data.read().unwrap().clone()
    }

    pub fn limits(&self) -> Vec<LimitRule> {
        self.data.read().unwrap().limits.clone()
    }

    pub fn update_limits(&self, limits: Vec<LimitRule>) -> Result<()> {
        {
            let mut guard = self.data.write().unwrap();
            guard.limits = limits;
            self.persist(&guard)?;
        }
        Ok(())
    }

    /// Re-reads the backing file, picking up edits made by the options UI.
    pub fn reload(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let contents = fs::read_to_string(path)?;
        let data: TrackerConfig = serde_json::from_str(&contents)?;
        let mut guard = self.data.write().unwrap();
        *guard = data;
        Ok(())
    }

    fn persist(&self, data: &TrackerConfig) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(path, serialized)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TrackerConfig::default();
        assert_eq!(config.heartbeat_secs, 60);
        assert_eq!(config.retention_days, 7);
        assert_eq!(config.cleanup_hour, 3);
        assert!(config.limits.is_empty());
    }

    #[test]
    fn test_partial_file_falls_back_on_defaults() {
        let parsed: TrackerConfig = serde_json::from_str(r#"{"heartbeatSecs": 30}"#).unwrap();
        assert_eq!(parsed.heartbeat_secs, 30);
        assert_eq!(parsed.retention_days, 7);
    }

    #[test]
    fn test_update_limits_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let store = ConfigStore::new(path.clone()).unwrap();
        store
            .update_limits(vec![LimitRule {
                pattern: "example.com".to_string(),
                seconds: 600,
            }])
            .unwrap();

        let reopened = ConfigStore::new(path).unwrap();
        assert_eq!(reopened.limits().len(), 1);
        assert_eq!(reopened.limits()[0].pattern, "example.com");
    }
}
