//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;
use crate::history::DEFAULT_MAX_HISTORY_SIZE;

/// Engine-wide settings. Per-field settings live on the schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    #[serde(default = "default_max_history_size")]
    pub max_history_size: usize,

    #[serde(default)]
    pub features: FeatureConfig,

    #[serde(default = "default_sweep_interval_ms")]
    pub suggestion_sweep_interval_ms: u64,

    /// How long a submit is ignored right after a page transition
    #[serde(default = "default_submit_guard_ms")]
    pub submit_guard_ms: u64,
}

fn default_max_history_size() -> usize {
    DEFAULT_MAX_HISTORY_SIZE
}

fn default_sweep_interval_ms() -> u64 {
    60_000
}

fn default_submit_guard_ms() -> u64 {
    300
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureConfig {
    #[serde(default)]
    pub auto_save: AutoSaveConfig,

    #[serde(default)]
    pub background_jobs: BackgroundJobConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoSaveConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_auto_save_interval_ms")]
    pub interval_ms: u64,
}

fn default_auto_save_interval_ms() -> u64 {
    30_000
}

impl Default for AutoSaveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: default_auto_save_interval_ms(),
        }
    }
}

impl AutoSaveConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundJobConfig {
    /// Raise the blocking flag while a job is running
    #[serde(default)]
    pub blocking: bool,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

impl Default for BackgroundJobConfig {
    fn default() -> Self {
        Self {
            blocking: false,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl BackgroundJobConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_history_size: default_max_history_size(),
            features: FeatureConfig::default(),
            suggestion_sweep_interval_ms: default_sweep_interval_ms(),
            submit_guard_ms: default_submit_guard_ms(),
        }
    }
}

impl EngineConfig {
    /// Load from a YAML or JSON file (chosen by extension)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config: EngineConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            _ => serde_yaml::from_str(&contents)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_history_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "maxHistorySize",
                message: "must be at least 1".into(),
            });
        }
        let intervals = [
            ("features.autoSave.intervalMs", self.features.auto_save.interval_ms),
            (
                "features.backgroundJobs.pollIntervalMs",
                self.features.background_jobs.poll_interval_ms,
            ),
            ("suggestionSweepIntervalMs", self.suggestion_sweep_interval_ms),
        ];
        for (key, value) in intervals {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key,
                    message: "interval must be greater than zero".into(),
                });
            }
        }
        Ok(())
    }

    pub fn with_max_history_size(mut self, size: usize) -> Self {
        self.max_history_size = size;
        self
    }

    pub fn with_auto_save(mut self, interval: Duration) -> Self {
        self.features.auto_save = AutoSaveConfig {
            enabled: true,
            interval_ms: interval.as_millis() as u64,
        };
        self
    }

    pub fn with_background_jobs(mut self, blocking: bool, poll_interval: Duration) -> Self {
        self.features.background_jobs = BackgroundJobConfig {
            blocking,
            poll_interval_ms: poll_interval.as_millis() as u64,
        };
        self
    }

    pub fn suggestion_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.suggestion_sweep_interval_ms)
    }

    pub fn submit_guard(&self) -> Duration {
        Duration::from_millis(self.submit_guard_ms)
    }
}
