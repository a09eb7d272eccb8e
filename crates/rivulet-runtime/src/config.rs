//! Runtime configuration
//!
//! Supports both YAML and TOML configuration files.
//!
//! # Example YAML configuration:
//! ```yaml
//! # Capacity of every queue between nodes
//! queue_capacity: 512
//!
//! # Capacity of external sink delivery queues
//! sink_queue_capacity: 512
//!
//! # Timer period of windowed aggregations (0 disables ticks)
//! tick_interval_ms: 100
//!
//! # Width of an emission slot
//! emit_granularity_ms: 100
//!
//! # Drop group state once its window empties
//! reclaim_idle_groups: false
//!
//! logging:
//!   level: info
//!   format: json
//! ```

use crate::aggregate_node::{AggregatorSettings, DEFAULT_EMIT_GRANULARITY_MS};
use crate::queue::DEFAULT_QUEUE_CAPACITY;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Slots in every queue between nodes
    pub queue_capacity: usize,

    /// Slots in every external sink delivery queue
    pub sink_queue_capacity: usize,

    /// Tick period of windowed aggregations; 0 disables ticks
    pub tick_interval_ms: u64,

    /// Width of an emission slot
    pub emit_granularity_ms: i64,

    /// Remove a group once a tick empties its window
    pub reclaim_idle_groups: bool,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            sink_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            tick_interval_ms: 100,
            emit_granularity_ms: DEFAULT_EMIT_GRANULARITY_MS,
            reclaim_idle_groups: false,
            logging: LoggingConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,

    /// Include timestamps
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            timestamps: true,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a file (YAML or TOML, auto-detected by extension)
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e.to_string()))?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match extension.as_str() {
            "yaml" | "yml" => Self::from_yaml(&content),
            "toml" => Self::from_toml(&content),
            _ => Self::from_yaml(&content).or_else(|_| Self::from_toml(&content)),
        }
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Merge another config into this one (other values take precedence
    /// where they differ from the defaults).
    ///
    /// A value equal to its default counts as unset, so a merge never
    /// restores a default: `reclaim_idle_groups` can be switched on this way
    /// but not back off, and `tick_interval_ms` cannot return to 100.
    pub fn merge(&mut self, other: RuntimeConfig) {
        let defaults = RuntimeConfig::default();
        if other.queue_capacity != defaults.queue_capacity {
            self.queue_capacity = other.queue_capacity;
        }
        if other.sink_queue_capacity != defaults.sink_queue_capacity {
            self.sink_queue_capacity = other.sink_queue_capacity;
        }
        if other.tick_interval_ms != defaults.tick_interval_ms {
            self.tick_interval_ms = other.tick_interval_ms;
        }
        if other.emit_granularity_ms != defaults.emit_granularity_ms {
            self.emit_granularity_ms = other.emit_granularity_ms;
        }
        if other.reclaim_idle_groups != defaults.reclaim_idle_groups {
            self.reclaim_idle_groups = other.reclaim_idle_groups;
        }
        if other.logging != defaults.logging {
            self.logging = other.logging;
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn aggregator_settings(&self) -> AggregatorSettings {
        AggregatorSettings {
            emit_granularity_ms: self.emit_granularity_ms,
            reclaim_idle_groups: self.reclaim_idle_groups,
        }
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    IoError(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),
}
