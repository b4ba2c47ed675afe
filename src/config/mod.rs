use crate::error::{LogSyncError, Result};
use crate::search::SearchOptions;
use crate::tail::TailConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Hard capacity bound on concurrently open sources
pub const MAX_SOURCES: usize = 4;

/// Viewer configuration with every tunable of the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewerConfig {
    /// Number of panels that may hold a source at once
    #[serde(default = "default_max_sources")]
    pub max_sources: usize,

    /// Highest numeric rollover suffix probed (`app.log.N`)
    #[serde(default = "default_max_rollover_suffix")]
    pub max_rollover_suffix: u32,

    /// Polling interval used when file notifications are unavailable (in milliseconds)
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Always poll instead of using file notifications
    #[serde(default)]
    pub force_polling: bool,

    /// Compile search patterns case-insensitively
    #[serde(default)]
    pub case_insensitive_search: bool,

    /// Read timestamps without a zone as UTC instead of local time
    #[serde(default)]
    pub assume_utc: bool,

    /// Whether newly opened sources start in follow mode
    #[serde(default)]
    pub follow_by_default: bool,

    /// Maximum number of files returned by a directory scan
    #[serde(default = "default_scan_max_results")]
    pub scan_max_results: usize,
}

// Default value functions for serde
fn default_max_sources() -> usize {
    MAX_SOURCES
}

fn default_max_rollover_suffix() -> u32 {
    crate::rollover::DEFAULT_MAX_SUFFIX
}

fn default_poll_interval() -> u64 {
    500
}

fn default_scan_max_results() -> usize {
    500
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            max_sources: default_max_sources(),
            max_rollover_suffix: default_max_rollover_suffix(),
            poll_interval_ms: default_poll_interval(),
            force_polling: false,
            case_insensitive_search: false,
            assume_utc: false,
            follow_by_default: false,
            scan_max_results: default_scan_max_results(),
        }
    }
}

impl ViewerConfig {
    /// Load the configuration from a file (supports TOML and JSON)
    pub fn from_file(path: &Path) -> Result<ViewerConfig> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| LogSyncError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        let config = match extension {
            "toml" => Self::parse_toml(&contents)?,
            "json" => Self::parse_json(&contents)?,
            _ => {
                return Err(LogSyncError::InvalidConfig(format!(
                    "Unsupported file format: {}. Use .toml or .json",
                    extension
                )))
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Load `path` when given, defaults otherwise
    pub fn load(path: Option<&Path>) -> Result<ViewerConfig> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    fn parse_toml(contents: &str) -> Result<ViewerConfig> {
        toml::from_str(contents)
            .map_err(|e| LogSyncError::InvalidConfig(format!("Failed to parse TOML: {}", e)))
    }

    fn parse_json(contents: &str) -> Result<ViewerConfig> {
        serde_json::from_str(contents)
            .map_err(|e| LogSyncError::InvalidConfig(format!("Failed to parse JSON: {}", e)))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_sources == 0 || self.max_sources > MAX_SOURCES {
            return Err(LogSyncError::ConfigValidationError(format!(
                "max_sources must be between 1 and {}",
                MAX_SOURCES
            )));
        }

        if self.max_rollover_suffix == 0 || self.max_rollover_suffix > 1000 {
            return Err(LogSyncError::ConfigValidationError(
                "max_rollover_suffix must be between 1 and 1000".to_string(),
            ));
        }

        if self.poll_interval_ms < 10 {
            return Err(LogSyncError::ConfigValidationError(
                "poll_interval_ms must be at least 10".to_string(),
            ));
        }

        if self.scan_max_results == 0 {
            return Err(LogSyncError::ConfigValidationError(
                "scan_max_results must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Watcher settings derived from this configuration
    pub fn tail_config(&self) -> TailConfig {
        TailConfig {
            poll_interval: self.poll_interval(),
            force_polling: self.force_polling,
            max_suffix: self.max_rollover_suffix,
        }
    }

    pub fn search_options(&self) -> SearchOptions {
        SearchOptions {
            case_insensitive: self.case_insensitive_search,
        }
    }
}
