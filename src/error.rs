use crate::source::SourceId;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main error type for the log sync engine
#[derive(Debug, Error)]
pub enum LogSyncError {
    // Open errors
    #[error("Log file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    #[error("Too many open sources (limit is {0})")]
    TooManySources(usize),

    // Source lookup errors
    #[error("No source open in panel {0}")]
    UnknownSource(SourceId),

    #[error("Line {sequence_index} not found in panel {source_id}")]
    LineNotFound {
        source_id: SourceId,
        sequence_index: u64,
    },

    #[error("No timestamp near line {sequence_index} in panel {source_id}")]
    NoAnchorTimestamp {
        source_id: SourceId,
        sequence_index: u64,
    },

    // Search errors
    #[error("Invalid search pattern: {0}")]
    PatternError(String),

    // File watching errors
    #[error("File watch error: {0}")]
    WatchError(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LogSyncError {
    /// Map an IO error raised while opening `path` onto the open-error kinds.
    pub fn from_io(err: std::io::Error, path: &Path) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => LogSyncError::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => {
                LogSyncError::PermissionDenied(path.to_path_buf())
            }
            _ => LogSyncError::Io(err),
        }
    }

    /// Whether this error means a source could not be opened
    pub fn is_open_error(&self) -> bool {
        matches!(
            self,
            LogSyncError::NotFound(_)
                | LogSyncError::PermissionDenied(_)
                | LogSyncError::TooManySources(_)
        )
    }
}

impl From<regex::Error> for LogSyncError {
    fn from(err: regex::Error) -> Self {
        LogSyncError::PatternError(err.to_string())
    }
}

impl From<notify::Error> for LogSyncError {
    fn from(err: notify::Error) -> Self {
        LogSyncError::WatchError(err.to_string())
    }
}

/// Result type alias for log sync operations
pub type Result<T> = std::result::Result<T, LogSyncError>;
