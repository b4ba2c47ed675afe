// Library exports for the logsync multi-log viewer core

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod perf;
pub mod rollover;
pub mod search;
pub mod severity;
pub mod source;
pub mod sync;
pub mod tail;
pub mod timestamp;

pub use engine::{EngineEvent, LogEngine};
pub use error::{LogSyncError, Result};
