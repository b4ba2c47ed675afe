// Severity module - Per-line log level classification

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Log level recognized in a line, most severe first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityLevel {
    Fatal,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl SeverityLevel {
    /// Levels in the order they are tried
    pub const PRIORITY: [SeverityLevel; 6] = [
        SeverityLevel::Fatal,
        SeverityLevel::Error,
        SeverityLevel::Warn,
        SeverityLevel::Info,
        SeverityLevel::Debug,
        SeverityLevel::Trace,
    ];

    fn keywords(self) -> &'static str {
        match self {
            SeverityLevel::Fatal => "FATAL|CRITICAL",
            SeverityLevel::Error => "ERROR|ERR",
            SeverityLevel::Warn => "WARN|WARNING",
            SeverityLevel::Info => "INFO",
            SeverityLevel::Debug => "DEBUG|DBG",
            SeverityLevel::Trace => "TRACE|VERBOSE",
        }
    }

    fn regex(self) -> &'static Regex {
        static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
        let patterns = PATTERNS.get_or_init(|| {
            SeverityLevel::PRIORITY
                .iter()
                .map(|level| {
                    Regex::new(&format!(r"(?i)\b(?:{})\b", level.keywords()))
                        .expect("severity pattern is valid")
                })
                .collect()
        });
        &patterns[self as usize]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SeverityLevel::Fatal => "fatal",
            SeverityLevel::Error => "error",
            SeverityLevel::Warn => "warn",
            SeverityLevel::Info => "info",
            SeverityLevel::Debug => "debug",
            SeverityLevel::Trace => "trace",
        }
    }
}

impl std::fmt::Display for SeverityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classify a line by the most severe level keyword it contains
///
/// Keywords match as whole words, ignoring case.
pub fn classify(raw_text: &str) -> Option<SeverityLevel> {
    SeverityLevel::PRIORITY
        .into_iter()
        .find(|level| level.regex().is_match(raw_text))
}

/// Byte spans of every level keyword in a line, for highlighting
pub fn keyword_spans(raw_text: &str) -> Vec<(SeverityLevel, usize, usize)> {
    let mut spans: Vec<_> = SeverityLevel::PRIORITY
        .into_iter()
        .flat_map(|level| {
            level
                .regex()
                .find_iter(raw_text)
                .map(move |m| (level, m.start(), m.end()))
        })
        .collect();
    spans.sort_by_key(|&(_, start, _)| start);
    spans
}
