// Performance timing for loads, searches and sync requests

use std::time::{Duration, Instant};

/// Load, search or sync slower than this is reported as a warning
pub const SLOW_OPERATION_MS: u64 = 250;

/// Measures one operation and reports it under the `perf` target
pub struct PerfTimer {
    name: &'static str,
    start: Instant,
    threshold_ms: Option<u64>,
    stopped: bool,
}

impl PerfTimer {
    /// Create a new performance timer
    ///
    /// # Arguments
    /// * `name` - Name of the operation being timed
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            start: Instant::now(),
            threshold_ms: None,
            stopped: false,
        }
    }

    /// Create a timer that warns when the operation exceeds `threshold_ms`
    pub fn with_threshold(name: &'static str, threshold_ms: u64) -> Self {
        Self {
            threshold_ms: Some(threshold_ms),
            ..Self::new(name)
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer, recording how many items the operation produced
    ///
    /// # Arguments
    /// * `items` - Lines loaded, matches found or targets computed
    ///
    /// # Returns
    /// Elapsed duration
    pub fn stop(mut self, items: usize) -> Duration {
        self.stopped = true;
        let elapsed = self.start.elapsed();
        let duration_ms = elapsed.as_millis();

        match self.threshold_ms {
            Some(threshold) if duration_ms >= threshold as u128 => {
                tracing::warn!(
                    target: "perf",
                    operation = self.name,
                    duration_ms,
                    items,
                    "Slow operation detected"
                );
            }
            _ => {
                tracing::debug!(
                    target: "perf",
                    operation = self.name,
                    duration_ms,
                    items,
                    "Operation completed"
                );
            }
        }

        elapsed
    }
}

impl Drop for PerfTimer {
    fn drop(&mut self) {
        if self.stopped {
            return;
        }
        // Abandoned early, usually by an error path
        tracing::debug!(
            target: "perf",
            operation = self.name,
            duration_ms = self.start.elapsed().as_millis(),
            "Operation abandoned"
        );
    }
}

/// Macro for easy performance timing
#[macro_export]
macro_rules! perf_time {
    ($name:expr) => {
        $crate::perf::PerfTimer::with_threshold($name, $crate::perf::SLOW_OPERATION_MS)
    };
    ($name:expr, $threshold_ms:expr) => {
        $crate::perf::PerfTimer::with_threshold($name, $threshold_ms)
    };
}
