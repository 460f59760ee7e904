//! Rate-limited logging utilities.
//!
//! Provides `LogThrottle` to prevent log storms from retry loops while still
//! tracking how many lines were suppressed.

use std::time::Duration;

use tokio::time::Instant;

/// A lightweight rate limiter for logging to prevent log storms.
///
/// Uses tokio's clock so paused-time tests see the same throttling as
/// production.
#[derive(Debug)]
pub struct LogThrottle {
    last_log_time: Option<Instant>,
    suppressed_count: u64,
    interval: Duration,
}

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_log_time: None,
            suppressed_count: 0,
            interval,
        }
    }

    /// Checks if a log should be emitted.
    /// Returns true if the interval has passed since the last log.
    /// If false, increments the suppressed counter.
    pub fn should_log(&mut self) -> bool {
        let now = Instant::now();
        match self.last_log_time {
            Some(last) if now.duration_since(last) < self.interval => {
                self.suppressed_count += 1;
                false
            }
            _ => {
                self.last_log_time = Some(now);
                true
            }
        }
    }

    /// Lines suppressed since the last emitted one; resets the count.
    pub fn take_suppressed_count(&mut self) -> u64 {
        std::mem::take(&mut self.suppressed_count)
    }
}
