//! Retry with exponential backoff and jitter.
//!
//! Only transient venue errors are retried. Every backoff sleep races the
//! shutdown signal, so a retry loop never outlives its owner.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::{debug, warn};

use crate::exchange::ExchangeError;
use crate::logging::LogThrottle;
use crate::signal::Shutdown;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum RetryError {
    #[error("Retry cancelled by shutdown")]
    Cancelled,

    #[error("Permanent failure: {0}")]
    Permanent(ExchangeError),

    #[error("Gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: ExchangeError },
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Cap on any single delay
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 = doubling)
    pub backoff_multiplier: f64,
    /// Random jitter as fraction of delay (e.g., 0.1 = ±10%)
    pub jitter_fraction: f64,
    /// None retries until success or shutdown
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter_fraction: 0.1,
            max_attempts: None,
        }
    }
}

impl RetryPolicy {
    /// Retry until success or shutdown.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Give up after `attempts` tries.
    pub fn bounded(attempts: u32) -> Self {
        Self {
            max_attempts: Some(attempts.max(1)),
            ..Self::default()
        }
    }

    /// Calculate backoff delay with jitter for the given attempt number (0-based)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let initial_ms = self.initial_delay.as_millis() as f64;
        let base_delay = initial_ms * self.backoff_multiplier.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_delay.as_millis() as f64);

        let jitter_range = capped_delay * self.jitter_fraction;
        let jitter = if jitter_range > 0.0 {
            rand::rng().random_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };
        Duration::from_millis((capped_delay + jitter).max(0.0) as u64)
    }
}

/// Run `op` until it succeeds, fails permanently, runs out of attempts or
/// shutdown is requested.
pub async fn retry_until_success<T, F, Fut>(
    label: &str,
    policy: &RetryPolicy,
    shutdown: &Shutdown,
    mut op: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ExchangeError>>,
{
    let mut shutdown = shutdown.clone();
    let mut throttle = LogThrottle::new(Duration::from_secs(10));
    let mut attempt: u32 = 0;

    loop {
        if shutdown.is_triggered() {
            return Err(RetryError::Cancelled);
        }

        attempt += 1;
        let err = match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation = label, attempt, "Retry succeeded");
                }
                return Ok(value);
            }
            Err(e) if !e.is_transient() => return Err(RetryError::Permanent(e)),
            Err(e) => e,
        };

        if policy.max_attempts.is_some_and(|max| attempt >= max) {
            warn!(operation = label, attempts = attempt, error = %err, "Giving up after retries");
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: err,
            });
        }

        let delay = policy.calculate_delay(attempt - 1);
        if throttle.should_log() {
            warn!(
                operation = label,
                attempt,
                delay_ms = delay.as_millis() as u64,
                suppressed = throttle.take_suppressed_count(),
                error = %err,
                "Transient failure, retrying"
            );
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.wait() => return Err(RetryError::Cancelled),
        }
    }
}
