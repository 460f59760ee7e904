//! Time sources.
//!
//! Everything time-based (order timestamps, reconciliation exclusion window,
//! strategy round gates) reads a [`Clock`], so a backtest can drive time from
//! the replayed data instead of the wall clock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
///
/// Cloning shares the underlying time.
#[derive(Debug, Clone)]
pub struct SimulatedClock {
    current: Arc<RwLock<DateTime<Utc>>>,
}

impl SimulatedClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(RwLock::new(start)),
        }
    }

    /// Move the clock to `time`. Time never goes backwards.
    pub fn set(&self, time: DateTime<Utc>) {
        let mut current = self.current.write();
        if time > *current {
            *current = time;
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut current = self.current.write();
        *current += by;
    }
}

impl Clock for SimulatedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.read()
    }
}
