//! Logging setup and helpers.
//!
//! - `init` installs the process-wide `tracing` subscriber
//! - `LogThrottle` rate-limits repetitive warnings

pub mod throttle;

pub use throttle::LogThrottle;

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber. `RUST_LOG` wins over `default_level` when set.
///
/// Calling it twice is harmless; the second call is ignored.
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
