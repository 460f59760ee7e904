//! Prometheus Metrics Module
//!
//! Pre-registered metrics for the order lifecycle: book sizes,
//! reconciliation outcomes, strategy transitions and simulated fills.

use lazy_static::lazy_static;
use prometheus::{
    opts, register_gauge_vec, register_int_counter_vec, Encoder, GaugeVec, IntCounterVec,
    TextEncoder,
};

lazy_static! {
    // --- Order Book Metrics ---

    /// Orders held in the local active order book
    pub static ref ACTIVE_ORDERS: GaugeVec = register_gauge_vec!(
        opts!("orderflow_active_orders", "Orders held in the local active order book"),
        &["symbol"]
    ).expect("FATAL: Failed to register ACTIVE_ORDERS metric - check for duplicate registration");

    /// Open orders reported by the venue during the last reconciliation
    pub static ref REMOTE_OPEN_ORDERS: GaugeVec = register_gauge_vec!(
        opts!("orderflow_remote_open_orders", "Open orders reported by the venue"),
        &["symbol"]
    ).expect("FATAL: Failed to register REMOTE_OPEN_ORDERS metric - check for duplicate registration");

    // --- Reconciliation Metrics ---

    /// Reconciliation passes by result (ok, partial, failed)
    pub static ref RECONCILIATION_PASSES: IntCounterVec = register_int_counter_vec!(
        opts!("orderflow_reconciliation_passes_total", "Reconciliation passes"),
        &["symbol", "result"]
    ).expect("FATAL: Failed to register RECONCILIATION_PASSES metric - check for duplicate registration");

    /// Point lookups that failed during reconciliation
    pub static ref RECONCILIATION_LOOKUP_FAILURES: IntCounterVec = register_int_counter_vec!(
        opts!("orderflow_reconciliation_lookup_failures_total", "Failed order lookups during reconciliation"),
        &["symbol"]
    ).expect("FATAL: Failed to register RECONCILIATION_LOOKUP_FAILURES metric - check for duplicate registration");

    // --- Strategy Metrics ---

    /// Strategy state transitions
    pub static ref STRATEGY_STATE: IntCounterVec = register_int_counter_vec!(
        opts!("orderflow_strategy_state_transitions_total", "Strategy state transitions"),
        &["strategy_id", "from_state", "to_state"]
    ).expect("FATAL: Failed to register STRATEGY_STATE metric - check for duplicate registration");

    // --- Matching Metrics ---

    /// Fills produced by the simulated venue
    pub static ref MATCHING_FILLS: IntCounterVec = register_int_counter_vec!(
        opts!("orderflow_matching_fills_total", "Fills produced by the simulated venue"),
        &["symbol", "side"]
    ).expect("FATAL: Failed to register MATCHING_FILLS metric - check for duplicate registration");
}

pub fn set_active_orders(symbol: &str, count: usize) {
    ACTIVE_ORDERS.with_label_values(&[symbol]).set(count as f64);
}

pub fn set_remote_open_orders(symbol: &str, count: usize) {
    REMOTE_OPEN_ORDERS.with_label_values(&[symbol]).set(count as f64);
}

/// Record a reconciliation pass outcome
pub fn record_reconciliation(symbol: &str, result: &str) {
    RECONCILIATION_PASSES
        .with_label_values(&[symbol, result])
        .inc();
}

pub fn record_lookup_failure(symbol: &str) {
    RECONCILIATION_LOOKUP_FAILURES
        .with_label_values(&[symbol])
        .inc();
}

/// Record a committed strategy transition
pub fn record_transition(strategy_id: &str, from: &str, to: &str) {
    STRATEGY_STATE
        .with_label_values(&[strategy_id, from, to])
        .inc();
}

pub fn record_fill(symbol: &str, side: &str) {
    MATCHING_FILLS.with_label_values(&[symbol, side]).inc();
}

/// Get metrics as text for a scrape endpoint
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode Prometheus metrics: {}", e);
        return String::new();
    }

    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Prometheus metrics buffer is not valid UTF-8: {}", e);
            String::new()
        }
    }
}
