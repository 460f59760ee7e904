//! CLI command handlers.
//!
//! This module contains the implementation for each CLI subcommand,
//! delegating to the backtest venue and the strategy registry.

mod backtest;

pub use backtest::{run_backtest, BacktestOutput};

use crate::strategy::StrategyRegistry;

/// Names accepted by `backtest --strategy`.
pub fn list_strategies() -> Vec<String> {
    StrategyRegistry::builtin()
        .names()
        .into_iter()
        .map(str::to_string)
        .collect()
}
