pub mod backtest;
pub mod cli;
pub mod clock;
pub mod commands;
pub mod exchange;
pub mod execution;
pub mod logging;
pub mod metrics;
pub mod orders;
pub mod resilience;
pub mod signal;
pub mod state;
pub mod strategy;
pub mod trader;
pub mod types;
