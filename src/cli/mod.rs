//! CLI argument parsing using clap.
//!
//! This module defines the command-line interface for orderflow,
//! including all subcommands and their arguments.

mod config;

pub use config::{parse_balances, BacktestCliConfig, CliConfigError};

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;

/// orderflow - order lifecycle engine and strategy runner
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Set the verbosity level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    pub verbose: String,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Replay historical candles through the simulated venue
    Backtest(BacktestArgs),

    /// List the registered strategy names
    Strategies,
}

/// Arguments of the `backtest` subcommand.
#[derive(Args, Debug, Clone)]
pub struct BacktestArgs {
    /// JSON file holding an array of candles
    #[arg(long)]
    pub klines: PathBuf,
    /// Registered strategy name
    #[arg(long, default_value = "dca")]
    pub strategy: String,
    /// Strategy configuration as inline JSON (replaces the DCA flags below)
    #[arg(long)]
    pub strategy_config: Option<String>,

    /// Symbol of the simulated market (e.g., "BTCUSDT")
    #[arg(long, default_value = "BTCUSDT")]
    pub symbol: String,
    /// Base currency of the market
    #[arg(long, default_value = "BTC")]
    pub base_currency: String,
    /// Quote currency of the market
    #[arg(long, default_value = "USDT")]
    pub quote_currency: String,
    /// Price increment of the market
    #[arg(long, default_value = "0.01")]
    pub tick_size: Decimal,
    /// Quantity increment of the market
    #[arg(long, default_value = "0.000001")]
    pub step_size: Decimal,
    /// Starting balances (e.g., "USDT=10000,BTC=0")
    #[arg(long, default_value = "USDT=10000")]
    pub balances: String,
    /// Maker fee rate
    #[arg(long, default_value = "0.001")]
    pub maker_fee: Decimal,
    /// Taker fee rate
    #[arg(long, default_value = "0.001")]
    pub taker_fee: Decimal,

    /// DCA quote budget per round
    #[arg(long, default_value = "1000")]
    pub budget: Decimal,
    /// DCA staged orders per round
    #[arg(long, default_value_t = 5)]
    pub max_order_count: u32,
    /// DCA price step between staged orders
    #[arg(long, default_value = "0.01")]
    pub price_deviation: Decimal,
    /// DCA take-profit ratio over average cost
    #[arg(long, default_value = "0.02")]
    pub take_profit_ratio: Decimal,
    /// DCA cooldown between rounds in seconds
    #[arg(long, default_value_t = 300)]
    pub cooldown_secs: u64,

    /// Restore the strategy snapshot from this file and save it back afterwards
    #[arg(long)]
    pub state_file: Option<PathBuf>,
    /// Write a JSON summary of the run to this file
    #[arg(long)]
    pub output: Option<PathBuf>,
}
