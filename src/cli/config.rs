//! CLI configuration structs bridging CLI arguments to domain types.
//!
//! These structs decouple the CLI parsing layer from the business logic,
//! allowing command handlers to work with validated, typed configurations.

use std::collections::BTreeMap;
use std::path::PathBuf;

use rust_decimal::Decimal;
use thiserror::Error;

use super::BacktestArgs;
use crate::backtest::FeeSchedule;
use crate::strategy::dca::DcaConfig;
use crate::types::Market;

/// Errors that can occur when turning CLI arguments into configuration.
#[derive(Debug, Error)]
pub enum CliConfigError {
    #[error("Invalid balance entry '{0}'. Expected format: CURRENCY=AMOUNT")]
    InvalidBalance(String),

    #[error("Invalid amount for {currency}: {source}")]
    InvalidAmount {
        currency: String,
        source: rust_decimal::Error,
    },

    #[error("Invalid strategy configuration JSON: {0}")]
    InvalidStrategyConfig(#[from] serde_json::Error),

    #[error("Symbol must not be empty")]
    EmptySymbol,

    #[error("Fee rates must not be negative")]
    NegativeFee,
}

/// Validated configuration of a backtest run.
#[derive(Debug, Clone)]
pub struct BacktestCliConfig {
    /// Candle file to replay
    pub klines: PathBuf,
    /// Registered strategy name
    pub strategy: String,
    /// Configuration handed to the strategy factory
    pub strategy_config: serde_json::Value,
    /// The single simulated market
    pub market: Market,
    /// Starting balances per currency
    pub balances: BTreeMap<String, Decimal>,
    /// Simulated venue fees
    pub fees: FeeSchedule,
    /// Optional snapshot file
    pub state_file: Option<PathBuf>,
    /// Optional JSON summary path
    pub output: Option<PathBuf>,
}

impl TryFrom<BacktestArgs> for BacktestCliConfig {
    type Error = CliConfigError;

    fn try_from(args: BacktestArgs) -> Result<Self, Self::Error> {
        if args.symbol.trim().is_empty() {
            return Err(CliConfigError::EmptySymbol);
        }
        if args.maker_fee < Decimal::ZERO || args.taker_fee < Decimal::ZERO {
            return Err(CliConfigError::NegativeFee);
        }

        let strategy_config = match &args.strategy_config {
            Some(raw) => serde_json::from_str(raw)?,
            None => {
                let mut dca = DcaConfig::new(args.symbol.clone(), args.budget);
                dca.max_order_count = args.max_order_count;
                dca.price_deviation = args.price_deviation;
                dca.take_profit_ratio = args.take_profit_ratio;
                dca.cooldown_secs = args.cooldown_secs;
                // The replay drives the strategy; there is nothing to recover
                dca.recover_active_orders = false;
                serde_json::to_value(dca)?
            }
        };

        Ok(Self {
            market: Market::new(
                args.symbol,
                args.base_currency,
                args.quote_currency,
                args.tick_size,
                args.step_size,
            ),
            balances: parse_balances(&args.balances)?,
            fees: FeeSchedule {
                maker_fee_rate: args.maker_fee,
                taker_fee_rate: args.taker_fee,
            },
            klines: args.klines,
            strategy: args.strategy,
            strategy_config,
            state_file: args.state_file,
            output: args.output,
        })
    }
}

/// Parse `"USDT=10000,BTC=0.5"` into a currency map.
pub fn parse_balances(raw: &str) -> Result<BTreeMap<String, Decimal>, CliConfigError> {
    let mut balances = BTreeMap::new();
    for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (currency, amount) = entry
            .split_once('=')
            .ok_or_else(|| CliConfigError::InvalidBalance(entry.to_string()))?;
        let currency = currency.trim().to_uppercase();
        if currency.is_empty() {
            return Err(CliConfigError::InvalidBalance(entry.to_string()));
        }
        let amount: Decimal = amount
            .trim()
            .parse()
            .map_err(|source| CliConfigError::InvalidAmount {
                currency: currency.clone(),
                source,
            })?;
        balances.insert(currency, amount);
    }
    Ok(balances)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_balances() {
        let balances = parse_balances("usdt=10000, BTC=0.5").unwrap();
        assert_eq!(balances.get("USDT"), Some(&dec!(10000)));
        assert_eq!(balances.get("BTC"), Some(&dec!(0.5)));
        assert!(parse_balances("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_balances_rejects_garbage() {
        assert!(matches!(
            parse_balances("USDT:10"),
            Err(CliConfigError::InvalidBalance(_))
        ));
        assert!(matches!(
            parse_balances("USDT=ten"),
            Err(CliConfigError::InvalidAmount { .. })
        ));
    }

    #[test]
    fn test_backtest_args_become_dca_config() {
        let cli = crate::cli::Cli::try_parse_from([
            "orderflow",
            "backtest",
            "--klines",
            "candles.json",
            "--budget",
            "250",
            "--max-order-count",
            "3",
        ])
        .unwrap();
        let crate::cli::Commands::Backtest(args) = cli.command else {
            panic!("expected backtest command");
        };

        let config = BacktestCliConfig::try_from(args).unwrap();
        assert_eq!(config.market.symbol, "BTCUSDT");
        assert_eq!(config.balances.get("USDT"), Some(&dec!(10000)));

        let dca: DcaConfig = serde_json::from_value(config.strategy_config).unwrap();
        assert_eq!(dca.budget, dec!(250));
        assert_eq!(dca.max_order_count, 3);
        assert!(!dca.recover_active_orders);
    }
}
