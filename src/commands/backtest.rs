//! Backtest command handler.
//!
//! Implements the `backtest` subcommand: replays a candle file through the
//! simulated venue with one registered strategy attached.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::backtest::{BacktestConfig, BacktestExchange, KLineReplay};
use crate::cli::BacktestCliConfig;
use crate::execution::ExchangeSession;
use crate::signal::shutdown_channel;
use crate::state::SnapshotStore;
use crate::strategy::{StrategyContext, StrategyRegistry};

const SESSION_NAME: &str = "backtest";

/// Backtest results in JSON-serializable format.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestOutput {
    pub strategy: String,
    pub strategy_id: String,
    pub symbol: String,
    pub klines: usize,
    pub fills: usize,
    pub interrupted: bool,
    pub closed_orders: usize,
    pub open_orders: usize,
    /// Total (available + locked) per currency at the end of the run
    pub balances: BTreeMap<String, String>,
    pub final_state: serde_json::Value,
}

/// Run a backtest with the provided CLI configuration.
///
/// # Errors
/// Returns error if the candle file cannot be read, the strategy cannot be
/// built, or the snapshot file cannot be read or written.
pub async fn run_backtest(config: BacktestCliConfig) -> Result<BacktestOutput, Box<dyn std::error::Error>> {
    info!("--- Running Backtest ---");
    info!(
        strategy = %config.strategy,
        symbol = %config.market.symbol,
        klines = %config.klines.display(),
        "Backtest configuration"
    );

    let replay = KLineReplay::from_json_file(&config.klines)?;
    info!(candles = replay.len(), "Candles loaded");

    let exchange = Arc::new(BacktestExchange::new(BacktestConfig {
        name: SESSION_NAME.to_string(),
        markets: vec![config.market.clone()],
        balances: config.balances.clone(),
        fees: config.fees,
        start_time: replay.start_time().unwrap_or_default(),
    }));
    let session = ExchangeSession::backtest(SESSION_NAME, exchange.clone());
    let ctx = StrategyContext::new(session, Arc::new(exchange.clock()));
    let strategy = StrategyRegistry::builtin().build(&config.strategy, config.strategy_config.clone(), ctx)?;

    let store = config.state_file.as_ref().map(SnapshotStore::new);
    if let Some(store) = &store {
        if let Some(saved) = store.load::<serde_json::Value>()? {
            info!(path = %store.path().display(), "Restoring strategy snapshot");
            strategy.import_state(saved)?;
        }
    }

    let (trigger, shutdown) = shutdown_channel();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping replay");
            trigger.trigger();
        }
    });

    let summary = replay.run(&exchange, &[strategy.clone()], &shutdown).await?;
    ctrl_c.abort();

    let final_state = strategy.export_state()?;
    if let Some(store) = &store {
        store.save(&final_state)?;
        info!(path = %store.path().display(), "Strategy snapshot saved");
    }

    let symbol = config.market.symbol.clone();
    let balances: BTreeMap<String, String> = exchange
        .account()
        .balances()
        .iter()
        .map(|(currency, balance)| (currency.clone(), balance.total().to_string()))
        .collect();

    let output = BacktestOutput {
        strategy: config.strategy.clone(),
        strategy_id: strategy.id().to_string(),
        symbol: symbol.clone(),
        klines: summary.klines,
        fills: summary.fills,
        interrupted: summary.interrupted,
        closed_orders: exchange.query_closed_orders(&symbol)?.len(),
        open_orders: exchange.open_order_count(&symbol)?,
        balances,
        final_state,
    };

    info!("--- Backtest Results ---");
    info!("Candles:        {}", output.klines);
    info!("Fills:          {}", output.fills);
    info!("Closed orders:  {}", output.closed_orders);
    info!("Open orders:    {}", output.open_orders);
    for (currency, total) in &output.balances {
        info!("Balance {:<6} {}", currency, total);
    }
    info!("------------------------");

    if let Some(path) = &config.output {
        let mut file = File::create(path)?;
        let json = serde_json::to_string_pretty(&output)?;
        file.write_all(json.as_bytes())?;
        info!(path = %path.display(), "Results written");
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::FeeSchedule;
    use crate::strategy::dca::{DcaConfig, DcaSnapshot, Phase};
    use crate::types::Market;
    use chrono::{DateTime, Duration, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn candle(minute: i64, open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> serde_json::Value {
        let start = DateTime::<Utc>::UNIX_EPOCH + Duration::minutes(minute);
        json!({
            "symbol": "BTCUSDT",
            "start_time": start,
            "end_time": start + Duration::minutes(1),
            "open": open.to_string(),
            "high": high.to_string(),
            "low": low.to_string(),
            "close": close.to_string(),
        })
    }

    fn config(dir: &tempfile::TempDir) -> BacktestCliConfig {
        let candles = json!([
            candle(0, dec!(100), dec!(100), dec!(100), dec!(100)),
            candle(1, dec!(100), dec!(100), dec!(100), dec!(100)),
            candle(2, dec!(100), dec!(100), dec!(100), dec!(100)),
            candle(3, dec!(100), dec!(100), dec!(98.5), dec!(99.5)),
        ]);
        let klines = dir.path().join("candles.json");
        std::fs::write(&klines, candles.to_string()).unwrap();

        let mut dca = DcaConfig::new("BTCUSDT", dec!(1000));
        dca.max_order_count = 2;
        dca.recover_active_orders = false;

        BacktestCliConfig {
            klines,
            strategy: "dca".into(),
            strategy_config: serde_json::to_value(dca).unwrap(),
            market: Market::new("BTCUSDT", "BTC", "USDT", dec!(0.01), dec!(0.0001)),
            balances: [("USDT".to_string(), dec!(5000))].into_iter().collect(),
            fees: FeeSchedule::zero(),
            state_file: Some(dir.path().join("state.json")),
            output: Some(dir.path().join("results.json")),
        }
    }

    #[tokio::test]
    async fn test_backtest_runs_and_saves_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let output = run_backtest(config(&dir)).await.unwrap();

        assert_eq!(output.klines, 4);
        assert_eq!(output.fills, 1);
        assert_eq!(output.open_orders, 1);
        assert!(dir.path().join("results.json").exists());

        let saved: DcaSnapshot = SnapshotStore::new(dir.path().join("state.json"))
            .load()
            .unwrap()
            .unwrap();
        assert_eq!(saved.phase, Phase::OpenPositionOrderFilled);
        assert_eq!(saved.round, 1);
    }

    #[tokio::test]
    async fn test_mid_round_snapshot_is_refused_on_a_fresh_venue() {
        let dir = tempfile::tempdir().unwrap();
        run_backtest(config(&dir)).await.unwrap();

        // The saved round holds base the next fresh venue never credited
        let err = run_backtest(config(&dir)).await.unwrap_err();
        assert!(err.to_string().contains("active order recovery"), "{err}");
    }
}
