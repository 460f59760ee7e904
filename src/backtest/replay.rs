//! Candle replay driving the simulated venue and attached strategies.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, info};

use super::exchange::BacktestExchange;
use crate::exchange::ExchangeError;
use crate::signal::Shutdown;
use crate::strategy::SingleExchangeStrategy;
use crate::types::KLine;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("Failed to read candle file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse candle file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid candle for {symbol} at {time}: {reason}")]
    InvalidCandle {
        symbol: String,
        time: DateTime<Utc>,
        reason: String,
    },

    #[error("Venue error during replay: {0}")]
    Exchange(#[from] ExchangeError),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplaySummary {
    pub klines: usize,
    pub fills: usize,
    pub first_time: Option<DateTime<Utc>>,
    pub last_time: Option<DateTime<Utc>>,
    /// True when the replay stopped early on shutdown
    pub interrupted: bool,
}

/// Ordered candle sequence.
#[derive(Debug, Clone)]
pub struct KLineReplay {
    klines: Vec<KLine>,
}

impl KLineReplay {
    /// Candles are replayed by close time; ties keep input order.
    ///
    /// Every price of every candle must be positive.
    pub fn new(mut klines: Vec<KLine>) -> Result<Self, ReplayError> {
        for kline in &klines {
            check_candle(kline)?;
        }
        klines.sort_by_key(|k| k.end_time);
        Ok(Self { klines })
    }

    /// Load a JSON array of candles.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ReplayError> {
        let data = std::fs::read_to_string(path)?;
        let klines: Vec<KLine> = serde_json::from_str(&data)?;
        Self::new(klines)
    }

    pub fn len(&self) -> usize {
        self.klines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.klines.is_empty()
    }

    /// Open time of the first candle, used as the venue's starting clock.
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.klines.first().map(|k| k.start_time)
    }

    /// Feed every candle into `exchange`, then step each strategy once.
    ///
    /// Stepping after each candle keeps a replay deterministic: every event
    /// a candle produces is handled before the next candle is fed.
    pub async fn run(
        &self,
        exchange: &BacktestExchange,
        strategies: &[Arc<dyn SingleExchangeStrategy>],
        shutdown: &Shutdown,
    ) -> Result<ReplaySummary, ReplayError> {
        let mut summary = ReplaySummary::default();

        for kline in &self.klines {
            if shutdown.is_triggered() {
                info!(processed = summary.klines, "Replay interrupted by shutdown");
                summary.interrupted = true;
                break;
            }

            summary.fills += exchange.process_kline(kline)?;
            summary.klines += 1;
            summary.first_time.get_or_insert(kline.end_time);
            summary.last_time = Some(kline.end_time);

            for strategy in strategies {
                strategy.step().await;
            }
            debug!(symbol = %kline.symbol, close = %kline.close, time = %kline.end_time, "Candle replayed");
        }

        info!(
            klines = summary.klines,
            fills = summary.fills,
            "Replay finished"
        );
        Ok(summary)
    }
}

fn check_candle(kline: &KLine) -> Result<(), ReplayError> {
    let invalid = |reason: String| ReplayError::InvalidCandle {
        symbol: kline.symbol.clone(),
        time: kline.end_time,
        reason,
    };
    let prices = [
        ("open", kline.open),
        ("high", kline.high),
        ("low", kline.low),
        ("close", kline.close),
    ];
    if let Some((name, price)) = prices.iter().find(|(_, price)| *price <= Decimal::ZERO) {
        return Err(invalid(format!("{name} price {price} is not positive")));
    }
    if kline.low > kline.high {
        return Err(invalid(format!("low {} above high {}", kline.low, kline.high)));
    }
    Ok(())
}
