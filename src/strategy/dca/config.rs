use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::strategy::StrategyError;

/// Longest accepted pause between rounds (one year).
pub const MAX_COOLDOWN_SECS: u64 = 365 * 24 * 60 * 60;

/// Configuration for the DCA strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DcaConfig {
    /// Trading symbol (e.g., "BTCUSDT")
    pub symbol: String,
    /// Quote amount spread over the staged buys of one round
    pub budget: Decimal,
    /// Number of staged buy orders per round
    #[serde(default = "default_max_order_count")]
    pub max_order_count: u32,
    /// Price step between staged buys, as a fraction of the last close
    #[serde(default = "default_price_deviation")]
    pub price_deviation: Decimal,
    /// Take-profit margin over the average cost
    #[serde(default = "default_take_profit_ratio")]
    pub take_profit_ratio: Decimal,
    /// Pause between the end of a round and the start of the next
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Timer interval of the live loop
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Adopt this strategy's open orders from the venue on start
    #[serde(default = "default_true")]
    pub recover_active_orders: bool,
    /// Run a background reconciler for this strategy's orders
    #[serde(default)]
    pub reconcile: bool,
    /// Overrides the default `dca-<symbol>` identifier
    #[serde(default)]
    pub instance_id: Option<String>,
}

fn default_max_order_count() -> u32 {
    5
}

fn default_price_deviation() -> Decimal {
    dec!(0.01)
}

fn default_take_profit_ratio() -> Decimal {
    dec!(0.02)
}

fn default_cooldown_secs() -> u64 {
    300
}

fn default_tick_interval_secs() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

impl DcaConfig {
    pub fn new(symbol: impl Into<String>, budget: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            budget,
            max_order_count: default_max_order_count(),
            price_deviation: default_price_deviation(),
            take_profit_ratio: default_take_profit_ratio(),
            cooldown_secs: default_cooldown_secs(),
            tick_interval_secs: default_tick_interval_secs(),
            recover_active_orders: true,
            reconcile: false,
            instance_id: None,
        }
    }

    pub fn id(&self) -> String {
        self.instance_id
            .clone()
            .unwrap_or_else(|| format!("dca-{}", self.symbol))
    }

    /// Pause between rounds as a signed duration.
    pub fn cooldown(&self) -> Result<chrono::Duration, StrategyError> {
        i64::try_from(self.cooldown_secs)
            .ok()
            .filter(|secs| *secs as u64 <= MAX_COOLDOWN_SECS)
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| {
                StrategyError::InvalidConfig(format!(
                    "cooldown_secs {} exceeds {}",
                    self.cooldown_secs, MAX_COOLDOWN_SECS
                ))
            })
    }

    pub fn validate(&self) -> Result<(), StrategyError> {
        if self.symbol.trim().is_empty() {
            return Err(StrategyError::InvalidConfig("symbol is empty".into()));
        }
        if self.budget <= Decimal::ZERO {
            return Err(StrategyError::InvalidConfig(format!(
                "budget must be positive, got {}",
                self.budget
            )));
        }
        if self.max_order_count == 0 {
            return Err(StrategyError::InvalidConfig(
                "max_order_count must be at least 1".into(),
            ));
        }
        if self.price_deviation <= Decimal::ZERO {
            return Err(StrategyError::InvalidConfig(
                "price_deviation must be positive".into(),
            ));
        }
        // The deepest staged buy must stay above zero
        let deepest = self.price_deviation.checked_mul(Decimal::from(self.max_order_count));
        if deepest.map_or(true, |offset| offset >= Decimal::ONE) {
            return Err(StrategyError::InvalidConfig(format!(
                "price_deviation {} x max_order_count {} reaches zero",
                self.price_deviation, self.max_order_count
            )));
        }
        if self.take_profit_ratio <= Decimal::ZERO {
            return Err(StrategyError::InvalidConfig(
                "take_profit_ratio must be positive".into(),
            ));
        }
        self.cooldown()?;
        if self.tick_interval_secs == 0 {
            return Err(StrategyError::InvalidConfig(
                "tick_interval_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}
