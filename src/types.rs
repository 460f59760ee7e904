//! Common Types Module
//!
//! Shared market types used by the venue, the order book and the strategies.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::exchange::ExchangeError;

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

/// Order type supported by the venues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Limit => write!(f, "limit"),
            OrderType::Market => write!(f, "market"),
        }
    }
}

/// A candle of market data for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KLine {
    pub symbol: String,
    #[serde(default = "default_interval")]
    pub interval: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    #[serde(default)]
    pub volume: Decimal,
    #[serde(default = "default_closed")]
    pub closed: bool,
}

fn default_interval() -> String {
    "1m".to_string()
}

fn default_closed() -> bool {
    true
}

impl KLine {
    /// Intrabar price path used by the simulated venue.
    ///
    /// Up candles visit the low before the high, down candles the reverse.
    pub fn price_path(&self) -> [Decimal; 4] {
        if self.close >= self.open {
            [self.open, self.low, self.high, self.close]
        } else {
            [self.open, self.high, self.low, self.close]
        }
    }
}

/// Formatting rules a venue enforces for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub symbol: String,
    pub base_currency: String,
    pub quote_currency: String,
    /// Smallest price increment
    pub tick_size: Decimal,
    /// Smallest quantity increment
    pub step_size: Decimal,
    #[serde(default)]
    pub min_quantity: Decimal,
    #[serde(default)]
    pub min_notional: Decimal,
}

impl Market {
    pub fn new(
        symbol: impl Into<String>,
        base_currency: impl Into<String>,
        quote_currency: impl Into<String>,
        tick_size: Decimal,
        step_size: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            base_currency: base_currency.into(),
            quote_currency: quote_currency.into(),
            tick_size,
            step_size,
            min_quantity: Decimal::ZERO,
            min_notional: Decimal::ZERO,
        }
    }

    /// Truncate a price down to the tick grid.
    pub fn format_price(&self, price: Decimal) -> Decimal {
        truncate_to(price, self.tick_size)
    }

    /// Truncate a quantity down to the step grid.
    pub fn format_quantity(&self, quantity: Decimal) -> Decimal {
        truncate_to(quantity, self.step_size)
    }

    /// Reject formatted orders that fall under the venue minimums.
    pub fn validate(&self, price: Decimal, quantity: Decimal) -> Result<(), ExchangeError> {
        if quantity <= Decimal::ZERO || quantity < self.min_quantity {
            return Err(ExchangeError::InvalidOrder(format!(
                "{} quantity {} below minimum {}",
                self.symbol, quantity, self.min_quantity
            )));
        }
        if !price.is_zero() && price * quantity < self.min_notional {
            return Err(ExchangeError::InvalidOrder(format!(
                "{} notional {} below minimum {}",
                self.symbol,
                price * quantity,
                self.min_notional
            )));
        }
        Ok(())
    }
}

fn truncate_to(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    let truncated = (value / step).floor() * step;
    truncated.normalize()
}
