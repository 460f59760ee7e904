//! Exchange Abstraction Layer
//!
//! Venue-agnostic traits for order submission and order queries. The
//! backtest venue and live adapters implement the same traits, so the order
//! book, the reconciler and the strategies never know which one they talk to.

pub mod stream;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::orders::{Order, OrderId, SubmitOrder, Trade};

pub use stream::{Stream, Subscription};

/// Errors raised by venues and by the executor layer in front of them.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExchangeError {
    #[error("Insufficient {currency} balance: required {required}, available {available}")]
    InsufficientBalance {
        currency: String,
        required: Decimal,
        available: Decimal,
    },

    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    #[error("Market is not defined: {0}")]
    MarketNotDefined(String),

    #[error("Matching engine is not initialized for symbol {0}")]
    SymbolNotConfigured(String),

    #[error("No market price available for {0}")]
    NoMarketPrice(String),

    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Exchange session {0} not found")]
    SessionNotFound(String),

    #[error("Remote query failed: {0}")]
    RemoteQueryFailed(String),
}

impl ExchangeError {
    /// Transient errors are worth retrying; everything else is a final answer.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RemoteQueryFailed(_))
    }
}

/// Order submission and open-order listing.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Venue name used in logs and metrics
    fn name(&self) -> &str;

    /// Submit orders in sequence; stops at the first rejection.
    async fn submit_orders(&self, orders: &[SubmitOrder]) -> Result<Vec<Order>, ExchangeError>;

    /// Cancel resting orders.
    async fn cancel_orders(&self, orders: &[Order]) -> Result<(), ExchangeError>;

    /// Currently resting orders for a symbol.
    async fn query_open_orders(&self, symbol: &str) -> Result<Vec<Order>, ExchangeError>;
}

/// Point lookups of a single order's authoritative state and executions.
#[async_trait]
pub trait OrderQueryService: Send + Sync {
    async fn query_order(&self, symbol: &str, order_id: OrderId) -> Result<Order, ExchangeError>;

    /// Trades executed for one order, oldest first.
    async fn query_order_trades(&self, symbol: &str, order_id: OrderId) -> Result<Vec<Trade>, ExchangeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_remote_failures_are_transient() {
        assert!(ExchangeError::RemoteQueryFailed("timeout".into()).is_transient());
        assert!(!ExchangeError::OrderNotFound(OrderId::new(1)).is_transient());
        assert!(!ExchangeError::MarketNotDefined("BTCUSDT".into()).is_transient());
    }

    #[test]
    fn test_error_messages() {
        let err = ExchangeError::SessionNotFound("binance".into());
        assert_eq!(err.to_string(), "Exchange session binance not found");
    }
}
