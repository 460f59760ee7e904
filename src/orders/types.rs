//! Core types for order management.
//!
//! Provides type-safe order identifiers, order lifecycle status and the
//! order/trade records exchanged between venues and strategies.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{OrderSide, OrderType};

/// Type-safe order identifier (venue-assigned).
///
/// Unique within a symbol's order flow. Uses a newtype wrapper to prevent
/// accidentally mixing order IDs with trade IDs or sequence numbers.
///
/// # Example
///
/// ```
/// use orderflow::orders::OrderId;
///
/// let id = OrderId::new(42);
/// assert_eq!(id.value(), 42);
/// assert_eq!(id.to_string(), "42");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderId(u64);

impl OrderId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for OrderId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Order lifecycle status as reported by the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Accepted and resting, nothing executed yet
    New,
    /// Some quantity executed, remainder still resting
    PartiallyFilled,
    /// All quantity executed
    Filled,
    /// Removed by user or venue
    Canceled,
    /// Refused by the venue
    Rejected,
}

impl OrderStatus {
    /// Returns true if no further updates are expected for the order.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Canceled | Self::Rejected)
    }

    /// Returns true if the order may still receive fills.
    pub fn may_fill(&self) -> bool {
        matches!(self, Self::New | Self::PartiallyFilled)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "New"),
            Self::PartiallyFilled => write!(f, "PartiallyFilled"),
            Self::Filled => write!(f, "Filled"),
            Self::Canceled => write!(f, "Canceled"),
            Self::Rejected => write!(f, "Rejected"),
        }
    }
}

/// Order request before the venue assigns an identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitOrder {
    /// Caller-chosen tag, echoed back on every update of the order
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    /// Limit price (ignored for market orders)
    pub price: Decimal,
    pub quantity: Decimal,
}

impl SubmitOrder {
    pub fn limit(
        symbol: impl Into<String>,
        side: OrderSide,
        price: Decimal,
        quantity: Decimal,
    ) -> Self {
        Self {
            client_order_id: String::new(),
            symbol: symbol.into(),
            side,
            order_type: OrderType::Limit,
            price,
            quantity,
        }
    }

    pub fn market(symbol: impl Into<String>, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            client_order_id: String::new(),
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            price: Decimal::ZERO,
            quantity,
        }
    }

    #[must_use]
    pub fn with_client_order_id(mut self, client_order_id: impl Into<String>) -> Self {
        self.client_order_id = client_order_id.into();
        self
    }
}

/// An order as known to the venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub price: Decimal,
    pub quantity: Decimal,
    pub executed_quantity: Decimal,
    pub status: OrderStatus,
    pub creation_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
}

impl Order {
    /// Build a venue order from a request.
    pub fn from_submit(
        order_id: OrderId,
        submit: &SubmitOrder,
        status: OrderStatus,
        time: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id,
            client_order_id: submit.client_order_id.clone(),
            symbol: submit.symbol.clone(),
            side: submit.side,
            order_type: submit.order_type,
            price: submit.price,
            quantity: submit.quantity,
            executed_quantity: Decimal::ZERO,
            status,
            creation_time: time,
            update_time: time,
        }
    }

    pub fn remaining_quantity(&self) -> Decimal {
        self.quantity - self.executed_quantity
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// A single execution against an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: u64,
    pub order_id: OrderId,
    pub symbol: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub quote_quantity: Decimal,
    pub fee: Decimal,
    pub fee_currency: String,
    pub is_maker: bool,
    pub time: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_terminal_statuses() {
        assert!(!OrderStatus::New.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Canceled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());

        assert!(OrderStatus::PartiallyFilled.may_fill());
        assert!(!OrderStatus::Canceled.may_fill());
    }

    #[test]
    fn test_order_from_submit_carries_request_fields() {
        let submit = SubmitOrder::limit("BTCUSDT", OrderSide::Buy, dec!(100), dec!(0.5))
            .with_client_order_id("dca-open-1");
        let now = Utc::now();
        let order = Order::from_submit(OrderId::new(7), &submit, OrderStatus::New, now);

        assert_eq!(order.order_id, OrderId::new(7));
        assert_eq!(order.client_order_id, "dca-open-1");
        assert_eq!(order.remaining_quantity(), dec!(0.5));
        assert_eq!(order.creation_time, order.update_time);
        assert!(!order.is_terminal());
    }

    #[test]
    fn test_order_id_ordering() {
        let mut ids = vec![OrderId::new(3), OrderId::new(1), OrderId::new(2)];
        ids.sort();
        assert_eq!(ids, vec![OrderId::new(1), OrderId::new(2), OrderId::new(3)]);
    }
}
