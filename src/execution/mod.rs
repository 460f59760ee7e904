//! Order execution layer between strategies and venues.
//!
//! Strategies never call a venue directly. They hand orders to an
//! executor, which resolves the symbol's market rules, snaps price and
//! quantity to the venue grid and submits through the session's venue.

mod router;
mod session;

pub use router::OrderExecutionRouter;
pub use session::ExchangeSession;

use async_trait::async_trait;
use tracing::info;

use crate::exchange::ExchangeError;
use crate::orders::{Order, SubmitOrder};
use crate::types::OrderType;

/// Submission interface strategies depend on.
#[async_trait]
pub trait OrderExecutor: Send + Sync {
    async fn submit_orders(&self, orders: &[SubmitOrder]) -> Result<Vec<Order>, ExchangeError>;
    async fn cancel_orders(&self, orders: &[Order]) -> Result<(), ExchangeError>;
}

/// Format every order with its market's rules.
///
/// Fails on the first order whose market is unknown or that falls below the
/// venue minimums; nothing is submitted in that case.
pub(crate) fn format_orders(
    session: &ExchangeSession,
    orders: &[SubmitOrder],
) -> Result<Vec<SubmitOrder>, ExchangeError> {
    orders
        .iter()
        .map(|order| {
            let market = session
                .market(&order.symbol)
                .ok_or_else(|| ExchangeError::MarketNotDefined(order.symbol.clone()))?;

            let mut formatted = order.clone();
            formatted.quantity = market.format_quantity(order.quantity);
            if order.order_type == OrderType::Limit {
                formatted.price = market.format_price(order.price);
            }
            market.validate(formatted.price, formatted.quantity)?;
            Ok(formatted)
        })
        .collect()
}

/// Executor bound to a single session.
#[derive(Debug, Clone)]
pub struct SessionOrderExecutor {
    session: ExchangeSession,
}

impl SessionOrderExecutor {
    pub fn new(session: ExchangeSession) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &ExchangeSession {
        &self.session
    }
}

#[async_trait]
impl OrderExecutor for SessionOrderExecutor {
    async fn submit_orders(&self, orders: &[SubmitOrder]) -> Result<Vec<Order>, ExchangeError> {
        let formatted = format_orders(&self.session, orders)?;
        for order in &formatted {
            info!(
                session = %self.session.name(),
                symbol = %order.symbol,
                side = %order.side,
                order_type = %order.order_type,
                price = %order.price,
                quantity = %order.quantity,
                client_order_id = %order.client_order_id,
                "Submitting order"
            );
        }
        self.session.exchange().submit_orders(&formatted).await
    }

    async fn cancel_orders(&self, orders: &[Order]) -> Result<(), ExchangeError> {
        if orders.is_empty() {
            return Ok(());
        }
        info!(session = %self.session.name(), count = orders.len(), "Cancelling orders");
        self.session.exchange().cancel_orders(orders).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{Exchange, Stream};
    use crate::orders::{OrderId, OrderStatus};
    use crate::types::{Market, OrderSide};
    use chrono::Utc;
    use mockall::mock;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    mock! {
        pub Venue {}

        #[async_trait]
        impl Exchange for Venue {
            fn name(&self) -> &str;
            async fn submit_orders(&self, orders: &[SubmitOrder]) -> Result<Vec<Order>, ExchangeError>;
            async fn cancel_orders(&self, orders: &[Order]) -> Result<(), ExchangeError>;
            async fn query_open_orders(&self, symbol: &str) -> Result<Vec<Order>, ExchangeError>;
        }
    }

    fn session(venue: MockVenue) -> ExchangeSession {
        ExchangeSession::new("binance", Arc::new(venue), Arc::new(Stream::new())).with_markets([
            Market::new("BTCUSDT", "BTC", "USDT", dec!(0.01), dec!(0.0001)),
        ])
    }

    #[tokio::test]
    async fn test_orders_are_formatted_before_submission() {
        let mut venue = MockVenue::new();
        venue
            .expect_submit_orders()
            .withf(|orders| {
                orders.len() == 2
                    && orders[0].price == dec!(100.12)
                    && orders[0].quantity == dec!(0.1234)
                    && orders[1].quantity == dec!(0.5)
            })
            .times(1)
            .returning(|orders| {
                Ok(orders
                    .iter()
                    .enumerate()
                    .map(|(i, o)| {
                        Order::from_submit(OrderId::new(i as u64 + 1), o, OrderStatus::New, Utc::now())
                    })
                    .collect())
            });

        let executor = SessionOrderExecutor::new(session(venue));
        let created = executor
            .submit_orders(&[
                SubmitOrder::limit("BTCUSDT", OrderSide::Buy, dec!(100.129), dec!(0.123456)),
                SubmitOrder::limit("BTCUSDT", OrderSide::Buy, dec!(99), dec!(0.5)),
            ])
            .await
            .unwrap();
        assert_eq!(created.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_market_submits_nothing() {
        let mut venue = MockVenue::new();
        venue.expect_submit_orders().times(0);

        let executor = SessionOrderExecutor::new(session(venue));
        let err = executor
            .submit_orders(&[
                SubmitOrder::limit("BTCUSDT", OrderSide::Buy, dec!(100), dec!(1)),
                SubmitOrder::limit("ETHUSDT", OrderSide::Buy, dec!(10), dec!(1)),
            ])
            .await
            .unwrap_err();
        assert_eq!(err, ExchangeError::MarketNotDefined("ETHUSDT".into()));
    }

    #[tokio::test]
    async fn test_market_order_price_untouched() {
        let s = session(MockVenue::new());
        let formatted =
            format_orders(&s, &[SubmitOrder::market("BTCUSDT", OrderSide::Sell, dec!(1.00009))]).unwrap();
        assert_eq!(formatted[0].price, dec!(0));
        assert_eq!(formatted[0].quantity, dec!(1));
    }
}
