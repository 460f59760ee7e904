//! Routing orders to one of several named sessions.

use std::collections::BTreeMap;

use tracing::info;

use super::{format_orders, ExchangeSession};
use crate::exchange::ExchangeError;
use crate::orders::{Order, SubmitOrder};

/// Session registry used by strategies that trade on more than one venue.
#[derive(Debug, Clone, Default)]
pub struct OrderExecutionRouter {
    sessions: BTreeMap<String, ExchangeSession>,
}

impl OrderExecutionRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sessions(sessions: impl IntoIterator<Item = ExchangeSession>) -> Self {
        let mut router = Self::new();
        for session in sessions {
            router.add_session(session);
        }
        router
    }

    /// Register a session; a session with the same name is replaced.
    pub fn add_session(&mut self, session: ExchangeSession) {
        self.sessions.insert(session.name().to_string(), session);
    }

    pub fn session(&self, name: &str) -> Result<&ExchangeSession, ExchangeError> {
        self.sessions
            .get(name)
            .ok_or_else(|| ExchangeError::SessionNotFound(name.to_string()))
    }

    pub fn session_names(&self) -> Vec<&str> {
        self.sessions.keys().map(String::as_str).collect()
    }

    /// Format and submit `orders` on the named session.
    pub async fn submit_orders_to(
        &self,
        session: &str,
        orders: &[SubmitOrder],
    ) -> Result<Vec<Order>, ExchangeError> {
        let target = self.session(session)?;
        let formatted = format_orders(target, orders)?;
        info!(session = %session, count = formatted.len(), "Routing orders");
        target.exchange().submit_orders(&formatted).await
    }

    pub async fn cancel_orders_to(&self, session: &str, orders: &[Order]) -> Result<(), ExchangeError> {
        let target = self.session(session)?;
        target.exchange().cancel_orders(orders).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::{BacktestConfig, BacktestExchange, FeeSchedule};
    use crate::types::{Market, OrderSide};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn venue(name: &str) -> ExchangeSession {
        let exchange = Arc::new(BacktestExchange::new(BacktestConfig {
            name: name.to_string(),
            markets: vec![Market::new("BTCUSDT", "BTC", "USDT", dec!(0.01), dec!(0.0001))],
            balances: [("USDT".to_string(), dec!(1000))].into_iter().collect(),
            fees: FeeSchedule::zero(),
            ..BacktestConfig::default()
        }));
        ExchangeSession::backtest(name, exchange)
    }

    #[tokio::test]
    async fn test_routes_to_named_session() {
        let router = OrderExecutionRouter::with_sessions([venue("alpha"), venue("beta")]);
        let order = SubmitOrder::limit("BTCUSDT", OrderSide::Buy, dec!(100), dec!(1));

        let created = router.submit_orders_to("beta", &[order]).await.unwrap();
        assert_eq!(created.len(), 1);

        let beta_open = router
            .session("beta")
            .unwrap()
            .exchange()
            .query_open_orders("BTCUSDT")
            .await
            .unwrap();
        let alpha_open = router
            .session("alpha")
            .unwrap()
            .exchange()
            .query_open_orders("BTCUSDT")
            .await
            .unwrap();
        assert_eq!(beta_open.len(), 1);
        assert!(alpha_open.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let router = OrderExecutionRouter::with_sessions([venue("alpha")]);
        let order = SubmitOrder::limit("BTCUSDT", OrderSide::Buy, dec!(100), dec!(1));
        assert_eq!(
            router.submit_orders_to("gamma", &[order]).await.unwrap_err(),
            ExchangeError::SessionNotFound("gamma".into())
        );
        assert_eq!(router.session_names(), vec!["alpha"]);
    }

    #[tokio::test]
    async fn test_unknown_market_on_known_session() {
        let router = OrderExecutionRouter::with_sessions([venue("alpha")]);
        let order = SubmitOrder::limit("ETHUSDT", OrderSide::Buy, dec!(10), dec!(1));
        assert_eq!(
            router.submit_orders_to("alpha", &[order]).await.unwrap_err(),
            ExchangeError::MarketNotDefined("ETHUSDT".into())
        );
    }
}
