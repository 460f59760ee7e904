//! A named connection to one venue.

use std::collections::HashMap;
use std::sync::Arc;

use crate::backtest::BacktestExchange;
use crate::exchange::{Exchange, OrderQueryService, Stream};
use crate::types::Market;

/// Venue handle bundled with its event stream and market rules.
///
/// Cloning shares the venue and stream.
#[derive(Clone)]
pub struct ExchangeSession {
    name: String,
    exchange: Arc<dyn Exchange>,
    query: Option<Arc<dyn OrderQueryService>>,
    stream: Arc<Stream>,
    markets: HashMap<String, Market>,
}

impl std::fmt::Debug for ExchangeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut symbols: Vec<&String> = self.markets.keys().collect();
        symbols.sort();
        f.debug_struct("ExchangeSession")
            .field("name", &self.name)
            .field("exchange", &self.exchange.name())
            .field("markets", &symbols)
            .field("queryable", &self.query.is_some())
            .finish()
    }
}

impl ExchangeSession {
    pub fn new(name: impl Into<String>, exchange: Arc<dyn Exchange>, stream: Arc<Stream>) -> Self {
        Self {
            name: name.into(),
            exchange,
            query: None,
            stream,
            markets: HashMap::new(),
        }
    }

    /// Session over a simulated venue, with its markets and point lookups.
    pub fn backtest(name: impl Into<String>, exchange: Arc<BacktestExchange>) -> Self {
        let stream = exchange.stream();
        let markets = exchange.markets();
        let query: Arc<dyn OrderQueryService> = exchange.clone();
        Self::new(name, exchange, stream)
            .with_query_service(query)
            .with_markets(markets)
    }

    #[must_use]
    pub fn with_query_service(mut self, query: Arc<dyn OrderQueryService>) -> Self {
        self.query = Some(query);
        self
    }

    #[must_use]
    pub fn with_markets(mut self, markets: impl IntoIterator<Item = Market>) -> Self {
        for market in markets {
            self.add_market(market);
        }
        self
    }

    pub fn add_market(&mut self, market: Market) {
        self.markets.insert(market.symbol.clone(), market);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn exchange(&self) -> &Arc<dyn Exchange> {
        &self.exchange
    }

    pub fn query_service(&self) -> Option<&Arc<dyn OrderQueryService>> {
        self.query.as_ref()
    }

    pub fn stream(&self) -> &Arc<Stream> {
        &self.stream
    }

    pub fn market(&self, symbol: &str) -> Option<&Market> {
        self.markets.get(symbol)
    }
}
