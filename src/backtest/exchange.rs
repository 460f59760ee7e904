//! Simulated venue built from per-symbol matchings and one shared account.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, ReentrantMutex};
use rust_decimal::Decimal;
use tracing::{debug, warn};

use super::account::{Account, Balance};
use super::matching::{FeeSchedule, Fill, IdSequence, SimplePriceMatching};
use crate::clock::{Clock, SimulatedClock};
use crate::exchange::{Exchange, ExchangeError, OrderQueryService, Stream};
use crate::orders::{Order, OrderId, SubmitOrder, Trade};
use crate::types::{KLine, Market};

/// Everything needed to stand up a simulated venue.
#[derive(Debug, Clone)]
pub struct BacktestConfig {
    pub name: String,
    pub markets: Vec<Market>,
    pub balances: BTreeMap<String, Decimal>,
    pub fees: FeeSchedule,
    pub start_time: DateTime<Utc>,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            name: "backtest".to_string(),
            markets: Vec::new(),
            balances: BTreeMap::new(),
            fees: FeeSchedule::default(),
            start_time: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

struct VenueState {
    matchings: HashMap<String, SimplePriceMatching>,
    account: Account,
    ids: IdSequence,
}

impl VenueState {
    fn matching(&self, symbol: &str) -> Result<&SimplePriceMatching, ExchangeError> {
        self.matchings
            .get(symbol)
            .ok_or_else(|| ExchangeError::SymbolNotConfigured(symbol.to_string()))
    }
}

/// Backtest venue.
///
/// All matchings and the account sit behind one lock, so order submission
/// and price processing never interleave. Events are emitted after that
/// lock is released, so handlers may call back into the venue; an order's
/// status update always precedes its trade.
///
/// Each mutation and the emission of its events run under `sequencer`, so
/// concurrent drivers (a price feed and a strategy submitting orders) see
/// events in the order the venue applied them. The sequencer is reentrant:
/// a handler may feed a price or place an order from inside a callback.
pub struct BacktestExchange {
    name: String,
    state: Mutex<VenueState>,
    sequencer: ReentrantMutex<()>,
    stream: Arc<Stream>,
    clock: SimulatedClock,
}

impl std::fmt::Debug for BacktestExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BacktestExchange")
            .field("name", &self.name)
            .field("now", &self.clock.now())
            .finish()
    }
}

impl BacktestExchange {
    pub fn new(config: BacktestConfig) -> Self {
        let matchings = config
            .markets
            .into_iter()
            .map(|market| {
                (
                    market.symbol.clone(),
                    SimplePriceMatching::new(market, config.fees),
                )
            })
            .collect();

        Self {
            name: config.name,
            state: Mutex::new(VenueState {
                matchings,
                account: Account::with_balances(config.balances),
                ids: IdSequence::default(),
            }),
            sequencer: ReentrantMutex::new(()),
            stream: Arc::new(Stream::new()),
            clock: SimulatedClock::new(config.start_time),
        }
    }

    pub fn stream(&self) -> Arc<Stream> {
        self.stream.clone()
    }

    pub fn clock(&self) -> SimulatedClock {
        self.clock.clone()
    }

    pub fn markets(&self) -> Vec<Market> {
        let state = self.state.lock();
        let mut markets: Vec<Market> = state.matchings.values().map(|m| m.market().clone()).collect();
        markets.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        markets
    }

    pub fn account(&self) -> Account {
        self.state.lock().account.clone()
    }

    pub fn balance(&self, currency: &str) -> Balance {
        self.state.lock().account.balance(currency)
    }

    pub fn last_price(&self, symbol: &str) -> Option<Decimal> {
        self.state
            .lock()
            .matchings
            .get(symbol)
            .and_then(SimplePriceMatching::last_price)
    }

    /// Orders of `symbol` that reached a terminal status, oldest first.
    pub fn query_closed_orders(&self, symbol: &str) -> Result<Vec<Order>, ExchangeError> {
        let state = self.state.lock();
        Ok(state.matching(symbol)?.closed_orders().to_vec())
    }

    pub fn open_order_count(&self, symbol: &str) -> Result<usize, ExchangeError> {
        let state = self.state.lock();
        Ok(state.matching(symbol)?.open_orders().len())
    }

    /// Feed one price tick. Returns the number of fills.
    pub fn process_price(&self, symbol: &str, price: Decimal) -> Result<usize, ExchangeError> {
        let _sequence = self.sequencer.lock();
        let now = self.clock.now();
        let fills = {
            let mut state = self.state.lock();
            let VenueState {
                matchings,
                account,
                ids,
            } = &mut *state;
            let matching = matchings
                .get_mut(symbol)
                .ok_or_else(|| ExchangeError::SymbolNotConfigured(symbol.to_string()))?;
            matching.process_price(price, account, ids, now)
        };
        let count = fills.len();
        self.emit_fills(fills);
        Ok(count)
    }

    /// Feed one candle: advance the clock to its close, walk its price path,
    /// then publish it as closed.
    pub fn process_kline(&self, kline: &KLine) -> Result<usize, ExchangeError> {
        let _sequence = self.sequencer.lock();
        self.clock.set(kline.end_time);
        let mut fills = 0;
        for price in kline.price_path() {
            fills += self.process_price(&kline.symbol, price)?;
        }
        self.stream.emit_kline_closed(kline);
        Ok(fills)
    }

    /// Place one order and publish its events.
    fn place_sequenced(&self, submit: &SubmitOrder) -> Result<Order, ExchangeError> {
        let _sequence = self.sequencer.lock();
        let now = self.clock.now();
        let placed = {
            let mut state = self.state.lock();
            let VenueState {
                matchings,
                account,
                ids,
            } = &mut *state;
            let matching = matchings
                .get_mut(&submit.symbol)
                .ok_or_else(|| ExchangeError::SymbolNotConfigured(submit.symbol.clone()))?;
            matching.place_order(submit, account, ids, now)
        };
        let (order, trade) = placed?;
        self.emit(&order, trade.as_ref());
        Ok(order)
    }

    /// Cancel one order and publish the confirmation.
    fn cancel_sequenced(&self, order: &Order) -> Result<(), ExchangeError> {
        let _sequence = self.sequencer.lock();
        let now = self.clock.now();
        let canceled = {
            let mut state = self.state.lock();
            let VenueState {
                matchings, account, ..
            } = &mut *state;
            match matchings.get_mut(&order.symbol) {
                Some(matching) => matching.cancel_order(order, account, now),
                None => Err(ExchangeError::SymbolNotConfigured(order.symbol.clone())),
            }
        }?;
        self.emit(&canceled, None);
        Ok(())
    }

    fn emit_fills(&self, fills: Vec<Fill>) {
        for fill in fills {
            self.emit(&fill.order, Some(&fill.trade));
        }
    }

    fn emit(&self, order: &Order, trade: Option<&Trade>) {
        self.stream.emit_order_update(order);
        if let Some(trade) = trade {
            self.stream.emit_trade_update(trade);
        }
    }
}

#[async_trait]
impl Exchange for BacktestExchange {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit_orders(&self, orders: &[SubmitOrder]) -> Result<Vec<Order>, ExchangeError> {
        let mut created = Vec::with_capacity(orders.len());
        for submit in orders {
            match self.place_sequenced(submit) {
                Ok(order) => created.push(order),
                Err(e) => {
                    warn!(
                        symbol = %submit.symbol,
                        side = %submit.side,
                        price = %submit.price,
                        quantity = %submit.quantity,
                        error = %e,
                        "Simulated venue rejected order"
                    );
                    return Err(e);
                }
            }
        }
        Ok(created)
    }

    async fn cancel_orders(&self, orders: &[Order]) -> Result<(), ExchangeError> {
        let mut first_error = None;
        for order in orders {
            match self.cancel_sequenced(order) {
                Ok(()) => {}
                Err(e) => {
                    debug!(order_id = %order.order_id, error = %e, "Cancel failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn query_open_orders(&self, symbol: &str) -> Result<Vec<Order>, ExchangeError> {
        let state = self.state.lock();
        Ok(state.matching(symbol)?.open_orders())
    }
}

#[async_trait]
impl OrderQueryService for BacktestExchange {
    async fn query_order(&self, symbol: &str, order_id: OrderId) -> Result<Order, ExchangeError> {
        let state = self.state.lock();
        state
            .matching(symbol)?
            .find_order(order_id)
            .ok_or(ExchangeError::OrderNotFound(order_id))
    }

    async fn query_order_trades(&self, symbol: &str, order_id: OrderId) -> Result<Vec<Trade>, ExchangeError> {
        let state = self.state.lock();
        let matching = state.matching(symbol)?;
        if matching.find_order(order_id).is_none() {
            return Err(ExchangeError::OrderNotFound(order_id));
        }
        Ok(matching.trades_of(order_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::OrderStatus;
    use crate::types::OrderSide;
    use rust_decimal_macros::dec;

    fn exchange() -> BacktestExchange {
        let mut balances = BTreeMap::new();
        balances.insert("USDT".to_string(), dec!(1000));
        BacktestExchange::new(BacktestConfig {
            markets: vec![Market::new("BTCUSDT", "BTC", "USDT", dec!(0.01), dec!(0.0001))],
            balances,
            fees: FeeSchedule::zero(),
            ..BacktestConfig::default()
        })
    }

    #[tokio::test]
    async fn test_unknown_symbol_is_rejected() {
        let ex = exchange();
        let submit = SubmitOrder::limit("ETHUSDT", OrderSide::Buy, dec!(10), dec!(1));
        assert_eq!(
            ex.submit_orders(&[submit]).await.unwrap_err(),
            ExchangeError::SymbolNotConfigured("ETHUSDT".into())
        );
        assert!(ex.process_price("ETHUSDT", dec!(1)).is_err());
    }

    #[tokio::test]
    async fn test_order_update_precedes_trade() {
        let ex = exchange();
        let events = Arc::new(Mutex::new(Vec::new()));
        let e1 = events.clone();
        let _a = ex.stream().on_order_update(move |o| e1.lock().push(format!("order:{}", o.status)));
        let e2 = events.clone();
        let _b = ex.stream().on_trade_update(move |t| e2.lock().push(format!("trade:{}", t.order_id)));

        ex.process_price("BTCUSDT", dec!(105)).unwrap();
        let submit = SubmitOrder::limit("BTCUSDT", OrderSide::Buy, dec!(100), dec!(1));
        let created = ex.submit_orders(&[submit]).await.unwrap();
        ex.process_price("BTCUSDT", dec!(99)).unwrap();

        assert_eq!(
            *events.lock(),
            vec![
                "order:New".to_string(),
                "order:Filled".to_string(),
                format!("trade:{}", created[0].order_id),
            ]
        );
    }

    #[tokio::test]
    async fn test_closed_ledger_and_point_lookup() {
        let ex = exchange();
        let submit = SubmitOrder::limit("BTCUSDT", OrderSide::Buy, dec!(100), dec!(1));
        let created = ex.submit_orders(&[submit]).await.unwrap();
        let id = created[0].order_id;

        assert_eq!(ex.query_open_orders("BTCUSDT").await.unwrap().len(), 1);
        ex.cancel_orders(&created).await.unwrap();
        assert!(ex.query_open_orders("BTCUSDT").await.unwrap().is_empty());

        let closed = ex.query_closed_orders("BTCUSDT").unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].status, OrderStatus::Canceled);
        assert_eq!(ex.query_order("BTCUSDT", id).await.unwrap().status, OrderStatus::Canceled);
        assert_eq!(
            ex.query_order("BTCUSDT", OrderId::new(999)).await.unwrap_err(),
            ExchangeError::OrderNotFound(OrderId::new(999))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_drivers_never_reorder_an_orders_events() {
        let ex = Arc::new(exchange());
        ex.process_price("BTCUSDT", dec!(100)).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _updates = ex
            .stream()
            .on_order_update(move |o| sink.lock().push((o.order_id, o.status)));

        let feed = {
            let ex = ex.clone();
            tokio::task::spawn_blocking(move || {
                for i in 0..400 {
                    let price = if i % 2 == 0 { dec!(94) } else { dec!(100) };
                    ex.process_price("BTCUSDT", price).unwrap();
                }
            })
        };
        for _ in 0..100 {
            let submit = SubmitOrder::limit("BTCUSDT", OrderSide::Buy, dec!(95), dec!(0.01));
            ex.submit_orders(&[submit]).await.unwrap();
            tokio::task::yield_now().await;
        }
        feed.await.unwrap();
        ex.process_price("BTCUSDT", dec!(94)).unwrap();

        let mut by_order: HashMap<OrderId, Vec<OrderStatus>> = HashMap::new();
        for (id, status) in seen.lock().iter() {
            by_order.entry(*id).or_default().push(*status);
        }
        assert_eq!(by_order.len(), 100);
        for (id, statuses) in &by_order {
            assert_eq!(statuses.last(), Some(&OrderStatus::Filled), "{id}: {statuses:?}");
            assert_eq!(
                statuses.iter().filter(|s| s.is_terminal()).count(),
                1,
                "{id}: {statuses:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_handler_may_drive_the_venue() {
        let ex = Arc::new(exchange());
        ex.process_price("BTCUSDT", dec!(105)).unwrap();
        let weak = Arc::downgrade(&ex);
        // Each fill pushes the price back up from inside the callback
        let _trades = ex.stream().on_trade_update(move |_| {
            if let Some(ex) = weak.upgrade() {
                ex.process_price("BTCUSDT", dec!(110)).unwrap();
            }
        });

        let submit = SubmitOrder::limit("BTCUSDT", OrderSide::Buy, dec!(100), dec!(1));
        ex.submit_orders(&[submit]).await.unwrap();
        assert_eq!(ex.process_price("BTCUSDT", dec!(99)).unwrap(), 1);
        assert_eq!(ex.last_price("BTCUSDT"), Some(dec!(110)));
    }

    #[tokio::test]
    async fn test_kline_advances_clock_and_fills() {
        let ex = exchange();
        let start = ex.clock().now();
        ex.process_price("BTCUSDT", dec!(105)).unwrap();
        let submit = SubmitOrder::limit("BTCUSDT", OrderSide::Buy, dec!(100), dec!(1));
        ex.submit_orders(&[submit]).await.unwrap();

        let end = start + chrono::Duration::minutes(1);
        let kline = KLine {
            symbol: "BTCUSDT".into(),
            interval: "1m".into(),
            start_time: start,
            end_time: end,
            open: dec!(104),
            high: dec!(106),
            low: dec!(98),
            close: dec!(103),
            volume: dec!(10),
            closed: true,
        };
        assert_eq!(ex.process_kline(&kline).unwrap(), 1);
        assert_eq!(ex.clock().now(), end);
        assert_eq!(ex.last_price("BTCUSDT"), Some(dec!(103)));
        assert_eq!(ex.balance("BTC").available, dec!(1));
    }
}
