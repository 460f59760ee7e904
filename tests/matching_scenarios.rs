//! End-to-end scenarios for the simulated venue.

use std::sync::Arc;

use orderflow::backtest::{BacktestConfig, BacktestExchange, FeeSchedule};
use orderflow::exchange::{Exchange, ExchangeError};
use orderflow::orders::{OrderStatus, SubmitOrder};
use orderflow::types::{Market, OrderSide};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn venue(fees: FeeSchedule) -> BacktestExchange {
    BacktestExchange::new(BacktestConfig {
        markets: vec![Market::new("BTCUSDT", "BTC", "USDT", dec!(0.01), dec!(0.0001))],
        balances: [("USDT".to_string(), dec!(1000)), ("BTC".to_string(), dec!(2))]
            .into_iter()
            .collect(),
        fees,
        ..BacktestConfig::default()
    })
}

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Order(OrderStatus),
    Trade(Decimal, Decimal),
}

#[tokio::test]
async fn limit_buy_fills_once_at_its_limit_price() {
    let exchange = venue(FeeSchedule::zero());
    let events = Arc::new(Mutex::new(Vec::new()));
    let _orders = {
        let events = events.clone();
        exchange
            .stream()
            .on_order_update(move |o| events.lock().push(Event::Order(o.status)))
    };
    let _trades = {
        let events = events.clone();
        exchange
            .stream()
            .on_trade_update(move |t| events.lock().push(Event::Trade(t.price, t.quantity)))
    };

    let created = exchange
        .submit_orders(&[SubmitOrder::limit("BTCUSDT", OrderSide::Buy, dec!(100), dec!(1.0))])
        .await
        .unwrap();
    assert_eq!(created[0].status, OrderStatus::New);

    let mut fills_per_tick = Vec::new();
    for price in [dec!(105), dec!(102), dec!(99), dec!(101)] {
        fills_per_tick.push(exchange.process_price("BTCUSDT", price).unwrap());
    }
    assert_eq!(fills_per_tick, vec![0, 0, 1, 0]);

    assert_eq!(
        *events.lock(),
        vec![
            Event::Order(OrderStatus::New),
            Event::Order(OrderStatus::Filled),
            Event::Trade(dec!(100), dec!(1.0)),
        ]
    );

    let closed = exchange.query_closed_orders("BTCUSDT").unwrap();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].status, OrderStatus::Filled);
    assert_eq!(exchange.balance("USDT").total(), dec!(900));
    assert_eq!(exchange.balance("BTC").total(), dec!(3));
}

#[tokio::test]
async fn cancel_after_fill_is_order_not_found_and_keeps_balances() {
    let exchange = venue(FeeSchedule::default());
    let created = exchange
        .submit_orders(&[SubmitOrder::limit("BTCUSDT", OrderSide::Sell, dec!(110), dec!(0.5))])
        .await
        .unwrap();
    exchange.process_price("BTCUSDT", dec!(111)).unwrap();

    let before = exchange.account();
    let err = exchange.cancel_orders(&created).await.unwrap_err();
    assert_eq!(err, ExchangeError::OrderNotFound(created[0].order_id));
    assert_eq!(exchange.account(), before);
}

#[tokio::test]
async fn rejected_order_leaves_balances_untouched() {
    let exchange = venue(FeeSchedule::default());
    let before = exchange.account();

    // 10 * 100 plus the fee exceeds the 1000 USDT available
    let err = exchange
        .submit_orders(&[SubmitOrder::limit("BTCUSDT", OrderSide::Buy, dec!(100), dec!(10))])
        .await
        .unwrap_err();
    assert!(matches!(err, ExchangeError::InsufficientBalance { .. }));
    assert_eq!(exchange.account(), before);
    assert!(exchange.query_open_orders("BTCUSDT").await.unwrap().is_empty());
}

#[tokio::test]
async fn fees_are_explicit_quote_debits() {
    let exchange = venue(FeeSchedule::default());
    exchange
        .submit_orders(&[SubmitOrder::limit("BTCUSDT", OrderSide::Buy, dec!(100), dec!(2))])
        .await
        .unwrap();
    exchange.process_price("BTCUSDT", dec!(100)).unwrap();

    // Maker fee of 0.1% on a 200 notional
    assert_eq!(exchange.balance("USDT").total(), dec!(1000) - dec!(200) - dec!(0.2));
    assert_eq!(exchange.balance("USDT").locked, dec!(0));
    assert_eq!(exchange.balance("BTC").total(), dec!(4));
}
