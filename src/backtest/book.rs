//! Resting limit orders of one symbol.
//!
//! Price levels live in a `BTreeMap` for deterministic iteration; orders at
//! the same price keep arrival (FIFO) order.

use std::collections::{BTreeMap, VecDeque};

use rust_decimal::Decimal;

use crate::orders::{Order, OrderId};
use crate::types::OrderSide;

#[derive(Debug, Clone, Default)]
pub struct RestingBook {
    /// Best bid is the highest key
    bids: BTreeMap<Decimal, VecDeque<Order>>,
    /// Best ask is the lowest key
    asks: BTreeMap<Decimal, VecDeque<Order>>,
}

impl RestingBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, order: Order) {
        let side = match order.side {
            OrderSide::Buy => &mut self.bids,
            OrderSide::Sell => &mut self.asks,
        };
        side.entry(order.price).or_default().push_back(order);
    }

    /// Remove a resting order by identifier.
    pub fn remove(&mut self, side: OrderSide, price: Decimal, order_id: OrderId) -> Option<Order> {
        let levels = match side {
            OrderSide::Buy => &mut self.bids,
            OrderSide::Sell => &mut self.asks,
        };
        let level = levels.get_mut(&price)?;
        let index = level.iter().position(|o| o.order_id == order_id)?;
        let removed = level.remove(index);
        if level.is_empty() {
            levels.remove(&price);
        }
        removed
    }

    pub fn find(&self, order_id: OrderId) -> Option<&Order> {
        self.bids
            .values()
            .chain(self.asks.values())
            .flatten()
            .find(|o| o.order_id == order_id)
    }

    /// Take every bid priced at or above `price`, best price first.
    pub fn take_crossed_bids(&mut self, price: Decimal) -> Vec<Order> {
        let crossed = self.bids.split_off(&price);
        crossed.into_values().rev().flatten().collect()
    }

    /// Take every ask priced at or below `price`, best price first.
    pub fn take_crossed_asks(&mut self, price: Decimal) -> Vec<Order> {
        let mut crossed = Vec::new();
        while let Some(entry) = self.asks.first_entry() {
            if *entry.key() > price {
                break;
            }
            crossed.extend(entry.remove());
        }
        crossed
    }

    /// Bids in priority order, then asks in priority order.
    pub fn open_orders(&self) -> Vec<Order> {
        self.bids
            .values()
            .rev()
            .flatten()
            .chain(self.asks.values().flatten())
            .cloned()
            .collect()
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.keys().next_back().copied()
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.keys().next().copied()
    }

    pub fn len(&self) -> usize {
        self.bids.values().chain(self.asks.values()).map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::{OrderStatus, SubmitOrder};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn order(id: u64, side: OrderSide, price: Decimal) -> Order {
        let submit = SubmitOrder::limit("BTCUSDT", side, price, dec!(1));
        Order::from_submit(OrderId::new(id), &submit, OrderStatus::New, Utc::now())
    }

    fn ids(orders: &[Order]) -> Vec<u64> {
        orders.iter().map(|o| o.order_id.value()).collect()
    }

    #[test]
    fn test_crossed_bids_best_first_fifo_within_level() {
        let mut book = RestingBook::new();
        book.insert(order(1, OrderSide::Buy, dec!(99)));
        book.insert(order(2, OrderSide::Buy, dec!(100)));
        book.insert(order(3, OrderSide::Buy, dec!(100)));
        book.insert(order(4, OrderSide::Buy, dec!(98)));

        let crossed = book.take_crossed_bids(dec!(99));
        assert_eq!(ids(&crossed), vec![2, 3, 1]);
        assert_eq!(book.best_bid(), Some(dec!(98)));
    }

    #[test]
    fn test_crossed_asks_best_first() {
        let mut book = RestingBook::new();
        book.insert(order(1, OrderSide::Sell, dec!(105)));
        book.insert(order(2, OrderSide::Sell, dec!(101)));
        book.insert(order(3, OrderSide::Sell, dec!(103)));

        let crossed = book.take_crossed_asks(dec!(103));
        assert_eq!(ids(&crossed), vec![2, 3]);
        assert_eq!(book.best_ask(), Some(dec!(105)));
    }

    #[test]
    fn test_remove_cleans_empty_level() {
        let mut book = RestingBook::new();
        book.insert(order(1, OrderSide::Buy, dec!(100)));
        assert!(book.remove(OrderSide::Buy, dec!(100), OrderId::new(1)).is_some());
        assert!(book.is_empty());
        assert!(book.remove(OrderSide::Buy, dec!(100), OrderId::new(1)).is_none());
    }

    #[test]
    fn test_open_orders_bids_then_asks() {
        let mut book = RestingBook::new();
        book.insert(order(1, OrderSide::Sell, dec!(110)));
        book.insert(order(2, OrderSide::Buy, dec!(90)));
        book.insert(order(3, OrderSide::Buy, dec!(95)));
        assert_eq!(ids(&book.open_orders()), vec![3, 2, 1]);
        assert_eq!(book.len(), 3);
    }
}
