//! Local view of one symbol's live orders.
//!
//! The book is fed from venue order updates and from submission results.
//! Terminal orders never stay in it: a terminal update removes the entry.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use super::types::{Order, OrderId};
use crate::exchange::{Stream, Subscription};
use crate::metrics;

/// What an update did to the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Existing entry replaced with newer state
    Updated,
    /// Terminal update removed the entry
    Removed,
    /// Update was stale or for an order the book does not hold
    Ignored,
}

impl std::fmt::Display for UpdateOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Updated => write!(f, "Updated"),
            Self::Removed => write!(f, "Removed"),
            Self::Ignored => write!(f, "Ignored"),
        }
    }
}

/// Thread-safe active order book for a single symbol.
///
/// # Thread Safety
///
/// Every operation takes the internal lock once, so a reader sees either the
/// state before or after any given update. Updates arrive from synchronous
/// stream callbacks, so the lock is a blocking one and is never held across
/// an await point.
///
/// Cloning shares the underlying book.
#[derive(Clone)]
pub struct ActiveOrderBook {
    symbol: String,
    orders: Arc<RwLock<BTreeMap<OrderId, Order>>>,
}

impl std::fmt::Debug for ActiveOrderBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveOrderBook")
            .field("symbol", &self.symbol)
            .field("orders", &self.len())
            .finish()
    }
}

impl ActiveOrderBook {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            orders: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Insert an order, keyed by its identifier.
    ///
    /// Re-adding a known order keeps whichever copy was updated last.
    /// Terminal orders are refused. Returns true when a new entry was created.
    pub fn add(&self, order: Order) -> bool {
        if order.symbol != self.symbol {
            warn!(
                book = %self.symbol,
                symbol = %order.symbol,
                order_id = %order.order_id,
                "Refusing order for another symbol"
            );
            return false;
        }
        if order.is_terminal() {
            debug!(order_id = %order.order_id, status = %order.status, "Not adding terminal order");
            return false;
        }

        let mut orders = self.orders.write();
        let inserted = match orders.get(&order.order_id) {
            Some(existing) if existing.update_time > order.update_time => false,
            Some(_) => {
                orders.insert(order.order_id, order);
                false
            }
            None => {
                debug!(order_id = %order.order_id, symbol = %self.symbol, "Order added to active book");
                orders.insert(order.order_id, order);
                true
            }
        };
        metrics::set_active_orders(&self.symbol, orders.len());
        inserted
    }

    /// Apply a venue update.
    ///
    /// Terminal updates remove the entry (a no-op if it is already gone).
    /// Non-terminal updates refresh known entries unless older than what the
    /// book holds; unknown orders are not adopted here.
    pub fn update(&self, order: &Order) -> UpdateOutcome {
        if order.symbol != self.symbol {
            return UpdateOutcome::Ignored;
        }

        let mut orders = self.orders.write();
        let outcome = if order.is_terminal() {
            match orders.remove(&order.order_id) {
                Some(_) => UpdateOutcome::Removed,
                None => UpdateOutcome::Ignored,
            }
        } else {
            match orders.get_mut(&order.order_id) {
                Some(existing) if existing.update_time <= order.update_time => {
                    *existing = order.clone();
                    UpdateOutcome::Updated
                }
                _ => UpdateOutcome::Ignored,
            }
        };
        metrics::set_active_orders(&self.symbol, orders.len());

        debug!(
            order_id = %order.order_id,
            status = %order.status,
            outcome = %outcome,
            "Active book update"
        );
        outcome
    }

    /// Point-in-time copy of every entry, ordered by identifier.
    pub fn orders(&self) -> Vec<Order> {
        self.orders.read().values().cloned().collect()
    }

    pub fn get(&self, order_id: OrderId) -> Option<Order> {
        self.orders.read().get(&order_id).cloned()
    }

    pub fn exists(&self, order_id: OrderId) -> bool {
        self.orders.read().contains_key(&order_id)
    }

    pub fn len(&self) -> usize {
        self.orders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.read().is_empty()
    }

    /// Keep the book current from a venue stream.
    pub fn bind(&self, stream: &Stream) -> Subscription {
        let book = self.clone();
        stream.on_order_update(move |order| {
            book.update(order);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::{OrderStatus, SubmitOrder};
    use crate::types::OrderSide;
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;

    fn order(id: u64, status: OrderStatus) -> Order {
        let submit = SubmitOrder::limit("BTCUSDT", OrderSide::Buy, dec!(100), dec!(1));
        Order::from_submit(OrderId::new(id), &submit, status, Utc::now())
    }

    #[test]
    fn test_add_is_idempotent() {
        let book = ActiveOrderBook::new("BTCUSDT");
        assert!(book.add(order(1, OrderStatus::New)));
        assert!(!book.add(order(1, OrderStatus::New)));
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn test_terminal_orders_never_enter() {
        let book = ActiveOrderBook::new("BTCUSDT");
        assert!(!book.add(order(1, OrderStatus::Filled)));
        assert!(!book.add(order(2, OrderStatus::Canceled)));
        assert!(book.is_empty());
    }

    #[test]
    fn test_terminal_update_removes_entry() {
        let book = ActiveOrderBook::new("BTCUSDT");
        book.add(order(1, OrderStatus::New));

        let mut filled = order(1, OrderStatus::Filled);
        filled.executed_quantity = dec!(1);
        assert_eq!(book.update(&filled), UpdateOutcome::Removed);
        assert!(!book.exists(OrderId::new(1)));

        // Second terminal update for the same order is a no-op
        assert_eq!(book.update(&filled), UpdateOutcome::Ignored);
    }

    #[test]
    fn test_partial_fill_refreshes_entry() {
        let book = ActiveOrderBook::new("BTCUSDT");
        let original = order(1, OrderStatus::New);
        book.add(original.clone());

        let mut partial = original.clone();
        partial.status = OrderStatus::PartiallyFilled;
        partial.executed_quantity = dec!(0.4);
        partial.update_time = original.update_time + Duration::seconds(1);

        assert_eq!(book.update(&partial), UpdateOutcome::Updated);
        let stored = book.get(OrderId::new(1)).expect("order should remain");
        assert_eq!(stored.executed_quantity, dec!(0.4));
    }

    #[test]
    fn test_stale_update_is_ignored() {
        let book = ActiveOrderBook::new("BTCUSDT");
        let mut newer = order(1, OrderStatus::PartiallyFilled);
        newer.executed_quantity = dec!(0.5);
        book.add(newer.clone());

        let mut older = newer.clone();
        older.status = OrderStatus::New;
        older.executed_quantity = dec!(0);
        older.update_time = newer.update_time - Duration::seconds(10);

        assert_eq!(book.update(&older), UpdateOutcome::Ignored);
        assert_eq!(book.get(OrderId::new(1)).map(|o| o.executed_quantity), Some(dec!(0.5)));
    }

    #[test]
    fn test_unknown_non_terminal_update_not_adopted() {
        let book = ActiveOrderBook::new("BTCUSDT");
        assert_eq!(book.update(&order(9, OrderStatus::New)), UpdateOutcome::Ignored);
        assert!(book.is_empty());
    }

    #[test]
    fn test_orders_snapshot_is_sorted_copy() {
        let book = ActiveOrderBook::new("BTCUSDT");
        book.add(order(3, OrderStatus::New));
        book.add(order(1, OrderStatus::New));
        let snapshot = book.orders();
        book.add(order(2, OrderStatus::New));

        let ids: Vec<u64> = snapshot.iter().map(|o| o.order_id.value()).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(book.len(), 3);
    }

    #[test]
    fn test_bound_book_follows_stream() {
        let stream = Stream::new();
        let book = ActiveOrderBook::new("BTCUSDT");
        let _sub = book.bind(&stream);

        book.add(order(1, OrderStatus::New));
        stream.emit_order_update(&order(1, OrderStatus::Canceled));
        assert!(book.is_empty());
    }
}
