//! Venue event stream.
//!
//! Order updates, trade updates and closed candles are delivered to
//! registered callbacks synchronously, in registration order. Registering a
//! callback returns a [`Subscription`] handle; handing the handle back to
//! [`Stream::unsubscribe`] removes exactly that callback.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::orders::{Order, Trade};
use crate::types::KLine;

type OrderHandler = Arc<dyn Fn(&Order) + Send + Sync>;
type TradeHandler = Arc<dyn Fn(&Trade) + Send + Sync>;
type KLineHandler = Arc<dyn Fn(&KLine) + Send + Sync>;

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventKind {
    OrderUpdate,
    TradeUpdate,
    KLineClosed,
}

/// Handle for one registered callback.
///
/// Not `Clone`: unsubscribing consumes it, so a callback cannot be removed twice.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "dropping a Subscription keeps the callback registered forever"]
pub struct Subscription {
    stream_id: u64,
    kind: EventKind,
    slot: usize,
    generation: u64,
}

struct Slot<H> {
    generation: u64,
    /// Registration sequence, used to keep emission in registration order
    seq: u64,
    handler: Option<H>,
}

/// Slots are reused after removal; a stale handle never matches the new
/// occupant because the generation moves on.
struct Handlers<H> {
    slots: Vec<Slot<H>>,
    free: Vec<usize>,
}

impl<H> Default for Handlers<H> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }
}

impl<H: Clone> Handlers<H> {
    fn insert(&mut self, handler: H, seq: u64) -> (usize, u64) {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index];
                slot.generation += 1;
                slot.seq = seq;
                slot.handler = Some(handler);
                (index, slot.generation)
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    seq,
                    handler: Some(handler),
                });
                (self.slots.len() - 1, 0)
            }
        }
    }

    fn remove(&mut self, index: usize, generation: u64) -> bool {
        match self.slots.get_mut(index) {
            Some(slot) if slot.generation == generation && slot.handler.is_some() => {
                slot.handler = None;
                self.free.push(index);
                true
            }
            _ => false,
        }
    }

    fn live(&self) -> Vec<H> {
        let mut live: Vec<(u64, H)> = self
            .slots
            .iter()
            .filter_map(|s| s.handler.clone().map(|h| (s.seq, h)))
            .collect();
        live.sort_by_key(|(seq, _)| *seq);
        live.into_iter().map(|(_, h)| h).collect()
    }

    fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }
}

#[derive(Default)]
struct Registry {
    next_seq: u64,
    order: Handlers<OrderHandler>,
    trade: Handlers<TradeHandler>,
    kline: Handlers<KLineHandler>,
}

impl Registry {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

/// Typed callback registry for venue events.
pub struct Stream {
    id: u64,
    registry: RwLock<Registry>,
}

impl Default for Stream {
    fn default() -> Self {
        Self {
            id: NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed),
            registry: RwLock::new(Registry::default()),
        }
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry.read();
        f.debug_struct("Stream")
            .field("id", &self.id)
            .field("order_handlers", &registry.order.len())
            .field("trade_handlers", &registry.trade.len())
            .field("kline_handlers", &registry.kline.len())
            .finish()
    }
}

impl Stream {
    pub fn new() -> Self {
        Self::default()
    }

    fn subscription(&self, kind: EventKind, (slot, generation): (usize, u64)) -> Subscription {
        Subscription {
            stream_id: self.id,
            kind,
            slot,
            generation,
        }
    }

    pub fn on_order_update<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Order) + Send + Sync + 'static,
    {
        let mut registry = self.registry.write();
        let seq = registry.next_seq();
        let key = registry.order.insert(Arc::new(handler), seq);
        self.subscription(EventKind::OrderUpdate, key)
    }

    pub fn on_trade_update<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Trade) + Send + Sync + 'static,
    {
        let mut registry = self.registry.write();
        let seq = registry.next_seq();
        let key = registry.trade.insert(Arc::new(handler), seq);
        self.subscription(EventKind::TradeUpdate, key)
    }

    pub fn on_kline_closed<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&KLine) + Send + Sync + 'static,
    {
        let mut registry = self.registry.write();
        let seq = registry.next_seq();
        let key = registry.kline.insert(Arc::new(handler), seq);
        self.subscription(EventKind::KLineClosed, key)
    }

    /// Remove the callback behind `subscription`.
    ///
    /// Returns false if the handle belongs to another stream.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        if subscription.stream_id != self.id {
            debug!(
                stream = self.id,
                owner = subscription.stream_id,
                "Ignoring subscription handle from another stream"
            );
            return false;
        }

        let Subscription {
            kind,
            slot,
            generation,
            ..
        } = subscription;
        let mut registry = self.registry.write();
        let removed = match kind {
            EventKind::OrderUpdate => registry.order.remove(slot, generation),
            EventKind::TradeUpdate => registry.trade.remove(slot, generation),
            EventKind::KLineClosed => registry.kline.remove(slot, generation),
        };
        debug!(stream = self.id, kind = ?kind, slot, removed, "Unsubscribed");
        removed
    }

    #[cfg(test)]
    fn slot_capacity(&self) -> usize {
        let registry = self.registry.read();
        registry.order.capacity() + registry.trade.capacity() + registry.kline.capacity()
    }

    // Handlers run outside the registry lock so they may (un)subscribe.

    pub fn emit_order_update(&self, order: &Order) {
        let handlers = self.registry.read().order.live();
        for handler in handlers {
            handler(order);
        }
    }

    pub fn emit_trade_update(&self, trade: &Trade) {
        let handlers = self.registry.read().trade.live();
        for handler in handlers {
            handler(trade);
        }
    }

    pub fn emit_kline_closed(&self, kline: &KLine) {
        let handlers = self.registry.read().kline.live();
        for handler in handlers {
            handler(kline);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::{OrderId, OrderStatus, SubmitOrder};
    use crate::types::OrderSide;
    use chrono::Utc;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;

    fn kline() -> KLine {
        let now = Utc::now();
        KLine {
            symbol: "BTCUSDT".into(),
            interval: "1m".into(),
            start_time: now,
            end_time: now,
            open: dec!(100),
            high: dec!(100),
            low: dec!(100),
            close: dec!(100),
            volume: dec!(1),
            closed: true,
        }
    }

    fn order() -> Order {
        let submit = SubmitOrder::limit("BTCUSDT", OrderSide::Buy, dec!(100), dec!(1));
        Order::from_submit(OrderId::new(1), &submit, OrderStatus::New, Utc::now())
    }

    #[test]
    fn test_handlers_fire_in_registration_order() {
        let stream = Stream::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s1 = seen.clone();
        let _a = stream.on_order_update(move |_| s1.lock().push("first"));
        let s2 = seen.clone();
        let _b = stream.on_order_update(move |_| s2.lock().push("second"));

        stream.emit_order_update(&order());
        assert_eq!(*seen.lock(), vec!["first", "second"]);
    }

    #[test]
    fn test_unsubscribe_removes_only_that_handler() {
        let stream = Stream::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s1 = seen.clone();
        let first = stream.on_order_update(move |_| s1.lock().push(1));
        let s2 = seen.clone();
        let _second = stream.on_order_update(move |_| s2.lock().push(2));

        assert!(stream.unsubscribe(first));
        stream.emit_order_update(&order());
        assert_eq!(*seen.lock(), vec![2]);
    }

    #[test]
    fn test_handler_may_subscribe_during_emit() {
        let stream = Arc::new(Stream::new());
        let inner = stream.clone();
        let _sub = stream.on_order_update(move |_| {
            // Would deadlock if emit held the registry lock
            let sub = inner.on_trade_update(|_| {});
            inner.unsubscribe(sub);
        });
        stream.emit_order_update(&order());
    }

    #[test]
    fn test_foreign_handle_is_rejected() {
        let a = Stream::new();
        let b = Stream::new();
        let fired = Arc::new(Mutex::new(0));

        let _on_a = a.on_kline_closed(|_| {});
        let counter = fired.clone();
        let _on_b = b.on_kline_closed(move |_| *counter.lock() += 1);
        let foreign = a.on_kline_closed(|_| {});
        // Same kind and slot index as a live handler on b would have
        let _second_on_b = b.on_kline_closed(|_| {});

        assert!(!b.unsubscribe(foreign));
        b.emit_kline_closed(&kline());
        assert_eq!(*fired.lock(), 1);
    }

    #[test]
    fn test_stale_handle_does_not_remove_slot_reuser() {
        let stream = Stream::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = stream.on_order_update(|_| {});
        assert!(stream.unsubscribe(first));

        let s = seen.clone();
        let reused = stream.on_order_update(move |_| s.lock().push("reused"));
        // A forged copy of the old handle targets the same slot, older generation
        let stale = Subscription {
            stream_id: stream.id,
            kind: EventKind::OrderUpdate,
            slot: reused.slot,
            generation: reused.generation.wrapping_sub(1),
        };
        assert!(!stream.unsubscribe(stale));

        stream.emit_order_update(&order());
        assert_eq!(*seen.lock(), vec!["reused"]);
    }

    #[test]
    fn test_subscribe_cycles_reuse_slots() {
        let stream = Stream::new();
        let _keep = stream.on_trade_update(|_| {});
        for _ in 0..100 {
            let sub = stream.on_kline_closed(|_| {});
            assert!(stream.unsubscribe(sub));
        }
        assert_eq!(stream.slot_capacity(), 2);
    }

    #[test]
    fn test_reused_slot_keeps_registration_order() {
        let stream = Stream::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let gone = stream.on_order_update(|_| {});
        let s = seen.clone();
        let _older = stream.on_order_update(move |_| s.lock().push("older"));
        assert!(stream.unsubscribe(gone));
        let s = seen.clone();
        let _newer = stream.on_order_update(move |_| s.lock().push("newer"));

        stream.emit_order_update(&order());
        assert_eq!(*seen.lock(), vec!["older", "newer"]);
    }
}
