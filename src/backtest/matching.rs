//! Price-driven order matching for one symbol.
//!
//! There is no counterparty liquidity: an order fills in full, at its own
//! limit price, as soon as the simulated price reaches it. Fees are charged
//! in the quote currency.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::account::Account;
use super::book::RestingBook;
use crate::exchange::ExchangeError;
use crate::metrics;
use crate::orders::{Order, OrderId, OrderStatus, SubmitOrder, Trade};
use crate::types::{Market, OrderSide, OrderType};

/// Maker/taker fee rates applied to filled notional.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub maker_fee_rate: Decimal,
    pub taker_fee_rate: Decimal,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            maker_fee_rate: Decimal::new(1, 3), // 0.1%
            taker_fee_rate: Decimal::new(1, 3),
        }
    }
}

impl FeeSchedule {
    pub fn zero() -> Self {
        Self {
            maker_fee_rate: Decimal::ZERO,
            taker_fee_rate: Decimal::ZERO,
        }
    }

    fn rate(&self, is_maker: bool) -> Decimal {
        if is_maker {
            self.maker_fee_rate
        } else {
            self.taker_fee_rate
        }
    }
}

/// Monotonic identifiers shared by every symbol of one venue.
#[derive(Debug, Clone, Default)]
pub struct IdSequence {
    last_order_id: u64,
    last_trade_id: u64,
}

impl IdSequence {
    pub fn next_order_id(&mut self) -> OrderId {
        self.last_order_id += 1;
        OrderId::new(self.last_order_id)
    }

    pub fn next_trade_id(&mut self) -> u64 {
        self.last_trade_id += 1;
        self.last_trade_id
    }
}

/// A filled order together with its execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub order: Order,
    pub trade: Trade,
}

/// Matching state of one symbol.
#[derive(Debug, Clone)]
pub struct SimplePriceMatching {
    market: Market,
    fees: FeeSchedule,
    book: RestingBook,
    last_price: Option<Decimal>,
    /// Quote (buys) or base (sells) amount locked by each resting order
    locked: HashMap<OrderId, Decimal>,
    closed_orders: Vec<Order>,
    trades: Vec<Trade>,
}

impl SimplePriceMatching {
    pub fn new(market: Market, fees: FeeSchedule) -> Self {
        Self {
            market,
            fees,
            book: RestingBook::new(),
            last_price: None,
            locked: HashMap::new(),
            closed_orders: Vec::new(),
            trades: Vec::new(),
        }
    }

    pub fn market(&self) -> &Market {
        &self.market
    }

    pub fn last_price(&self) -> Option<Decimal> {
        self.last_price
    }

    /// Accept an order.
    ///
    /// Limit orders whose price is already crossed and market orders fill
    /// immediately as taker; other limit orders rest as maker. Returns the
    /// created order and, for immediate fills, the trade.
    pub fn place_order(
        &mut self,
        submit: &SubmitOrder,
        account: &mut Account,
        ids: &mut IdSequence,
        now: DateTime<Utc>,
    ) -> Result<(Order, Option<Trade>), ExchangeError> {
        if submit.symbol != self.market.symbol {
            return Err(ExchangeError::SymbolNotConfigured(submit.symbol.clone()));
        }
        if submit.quantity <= Decimal::ZERO {
            return Err(ExchangeError::InvalidOrder(format!(
                "quantity must be positive, got {}",
                submit.quantity
            )));
        }

        let (price, immediate) = match submit.order_type {
            OrderType::Market => {
                let price = self
                    .last_price
                    .ok_or_else(|| ExchangeError::NoMarketPrice(submit.symbol.clone()))?;
                (price, true)
            }
            OrderType::Limit => {
                if submit.price <= Decimal::ZERO {
                    return Err(ExchangeError::InvalidOrder(format!(
                        "limit price must be positive, got {}",
                        submit.price
                    )));
                }
                let crossed = match (self.last_price, submit.side) {
                    (Some(last), OrderSide::Buy) => last <= submit.price,
                    (Some(last), OrderSide::Sell) => last >= submit.price,
                    (None, _) => false,
                };
                (submit.price, crossed)
            }
        };

        let is_maker = !immediate;
        let lock_amount = self.required_funds(submit.side, price, submit.quantity, is_maker);
        let lock_currency = self.lock_currency(submit.side).to_string();
        account.lock(&lock_currency, lock_amount)?;

        let mut order = Order::from_submit(ids.next_order_id(), submit, OrderStatus::New, now);
        order.price = price;

        if immediate {
            let trade = self.execute(&mut order, lock_amount, false, account, ids, now);
            self.closed_orders.push(order.clone());
            self.trades.push(trade.clone());
            return Ok((order, Some(trade)));
        }

        debug!(
            order_id = %order.order_id,
            symbol = %order.symbol,
            side = %order.side,
            price = %order.price,
            quantity = %order.quantity,
            "Order resting"
        );
        self.locked.insert(order.order_id, lock_amount);
        self.book.insert(order.clone());
        Ok((order, None))
    }

    /// Remove a resting order and release its funds.
    pub fn cancel_order(
        &mut self,
        order: &Order,
        account: &mut Account,
        now: DateTime<Utc>,
    ) -> Result<Order, ExchangeError> {
        let resting = self
            .book
            .find(order.order_id)
            .map(|o| (o.side, o.price))
            .ok_or(ExchangeError::OrderNotFound(order.order_id))?;
        let mut canceled = self
            .book
            .remove(resting.0, resting.1, order.order_id)
            .ok_or(ExchangeError::OrderNotFound(order.order_id))?;

        if let Some(amount) = self.locked.remove(&canceled.order_id) {
            let currency = self.lock_currency(canceled.side).to_string();
            account.unlock(&currency, amount);
        }

        canceled.status = OrderStatus::Canceled;
        canceled.update_time = now;
        self.closed_orders.push(canceled.clone());
        Ok(canceled)
    }

    /// Move the simulated price and fill every resting order it reaches.
    pub fn process_price(
        &mut self,
        price: Decimal,
        account: &mut Account,
        ids: &mut IdSequence,
        now: DateTime<Utc>,
    ) -> Vec<Fill> {
        let mut crossed = self.book.take_crossed_bids(price);
        crossed.extend(self.book.take_crossed_asks(price));

        let mut fills = Vec::with_capacity(crossed.len());
        for mut order in crossed {
            let lock_amount = self.locked.remove(&order.order_id).unwrap_or_default();
            let trade = self.execute(&mut order, lock_amount, true, account, ids, now);
            self.closed_orders.push(order.clone());
            self.trades.push(trade.clone());
            fills.push(Fill { order, trade });
        }

        self.last_price = Some(price);
        fills
    }

    pub fn open_orders(&self) -> Vec<Order> {
        self.book.open_orders()
    }

    pub fn closed_orders(&self) -> &[Order] {
        &self.closed_orders
    }

    /// Executions of one order, oldest first.
    pub fn trades_of(&self, order_id: OrderId) -> Vec<Trade> {
        self.trades
            .iter()
            .filter(|t| t.order_id == order_id)
            .cloned()
            .collect()
    }

    /// Authoritative state of any order this matching has seen.
    pub fn find_order(&self, order_id: OrderId) -> Option<Order> {
        self.book.find(order_id).cloned().or_else(|| {
            self.closed_orders
                .iter()
                .rev()
                .find(|o| o.order_id == order_id)
                .cloned()
        })
    }

    fn lock_currency(&self, side: OrderSide) -> &str {
        match side {
            OrderSide::Buy => &self.market.quote_currency,
            OrderSide::Sell => &self.market.base_currency,
        }
    }

    fn required_funds(
        &self,
        side: OrderSide,
        price: Decimal,
        quantity: Decimal,
        is_maker: bool,
    ) -> Decimal {
        match side {
            OrderSide::Buy => {
                let notional = price * quantity;
                notional + notional * self.fees.rate(is_maker)
            }
            OrderSide::Sell => quantity,
        }
    }

    /// Settle a full fill of `order` at its own price.
    fn execute(
        &self,
        order: &mut Order,
        locked: Decimal,
        is_maker: bool,
        account: &mut Account,
        ids: &mut IdSequence,
        now: DateTime<Utc>,
    ) -> Trade {
        let quantity = order.remaining_quantity();
        let notional = order.price * quantity;
        let fee = notional * self.fees.rate(is_maker);
        let base = &self.market.base_currency;
        let quote = &self.market.quote_currency;

        match order.side {
            OrderSide::Buy => {
                account.consume_locked(quote, locked);
                account.deposit(base, quantity);
            }
            OrderSide::Sell => {
                account.consume_locked(base, locked);
                account.deposit(quote, notional - fee);
            }
        }

        order.executed_quantity = order.quantity;
        order.status = OrderStatus::Filled;
        order.update_time = now;

        metrics::record_fill(&order.symbol, &order.side.to_string());
        debug!(
            order_id = %order.order_id,
            symbol = %order.symbol,
            side = %order.side,
            price = %order.price,
            quantity = %quantity,
            fee = %fee,
            is_maker,
            "Order filled"
        );

        Trade {
            id: ids.next_trade_id(),
            order_id: order.order_id,
            symbol: order.symbol.clone(),
            side: order.side,
            price: order.price,
            quantity,
            quote_quantity: notional,
            fee,
            fee_currency: quote.clone(),
            is_maker,
            time: now,
        }
    }
}
