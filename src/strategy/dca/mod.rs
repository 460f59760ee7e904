//! Dollar-cost averaging strategy run as an explicit phase machine.
//!
//! One round places staged limit buys below the last close, waits for a
//! fill, and once a closed candle reaches the take-profit price cancels the
//! remaining buys and sells the accumulated base. Profit rolls back into
//! the budget and the next round starts after a cooldown.
//!
//! Phase changes are *requested* (timer, stream callback or follow-up of
//! the previous transition) through a single-slot [`PendingSlot`] and
//! *committed* only when the request names the legal successor of the
//! current phase. A failed side effect leaves the phase where it was; the
//! next trigger retries it.

mod config;
mod state;

pub use config::{DcaConfig, MAX_COOLDOWN_SECS};
pub use state::{DcaSnapshot, Phase, Position, TakeProfitProgress, TransitionOutcome};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::{SingleExchangeStrategy, StrategyContext, StrategyError};
use crate::exchange::{ExchangeError, Subscription};
use crate::metrics;
use crate::orders::{
    ActiveOrderBook, ActiveOrderReconciler, Order, OrderId, OrderStatus, ReconcilerConfig,
    SubmitOrder, Trade,
};
use crate::signal::{PendingSlot, Shutdown};
use crate::types::{KLine, Market, OrderSide};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OrderRole {
    OpenPosition,
    TakeProfit,
}

/// Client order ids of the form `<strategy id>-r<round>-open-<n>` and
/// `<strategy id>-r<round>-tp`.
#[derive(Debug, Clone)]
struct OrderTags {
    prefix: String,
}

impl OrderTags {
    fn new(strategy_id: &str) -> Self {
        Self {
            prefix: format!("{strategy_id}-"),
        }
    }

    fn open_position(&self, round: u64, index: u32) -> String {
        format!("{}r{}-open-{}", self.prefix, round, index)
    }

    fn take_profit(&self, round: u64) -> String {
        format!("{}r{}-tp", self.prefix, round)
    }

    fn classify(&self, client_order_id: &str) -> Option<OrderRole> {
        let rest = client_order_id.strip_prefix(&self.prefix)?.strip_prefix('r')?;
        let (round, tail) = rest.split_once('-')?;
        round.parse::<u64>().ok()?;
        if tail == "tp" {
            Some(OrderRole::TakeProfit)
        } else if tail.starts_with("open-") {
            Some(OrderRole::OpenPosition)
        } else {
            None
        }
    }
}

#[derive(Debug)]
struct DcaState {
    phase: Phase,
    budget: Decimal,
    position: Position,
    next_round_at: DateTime<Utc>,
    round: u64,
    last_price: Option<Decimal>,
    take_profit: TakeProfitProgress,
}

/// State reachable from stream callbacks.
struct Shared {
    id: String,
    market: Market,
    take_profit_ratio: Decimal,
    tags: OrderTags,
    state: Mutex<DcaState>,
    roles: Mutex<HashMap<OrderId, OrderRole>>,
    applied_trades: Mutex<HashSet<u64>>,
    requests: PendingSlot<Phase>,
    book: ActiveOrderBook,
}

impl Shared {
    fn request(&self, next: Phase, source: &str) -> bool {
        let accepted = self.requests.try_request(next);
        if !accepted {
            debug!(strategy_id = %self.id, requested = %next, source, "Transition request already pending, dropping");
        }
        accepted
    }

    fn take_profit_price(&self, position: &Position) -> Option<Decimal> {
        position
            .average_cost()
            .map(|cost| cost * (Decimal::ONE + self.take_profit_ratio))
    }

    /// Remember an order placed or adopted by this strategy.
    fn track(&self, order: Order) {
        if let Some(role) = self.tags.classify(&order.client_order_id) {
            self.roles.lock().insert(order.order_id, role);
        }
        if !order.is_terminal() {
            self.book.add(order);
        }
    }

    fn handle_order_update(&self, order: &Order) {
        if order.symbol != self.market.symbol {
            return;
        }
        let Some(role) = self.tags.classify(&order.client_order_id) else {
            return;
        };
        self.roles.lock().insert(order.order_id, role);

        if order.is_terminal() {
            self.book.update(order);
        } else {
            self.book.add(order.clone());
        }

        if role == OrderRole::TakeProfit && order.status == OrderStatus::Filled {
            let mut state = self.state.lock();
            state.take_profit.filled_quantity = Some(order.executed_quantity);
            let complete = state.take_profit.is_complete();
            drop(state);
            if complete {
                self.request(Phase::WaitToOpenPosition, "take-profit filled");
            }
        }
    }

    fn handle_trade(&self, trade: &Trade) {
        let Some((role, take_profit_complete)) = self.book_trade(trade) else {
            return;
        };
        match role {
            OrderRole::OpenPosition => {
                self.request(Phase::OpenPositionOrderFilled, "open-position fill");
            }
            OrderRole::TakeProfit if take_profit_complete => {
                self.request(Phase::WaitToOpenPosition, "take-profit filled");
            }
            OrderRole::TakeProfit => {}
        }
    }

    /// Apply a trade of one of our orders to the position, once per trade id.
    ///
    /// Returns the order's role and whether the take-profit is now complete.
    fn book_trade(&self, trade: &Trade) -> Option<(OrderRole, bool)> {
        if trade.symbol != self.market.symbol {
            return None;
        }
        let role = self.roles.lock().get(&trade.order_id).copied()?;
        if !self.applied_trades.lock().insert(trade.id) {
            debug!(strategy_id = %self.id, trade_id = trade.id, "Trade already applied");
            return None;
        }

        let mut state = self.state.lock();
        state.position.apply_trade(trade, &self.market);
        if role == OrderRole::TakeProfit {
            state.take_profit.traded_quantity += trade.quantity;
        }
        let position = state.position;
        let take_profit_complete = state.take_profit.is_complete();
        drop(state);

        info!(
            strategy_id = %self.id,
            order_id = %trade.order_id,
            side = %trade.side,
            price = %trade.price,
            quantity = %trade.quantity,
            base = %position.base,
            quote = %position.quote,
            "Position updated"
        );
        Some((role, take_profit_complete))
    }

    fn handle_kline(&self, kline: &KLine) {
        if kline.symbol != self.market.symbol || !kline.closed {
            return;
        }
        if kline.close <= Decimal::ZERO {
            warn!(strategy_id = %self.id, close = %kline.close, "Ignoring candle with non-positive close");
            return;
        }
        let mut state = self.state.lock();
        state.last_price = Some(kline.close);
        if state.phase != Phase::OpenPositionOrderFilled {
            return;
        }
        let target = self.take_profit_price(&state.position);
        drop(state);

        if let Some(target) = target {
            if kline.close >= target {
                info!(
                    strategy_id = %self.id,
                    close = %kline.close,
                    take_profit_price = %target,
                    "Take-profit price reached"
                );
                self.request(Phase::OpenPositionOrdersCancelling, "kline");
            }
        }
    }
}

/// DCA strategy bound to one session.
pub struct DcaStrategy {
    config: DcaConfig,
    cooldown: chrono::Duration,
    ctx: StrategyContext,
    shared: Arc<Shared>,
    transition_lock: tokio::sync::Mutex<()>,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl std::fmt::Debug for DcaStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DcaStrategy")
            .field("id", &self.shared.id)
            .field("phase", &self.phase())
            .field("config", &self.config)
            .finish()
    }
}

impl DcaStrategy {
    pub const TYPE: &'static str = "dca";

    /// Build the strategy and subscribe it to the session's stream.
    pub fn new(config: DcaConfig, ctx: StrategyContext) -> Result<Arc<Self>, StrategyError> {
        config.validate()?;
        let cooldown = config.cooldown()?;
        let market = ctx
            .session
            .market(&config.symbol)
            .cloned()
            .ok_or_else(|| ExchangeError::MarketNotDefined(config.symbol.clone()))?;

        let id = config.id();
        let shared = Arc::new(Shared {
            tags: OrderTags::new(&id),
            id,
            market,
            take_profit_ratio: config.take_profit_ratio,
            state: Mutex::new(DcaState {
                phase: Phase::None,
                budget: config.budget,
                position: Position::default(),
                next_round_at: ctx.clock.now(),
                round: 0,
                last_price: None,
                take_profit: TakeProfitProgress::default(),
            }),
            roles: Mutex::new(HashMap::new()),
            applied_trades: Mutex::new(HashSet::new()),
            requests: PendingSlot::new(),
            book: ActiveOrderBook::new(config.symbol.clone()),
        });

        let stream = ctx.session.stream();
        let subscriptions = vec![
            {
                let shared = shared.clone();
                stream.on_order_update(move |order| shared.handle_order_update(order))
            },
            {
                let shared = shared.clone();
                stream.on_trade_update(move |trade| shared.handle_trade(trade))
            },
            {
                let shared = shared.clone();
                stream.on_kline_closed(move |kline| shared.handle_kline(kline))
            },
        ];

        info!(
            strategy_id = %shared.id,
            session = %ctx.session.name(),
            symbol = %config.symbol,
            budget = %config.budget,
            orders = config.max_order_count,
            "DCA strategy created"
        );

        Ok(Arc::new(Self {
            config,
            cooldown,
            ctx,
            shared,
            transition_lock: tokio::sync::Mutex::new(()),
            subscriptions: Mutex::new(subscriptions),
        }))
    }

    pub fn from_json(value: serde_json::Value, ctx: StrategyContext) -> Result<Arc<Self>, StrategyError> {
        let config: DcaConfig =
            serde_json::from_value(value).map_err(|e| StrategyError::InvalidConfig(e.to_string()))?;
        Self::new(config, ctx)
    }

    pub fn config(&self) -> &DcaConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.shared.state.lock().phase
    }

    pub fn budget(&self) -> Decimal {
        self.shared.state.lock().budget
    }

    pub fn position(&self) -> Position {
        self.shared.state.lock().position
    }

    pub fn round(&self) -> u64 {
        self.shared.state.lock().round
    }

    pub fn snapshot(&self) -> DcaSnapshot {
        let state = self.shared.state.lock();
        DcaSnapshot {
            phase: state.phase,
            budget: state.budget,
            position: state.position,
            next_round_at: state.next_round_at,
            round: state.round,
            take_profit: state.take_profit,
        }
    }

    /// Replace progress with `snapshot`. Pending requests are discarded.
    ///
    /// A snapshot taken mid-round refers to orders and holdings on the
    /// venue; it is refused unless active order recovery is enabled.
    pub fn restore(&self, snapshot: DcaSnapshot) -> Result<(), StrategyError> {
        if snapshot.phase.is_mid_round() && !self.config.recover_active_orders {
            return Err(StrategyError::InvalidSnapshot(format!(
                "phase {} needs active order recovery, which is disabled",
                snapshot.phase
            )));
        }

        let mut state = self.shared.state.lock();
        state.phase = snapshot.phase;
        state.budget = snapshot.budget;
        state.position = snapshot.position;
        state.next_round_at = snapshot.next_round_at;
        state.round = snapshot.round;
        state.take_profit = snapshot.take_profit;
        drop(state);
        self.shared.requests.take();
        info!(strategy_id = %self.shared.id, phase = %snapshot.phase, round = snapshot.round, "DCA state restored");
        Ok(())
    }

    /// Orders of this strategy believed open.
    pub fn active_orders(&self) -> Vec<Order> {
        self.shared.book.orders()
    }

    pub fn book(&self) -> &ActiveOrderBook {
        &self.shared.book
    }

    /// Non-blocking transition request. Returns false if one is pending.
    pub fn request_transition(&self, next: Phase) -> bool {
        self.shared.request(next, "external")
    }

    /// Handle the pending request, if any, and everything it leads to.
    pub async fn process_requests(&self) {
        while let Some(next) = self.shared.requests.take() {
            self.apply_and_log(next).await;
        }
    }

    async fn apply_and_log(&self, next: Phase) {
        match self.apply_transition(next).await {
            TransitionOutcome::Committed => {}
            outcome => {
                debug!(strategy_id = %self.shared.id, requested = %next, outcome = ?outcome, "Transition request not committed");
            }
        }
    }

    /// Try to move to `next` right now.
    pub async fn apply_transition(&self, next: Phase) -> TransitionOutcome {
        let _guard = self.transition_lock.lock().await;
        let current = self.phase();

        if !current.is_legal(next) {
            debug!(
                strategy_id = %self.shared.id,
                from = %current,
                requested = %next,
                "Ignoring transition request that is not the legal successor"
            );
            return TransitionOutcome::Rejected;
        }

        if next == Phase::PositionOpening {
            let next_round_at = self.shared.state.lock().next_round_at;
            if self.ctx.clock.now() < next_round_at {
                debug!(strategy_id = %self.shared.id, next_round_at = %next_round_at, "Round not due yet");
                return TransitionOutcome::Held;
            }
        }

        let side_effect = match next {
            Phase::OpenPositionReady => self.place_open_position_orders().await,
            Phase::OpenPositionOrdersCancelled => self.cancel_open_position_orders().await,
            Phase::TakeProfitReady => self.place_take_profit_order().await,
            _ => Ok(()),
        };
        if let Err(e) = side_effect {
            warn!(
                strategy_id = %self.shared.id,
                from = %current,
                to = %next,
                error = %e,
                "Transition side effect failed, staying in current phase"
            );
            return TransitionOutcome::Held;
        }

        self.commit(current, next);
        if let Some(follow_up) = next.follow_up() {
            self.shared.request(follow_up, "follow-up");
        }
        TransitionOutcome::Committed
    }

    fn commit(&self, from: Phase, to: Phase) {
        let mut state = self.shared.state.lock();
        match (from, to) {
            (_, Phase::PositionOpening) => {
                state.round += 1;
            }
            (Phase::TakeProfitReady, Phase::WaitToOpenPosition) => {
                let profit = state.position.quote;
                state.budget += profit;
                state.position.reset();
                state.take_profit = TakeProfitProgress::default();
                let now = self.ctx.clock.now();
                state.next_round_at = now.checked_add_signed(self.cooldown).unwrap_or_else(|| {
                    warn!(strategy_id = %self.shared.id, now = %now, "Cooldown end out of range, no further rounds");
                    DateTime::<Utc>::MAX_UTC
                });
                info!(
                    strategy_id = %self.shared.id,
                    round = state.round,
                    profit = %profit,
                    budget = %state.budget,
                    next_round_at = %state.next_round_at,
                    "Round finished"
                );
            }
            _ => {}
        }
        state.phase = to;
        let round = state.round;
        drop(state);

        if from == Phase::TakeProfitReady {
            self.shared.roles.lock().clear();
            self.shared.applied_trades.lock().clear();
        }

        info!(strategy_id = %self.shared.id, round, from = %from, to = %to, "Phase transition");
        metrics::record_transition(&self.shared.id, from.as_str(), to.as_str());
    }

    /// Request made by the periodic timer from the current phase.
    fn timer_request(&self) -> Option<Phase> {
        let state = self.shared.state.lock();
        match state.phase {
            // Fallbacks for requests a busy slot may have dropped
            Phase::OpenPositionReady if state.position.base > Decimal::ZERO => {
                Some(Phase::OpenPositionOrderFilled)
            }
            Phase::OpenPositionOrderFilled => {
                let target = self.shared.take_profit_price(&state.position)?;
                let last = state.last_price?;
                (last >= target).then_some(Phase::OpenPositionOrdersCancelling)
            }
            Phase::TakeProfitReady if state.take_profit.is_complete() => Some(Phase::WaitToOpenPosition),
            phase => phase.timer_request(),
        }
    }

    async fn place_open_position_orders(&self) -> Result<(), StrategyError> {
        let (reference, budget, round) = {
            let state = self.shared.state.lock();
            (state.last_price, state.budget, state.round)
        };
        let reference = reference
            .filter(|price| *price > Decimal::ZERO)
            .ok_or_else(|| StrategyError::NoReferencePrice(self.config.symbol.clone()))?;
        let orders = self.size_open_position_orders(reference, budget, round)?;

        match self.ctx.executor.submit_orders(&orders).await {
            Ok(created) => {
                info!(
                    strategy_id = %self.shared.id,
                    round,
                    reference = %reference,
                    count = created.len(),
                    "Open-position orders placed"
                );
                for order in created {
                    self.shared.track(order);
                }
                Ok(())
            }
            Err(e) => {
                // Orders accepted before the failure must not survive into the retry
                if let Err(cleanup) = self.cancel_open_position_orders().await {
                    warn!(strategy_id = %self.shared.id, error = %cleanup, "Failed to cancel partially placed orders");
                }
                Err(e.into())
            }
        }
    }

    /// Staged buys splitting `budget` evenly below `reference`.
    fn size_open_position_orders(
        &self,
        reference: Decimal,
        budget: Decimal,
        round: u64,
    ) -> Result<Vec<SubmitOrder>, StrategyError> {
        let count = self.config.max_order_count;
        let overflow = |what: &str| StrategyError::Sizing(format!("{what} out of range for reference {reference}"));
        let notional = budget
            .checked_div(Decimal::from(count))
            .ok_or_else(|| overflow("notional"))?;

        (1..=count)
            .map(|i| -> Result<SubmitOrder, StrategyError> {
                let discount = self
                    .config
                    .price_deviation
                    .checked_mul(Decimal::from(i))
                    .and_then(|offset| Decimal::ONE.checked_sub(offset))
                    .ok_or_else(|| overflow("price offset"))?;
                let price = reference
                    .checked_mul(discount)
                    .filter(|price| *price > Decimal::ZERO)
                    .ok_or_else(|| overflow("price"))?;
                let quantity = notional.checked_div(price).ok_or_else(|| overflow("quantity"))?;
                Ok(SubmitOrder::limit(&self.config.symbol, OrderSide::Buy, price, quantity)
                    .with_client_order_id(self.shared.tags.open_position(round, i)))
            })
            .collect()
    }

    async fn cancel_open_position_orders(&self) -> Result<(), StrategyError> {
        let orders: Vec<Order> = self
            .shared
            .book
            .orders()
            .into_iter()
            .filter(|o| self.shared.tags.classify(&o.client_order_id) == Some(OrderRole::OpenPosition))
            .collect();

        for order in orders {
            match self.ctx.executor.cancel_orders(std::slice::from_ref(&order)).await {
                Ok(()) => {}
                Err(ExchangeError::OrderNotFound(order_id)) => {
                    debug!(strategy_id = %self.shared.id, order_id = %order_id, "Order already closed on venue");
                    self.settle_closed_order(&order).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Catch up on an order the venue no longer holds open.
    ///
    /// Its fills may never have reached the stream, so the authoritative
    /// order and its trades are looked up and fed through the same
    /// handlers as live events.
    async fn settle_closed_order(&self, order: &Order) -> Result<(), StrategyError> {
        let Some(query) = self.ctx.session.query_service() else {
            warn!(
                strategy_id = %self.shared.id,
                order_id = %order.order_id,
                "Session has no order lookup, treating closed order as canceled"
            );
            let mut closed = order.clone();
            closed.status = OrderStatus::Canceled;
            closed.update_time = self.ctx.clock.now();
            self.shared.book.update(&closed);
            return Ok(());
        };

        let current = query.query_order(&order.symbol, order.order_id).await?;
        if !current.is_terminal() {
            return Err(ExchangeError::RemoteQueryFailed(format!(
                "order {} refused cancel but is still {}",
                current.order_id, current.status
            ))
            .into());
        }
        if current.executed_quantity > Decimal::ZERO {
            let trades = query.query_order_trades(&order.symbol, order.order_id).await?;
            for trade in &trades {
                self.shared.book_trade(trade);
            }
        }
        self.shared.handle_order_update(&current);
        info!(
            strategy_id = %self.shared.id,
            order_id = %current.order_id,
            status = %current.status,
            executed = %current.executed_quantity,
            "Settled order closed on venue"
        );
        Ok(())
    }

    async fn place_take_profit_order(&self) -> Result<(), StrategyError> {
        let (position, round) = {
            let state = self.shared.state.lock();
            (state.position, state.round)
        };
        let price = self
            .shared
            .take_profit_price(&position)
            .ok_or_else(|| StrategyError::EmptyPosition(self.config.symbol.clone()))?;

        let order = SubmitOrder::limit(&self.config.symbol, OrderSide::Sell, price, position.base)
            .with_client_order_id(self.shared.tags.take_profit(round));
        let created = self.ctx.executor.submit_orders(&[order]).await?;

        info!(
            strategy_id = %self.shared.id,
            round,
            price = %price,
            quantity = %position.base,
            "Take-profit order placed"
        );
        for order in created {
            self.shared.track(order);
        }
        Ok(())
    }

    /// Adopt this strategy's orders still open on the venue.
    pub async fn recover_active_orders(&self) -> Result<usize, StrategyError> {
        let open = self
            .ctx
            .session
            .exchange()
            .query_open_orders(&self.config.symbol)
            .await?;

        let mut adopted = 0;
        for order in open {
            if self.shared.tags.classify(&order.client_order_id).is_some() {
                self.shared.track(order);
                adopted += 1;
            }
        }
        info!(strategy_id = %self.shared.id, adopted, "Recovered active orders");
        Ok(adopted)
    }

    fn spawn_reconciler(&self, shutdown: &Shutdown) -> Option<JoinHandle<()>> {
        if !self.config.reconcile {
            return None;
        }
        let Some(query) = self.ctx.session.query_service() else {
            warn!(
                strategy_id = %self.shared.id,
                session = %self.ctx.session.name(),
                "Session has no order lookup, reconciliation disabled"
            );
            return None;
        };

        let reconciler = Arc::new(ActiveOrderReconciler::new(
            self.shared.book.clone(),
            self.ctx.session.exchange().clone(),
            query.clone(),
            self.ctx.clock.clone(),
            ReconcilerConfig::default().with_client_order_id_prefix(self.shared.tags.prefix.clone()),
        ));
        Some(reconciler.spawn(shutdown.clone()))
    }
}

impl Drop for DcaStrategy {
    fn drop(&mut self) {
        let stream = self.ctx.session.stream();
        for subscription in self.subscriptions.get_mut().drain(..) {
            stream.unsubscribe(subscription);
        }
    }
}

#[async_trait]
impl SingleExchangeStrategy for DcaStrategy {
    fn id(&self) -> &str {
        &self.shared.id
    }

    fn strategy_type(&self) -> &'static str {
        Self::TYPE
    }

    async fn step(&self) {
        if let Some(next) = self.timer_request() {
            self.shared.request(next, "timer");
        }
        self.process_requests().await;
    }

    async fn run(&self, shutdown: Shutdown) -> Result<(), StrategyError> {
        info!(strategy_id = %self.shared.id, phase = %self.phase(), "DCA strategy running");

        if self.config.recover_active_orders {
            if let Err(e) = self.recover_active_orders().await {
                warn!(strategy_id = %self.shared.id, error = %e, "Active order recovery failed");
            }
        }
        let reconciler = self.spawn_reconciler(&shutdown);

        let mut stop = shutdown;
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.tick_interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = stop.wait() => break,
                next = self.shared.requests.recv() => {
                    self.apply_and_log(next).await;
                    self.process_requests().await;
                }
                _ = ticker.tick() => self.step().await,
            }
        }

        if let Some(handle) = reconciler {
            if let Err(e) = handle.await {
                warn!(strategy_id = %self.shared.id, error = %e, "Reconciler task failed");
            }
        }
        info!(strategy_id = %self.shared.id, phase = %self.phase(), "DCA strategy stopped");
        Ok(())
    }

    fn export_state(&self) -> Result<serde_json::Value, StrategyError> {
        Ok(serde_json::to_value(self.snapshot())?)
    }

    fn import_state(&self, state: serde_json::Value) -> Result<(), StrategyError> {
        let snapshot: DcaSnapshot = serde_json::from_value(state)?;
        self.restore(snapshot)
    }
}
