//! Active order reconciliation with the venue.
//!
//! Stream events can be lost (disconnects, missed pushes). The reconciler
//! periodically, or on demand, compares the local [`ActiveOrderBook`] with
//! the venue's open-order listing and repairs drift:
//!
//! - local orders the venue no longer lists are looked up individually and
//!   their authoritative state applied (usually a terminal status, which
//!   removes them);
//! - venue orders the book does not know are adopted, unless they were
//!   updated within the exclusion window, where a stream event for them may
//!   still be in flight.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::active_book::ActiveOrderBook;
use super::types::{Order, OrderId};
use crate::clock::Clock;
use crate::exchange::{Exchange, OrderQueryService};
use crate::metrics;
use crate::resilience::{retry_until_success, RetryError, RetryPolicy};
use crate::signal::{PendingSlot, Shutdown};

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciliationReport {
    pub symbol: String,
    /// Open orders the venue reported
    pub remote_open: usize,
    /// Local orders refreshed from a point lookup
    pub updated: Vec<OrderId>,
    /// Venue orders added to the book
    pub adopted: Vec<OrderId>,
    /// Venue orders left alone because they changed too recently
    pub skipped_recent: Vec<OrderId>,
    /// Venue orders left alone because another owner placed them
    pub skipped_foreign: Vec<OrderId>,
}

impl ReconciliationReport {
    pub fn is_clean(&self) -> bool {
        self.updated.is_empty() && self.adopted.is_empty()
    }
}

/// A point lookup that failed during a pass.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupFailure {
    pub order_id: OrderId,
    pub error: RetryError,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ReconcileError {
    #[error("Open orders query failed: {0}")]
    OpenOrdersQuery(RetryError),

    /// Some lookups failed; every other correction of the pass was applied.
    #[error("Reconciliation partially failed: {} lookups failed", .failures.len())]
    Partial {
        report: ReconciliationReport,
        failures: Vec<LookupFailure>,
    },
}

/// Configuration for active order reconciliation.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Minimum time between periodic passes
    pub interval: Duration,
    /// Random extra delay added to each interval
    pub interval_jitter: Duration,
    /// Venue orders updated more recently than this are not adopted
    pub exclusion_window: chrono::Duration,
    /// Retry policy for the open-orders listing
    pub open_orders_retry: RetryPolicy,
    /// Retry policy for each point lookup
    pub lookup_retry: RetryPolicy,
    /// Only adopt venue orders whose client order id starts with this
    pub client_order_id_prefix: Option<String>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(25 * 60),
            interval_jitter: Duration::from_secs(10 * 60),
            exclusion_window: chrono::Duration::minutes(5),
            open_orders_retry: RetryPolicy::unbounded(),
            lookup_retry: RetryPolicy::bounded(5),
            client_order_id_prefix: None,
        }
    }
}

impl ReconcilerConfig {
    /// Short intervals for paper trading and tests
    pub fn aggressive() -> Self {
        Self {
            interval: Duration::from_secs(30),
            interval_jitter: Duration::from_secs(10),
            exclusion_window: chrono::Duration::seconds(30),
            open_orders_retry: RetryPolicy {
                initial_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(5),
                ..RetryPolicy::unbounded()
            },
            lookup_retry: RetryPolicy {
                initial_delay: Duration::from_millis(100),
                max_delay: Duration::from_secs(5),
                ..RetryPolicy::bounded(3)
            },
            client_order_id_prefix: None,
        }
    }

    #[must_use]
    pub fn with_client_order_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.client_order_id_prefix = Some(prefix.into());
        self
    }
}

/// Reconciles one symbol's active order book against the venue.
///
/// # Architecture
///
/// - `sync_active_orders()` runs a single pass; passes never overlap
/// - `trigger()` requests an extra pass; at most one request is held
/// - `run()` / `spawn()` drive periodic passes until shutdown
pub struct ActiveOrderReconciler {
    book: ActiveOrderBook,
    exchange: Arc<dyn Exchange>,
    query: Arc<dyn OrderQueryService>,
    clock: Arc<dyn Clock>,
    config: ReconcilerConfig,
    requests: PendingSlot<()>,
    pass_lock: tokio::sync::Mutex<()>,
}

impl ActiveOrderReconciler {
    pub fn new(
        book: ActiveOrderBook,
        exchange: Arc<dyn Exchange>,
        query: Arc<dyn OrderQueryService>,
        clock: Arc<dyn Clock>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            book,
            exchange,
            query,
            clock,
            config,
            requests: PendingSlot::new(),
            pass_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn book(&self) -> &ActiveOrderBook {
        &self.book
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Ask for a pass outside the periodic schedule.
    ///
    /// Returns false if a request is already pending; the pending pass will
    /// cover this one.
    pub fn trigger(&self) -> bool {
        let accepted = self.requests.try_request(());
        if !accepted {
            debug!(symbol = %self.book.symbol(), "Reconciliation already requested, dropping trigger");
        }
        accepted
    }

    /// Run one reconciliation pass.
    pub async fn sync_active_orders(
        &self,
        shutdown: &Shutdown,
    ) -> Result<ReconciliationReport, ReconcileError> {
        let _pass = self.pass_lock.lock().await;
        let symbol = self.book.symbol().to_string();
        let cutoff = self.clock.now() - self.config.exclusion_window;

        let open_orders = retry_until_success(
            "query_open_orders",
            &self.config.open_orders_retry,
            shutdown,
            || self.exchange.query_open_orders(&symbol),
        )
        .await
        .map_err(|e| {
            metrics::record_reconciliation(&symbol, "failed");
            ReconcileError::OpenOrdersQuery(e)
        })?;
        metrics::set_remote_open_orders(&symbol, open_orders.len());

        let mut report = ReconciliationReport {
            symbol: symbol.clone(),
            remote_open: open_orders.len(),
            ..ReconciliationReport::default()
        };
        let mut failures = Vec::new();
        let mut remote: HashMap<OrderId, Order> =
            open_orders.into_iter().map(|o| (o.order_id, o)).collect();

        // Local orders the venue no longer lists missed their final update
        for local in self.book.orders() {
            if remote.remove(&local.order_id).is_some() {
                continue;
            }

            let order_id = local.order_id;
            let lookup = retry_until_success(
                "query_order",
                &self.config.lookup_retry,
                shutdown,
                || self.query.query_order(&symbol, order_id),
            )
            .await;

            match lookup {
                Ok(authoritative) => {
                    info!(
                        symbol = %symbol,
                        order_id = %order_id,
                        local_status = %local.status,
                        remote_status = %authoritative.status,
                        "Applying missed order update"
                    );
                    self.book.update(&authoritative);
                    report.updated.push(order_id);
                }
                Err(e) => {
                    warn!(symbol = %symbol, order_id = %order_id, error = %e, "Order lookup failed");
                    metrics::record_lookup_failure(&symbol);
                    failures.push(LookupFailure { order_id, error: e });
                }
            }
        }

        // Venue orders the book does not know
        let mut unknown: Vec<Order> = remote.into_values().collect();
        unknown.sort_by_key(|o| o.order_id);
        for order in unknown {
            if let Some(prefix) = &self.config.client_order_id_prefix {
                if !order.client_order_id.starts_with(prefix.as_str()) {
                    report.skipped_foreign.push(order.order_id);
                    continue;
                }
            }
            if order.update_time > cutoff {
                debug!(
                    symbol = %symbol,
                    order_id = %order.order_id,
                    update_time = %order.update_time,
                    "Order updated inside exclusion window, not adopting"
                );
                report.skipped_recent.push(order.order_id);
                continue;
            }
            let order_id = order.order_id;
            if self.book.add(order) {
                info!(symbol = %symbol, order_id = %order_id, "Adopted venue order into active book");
                report.adopted.push(order_id);
            }
        }

        if failures.is_empty() {
            metrics::record_reconciliation(&symbol, "ok");
            Ok(report)
        } else {
            metrics::record_reconciliation(&symbol, "partial");
            Err(ReconcileError::Partial { report, failures })
        }
    }

    /// Delay until the next periodic pass.
    pub fn next_interval(&self) -> Duration {
        let jitter_ms = self.config.interval_jitter.as_millis() as u64;
        let extra = if jitter_ms > 0 {
            rand::rng().random_range(0..=jitter_ms)
        } else {
            0
        };
        self.config.interval + Duration::from_millis(extra)
    }

    /// Run passes on the jittered schedule and on triggers until shutdown.
    pub async fn run(&self, shutdown: Shutdown) {
        let mut stop = shutdown.clone();
        info!(symbol = %self.book.symbol(), "Active order reconciler started");

        loop {
            let delay = self.next_interval();
            tokio::select! {
                biased;
                _ = stop.wait() => break,
                _ = self.requests.recv() => {}
                _ = tokio::time::sleep(delay) => {}
            }

            tokio::select! {
                biased;
                _ = stop.wait() => break,
                result = self.sync_active_orders(&shutdown) => self.log_result(result),
            }
        }

        info!(symbol = %self.book.symbol(), "Active order reconciler stopped");
    }

    /// Spawn `run` as a background task.
    pub fn spawn(self: Arc<Self>, shutdown: Shutdown) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    fn log_result(&self, result: Result<ReconciliationReport, ReconcileError>) {
        match result {
            Ok(report) if report.is_clean() => {
                debug!(symbol = %report.symbol, remote_open = report.remote_open, "Active orders in sync");
            }
            Ok(report) => {
                info!(
                    symbol = %report.symbol,
                    updated = report.updated.len(),
                    adopted = report.adopted.len(),
                    skipped_recent = report.skipped_recent.len(),
                    "Active orders reconciled"
                );
            }
            Err(ReconcileError::Partial { report, failures }) => {
                warn!(
                    symbol = %report.symbol,
                    updated = report.updated.len(),
                    adopted = report.adopted.len(),
                    failed = failures.len(),
                    "Reconciliation partially failed"
                );
            }
            Err(e) => {
                error!(symbol = %self.book.symbol(), error = %e, "Reconciliation failed");
            }
        }
    }
}
