//! Strategy framework.
//!
//! Strategies are venue-agnostic: they place orders through an
//! [`OrderExecutor`] and learn about fills from the session's event stream.
//! A [`StrategyRegistry`] maps strategy names to constructors so the binary
//! can build strategies from configuration.

pub mod dca;
mod registry;

pub use registry::{StrategyFactory, StrategyRegistry};

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::clock::Clock;
use crate::exchange::ExchangeError;
use crate::execution::{ExchangeSession, OrderExecutor, SessionOrderExecutor};
use crate::signal::Shutdown;

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("Invalid strategy configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown strategy: '{0}'")]
    UnknownStrategy(String),

    #[error("Snapshot cannot be restored: {0}")]
    InvalidSnapshot(String),

    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("No reference price for {0} yet")]
    NoReferencePrice(String),

    #[error("Order sizing failed: {0}")]
    Sizing(String),

    #[error("No position to take profit on for {0}")]
    EmptyPosition(String),

    #[error("Strategy state error: {0}")]
    State(#[from] serde_json::Error),
}

/// Everything a single-venue strategy needs from its environment.
#[derive(Clone)]
pub struct StrategyContext {
    pub session: ExchangeSession,
    pub executor: Arc<dyn OrderExecutor>,
    pub clock: Arc<dyn Clock>,
}

impl StrategyContext {
    /// Context submitting straight through `session`.
    pub fn new(session: ExchangeSession, clock: Arc<dyn Clock>) -> Self {
        let executor = Arc::new(SessionOrderExecutor::new(session.clone()));
        Self {
            session,
            executor,
            clock,
        }
    }

    /// Replace the executor, e.g. with a wrapper adding checks.
    pub fn with_executor(mut self, executor: Arc<dyn OrderExecutor>) -> Self {
        self.executor = executor;
        self
    }
}

impl std::fmt::Debug for StrategyContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyContext")
            .field("session", &self.session.name())
            .field("now", &self.clock.now())
            .finish()
    }
}

/// Strategy bound to one exchange session.
#[async_trait]
pub trait SingleExchangeStrategy: Send + Sync {
    fn id(&self) -> &str;

    fn strategy_type(&self) -> &'static str;

    /// One timer trigger followed by handling every pending request.
    ///
    /// Backtests call this once per replayed candle; `run` calls it on a
    /// wall-clock interval.
    async fn step(&self);

    /// Drive the strategy until `shutdown` fires.
    async fn run(&self, shutdown: Shutdown) -> Result<(), StrategyError>;

    /// Serializable view of the strategy's progress.
    fn export_state(&self) -> Result<serde_json::Value, StrategyError>;

    /// Restore progress saved by [`export_state`](Self::export_state).
    fn import_state(&self, state: serde_json::Value) -> Result<(), StrategyError>;
}
