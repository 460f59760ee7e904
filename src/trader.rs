//! Trader
//!
//! Runs every attached strategy as its own task and supervises them:
//! - one shared shutdown signal for all strategies
//! - panics are caught per task and reported, never propagated

use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::execution::{ExchangeSession, OrderExecutionRouter};
use crate::signal::Shutdown;
use crate::strategy::SingleExchangeStrategy;

#[derive(Debug, Error)]
pub enum TraderError {
    #[error("No strategies configured")]
    NoStrategies,
}

/// Outcome of one strategy task.
#[derive(Debug, Clone)]
pub struct StrategyRunResult {
    pub id: String,
    pub session: String,
    pub panicked: bool,
    pub error: Option<String>,
}

/// Owns the sessions and the strategies attached to them.
#[derive(Default)]
pub struct Trader {
    router: OrderExecutionRouter,
    single: Vec<(String, Arc<dyn SingleExchangeStrategy>)>,
}

impl Trader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_session(&mut self, session: ExchangeSession) {
        info!(session = %session.name(), "Adding session to trader");
        self.router.add_session(session);
    }

    pub fn router(&self) -> &OrderExecutionRouter {
        &self.router
    }

    /// Attach a strategy to a named session.
    pub fn attach(&mut self, session: impl Into<String>, strategy: Arc<dyn SingleExchangeStrategy>) {
        let session = session.into();
        info!(
            strategy_id = %strategy.id(),
            strategy_type = %strategy.strategy_type(),
            session = %session,
            "Attaching strategy"
        );
        self.single.push((session, strategy));
    }

    pub fn strategies(&self) -> impl Iterator<Item = &Arc<dyn SingleExchangeStrategy>> {
        self.single.iter().map(|(_, strategy)| strategy)
    }

    /// Run every strategy until `shutdown` fires and all of them return.
    pub async fn run(&self, shutdown: Shutdown) -> Result<Vec<StrategyRunResult>, TraderError> {
        if self.single.is_empty() {
            return Err(TraderError::NoStrategies);
        }

        info!(
            strategies = self.single.len(),
            sessions = ?self.router.session_names(),
            "Starting trader"
        );

        let mut join_set: JoinSet<StrategyRunResult> = JoinSet::new();

        for (session, strategy) in &self.single {
            let strategy = strategy.clone();
            let session = session.clone();
            let shutdown = shutdown.clone();
            join_set.spawn(async move {
                let id = strategy.id().to_string();
                let inner = tokio::spawn(async move { strategy.run(shutdown).await });
                supervise(id, session, inner).await
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => error!(error = %e, "Supervisor task failed"),
            }
        }
        info!(finished = results.len(), "Trader stopped");
        Ok(results)
    }
}

async fn supervise(
    id: String,
    session: String,
    inner: tokio::task::JoinHandle<Result<(), crate::strategy::StrategyError>>,
) -> StrategyRunResult {
    let (panicked, error) = match inner.await {
        Ok(Ok(())) => {
            info!(strategy_id = %id, "Strategy completed normally");
            (false, None)
        }
        Ok(Err(e)) => {
            error!(strategy_id = %id, error = %e, "Strategy failed");
            (false, Some(e.to_string()))
        }
        Err(e) if e.is_panic() => {
            let panic_info = e.into_panic();
            let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic_info.downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            };
            error!(
                strategy_id = %id,
                panic_msg = %panic_msg,
                "CRITICAL: Strategy panicked! Manual intervention may be required."
            );
            (true, Some(panic_msg))
        }
        Err(e) => {
            error!(strategy_id = %id, error = %e, "Strategy task cancelled");
            (false, Some(e.to_string()))
        }
    };

    StrategyRunResult {
        id,
        session,
        panicked,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::shutdown_channel;
    use crate::strategy::StrategyError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Sleeper {
        id: String,
        steps: AtomicUsize,
        panic: bool,
    }

    #[async_trait]
    impl SingleExchangeStrategy for Sleeper {
        fn id(&self) -> &str {
            &self.id
        }

        fn strategy_type(&self) -> &'static str {
            "sleeper"
        }

        async fn step(&self) {
            self.steps.fetch_add(1, Ordering::SeqCst);
        }

        async fn run(&self, mut shutdown: Shutdown) -> Result<(), StrategyError> {
            if self.panic {
                panic!("boom");
            }
            loop {
                tokio::select! {
                    _ = shutdown.wait() => return Ok(()),
                    _ = tokio::time::sleep(Duration::from_secs(1)) => self.step().await,
                }
            }
        }

        fn export_state(&self) -> Result<serde_json::Value, StrategyError> {
            Ok(serde_json::Value::Null)
        }

        fn import_state(&self, _state: serde_json::Value) -> Result<(), StrategyError> {
            Ok(())
        }
    }

    fn sleeper(id: &str, panic: bool) -> Arc<Sleeper> {
        Arc::new(Sleeper {
            id: id.to_string(),
            steps: AtomicUsize::new(0),
            panic,
        })
    }

    #[tokio::test]
    async fn test_no_strategies() {
        let trader = Trader::new();
        assert!(matches!(
            trader.run(Shutdown::never()).await,
            Err(TraderError::NoStrategies)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_strategies_stop_on_shutdown_and_panics_are_contained() {
        let steady = sleeper("steady", false);
        let mut trader = Trader::new();
        trader.attach("backtest", steady.clone());
        trader.attach("backtest", sleeper("crashy", true));

        let (trigger, shutdown) = shutdown_channel();
        let handle = tokio::spawn(async move { trader.run(shutdown).await });

        tokio::time::sleep(Duration::from_millis(3500)).await;
        trigger.trigger();

        let mut results = handle.await.unwrap().unwrap();
        results.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(results.len(), 2);
        assert!(results[0].panicked);
        assert_eq!(results[0].error.as_deref(), Some("boom"));
        assert!(!results[1].panicked);
        assert!(results[1].error.is_none());
        assert!(results.iter().all(|r| r.session == "backtest"));
        assert_eq!(steady.steps.load(Ordering::SeqCst), 3);
    }
}
