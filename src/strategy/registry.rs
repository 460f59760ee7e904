//! Name to constructor lookup for strategies.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use super::dca::DcaStrategy;
use super::{SingleExchangeStrategy, StrategyContext, StrategyError};

/// Builds a strategy from its JSON configuration.
pub type StrategyFactory = Arc<
    dyn Fn(serde_json::Value, StrategyContext) -> Result<Arc<dyn SingleExchangeStrategy>, StrategyError>
        + Send
        + Sync,
>;

/// Explicit registry; nothing is registered implicitly.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    factories: BTreeMap<String, StrategyFactory>,
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("names", &self.names())
            .finish()
    }
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every strategy shipped with the crate.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(DcaStrategy::TYPE, |config, ctx| {
            let strategy: Arc<dyn SingleExchangeStrategy> = DcaStrategy::from_json(config, ctx)?;
            Ok(strategy)
        });
        registry
    }

    /// Register `factory` under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(serde_json::Value, StrategyContext) -> Result<Arc<dyn SingleExchangeStrategy>, StrategyError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn build(
        &self,
        name: &str,
        config: serde_json::Value,
        ctx: StrategyContext,
    ) -> Result<Arc<dyn SingleExchangeStrategy>, StrategyError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| StrategyError::UnknownStrategy(name.to_string()))?;
        let strategy = factory(config, ctx)?;
        info!(strategy = %name, strategy_id = %strategy.id(), "Strategy built");
        Ok(strategy)
    }
}
