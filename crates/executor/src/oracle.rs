use crate::error::ExecutorError;
use api_client::ExchangeGateway;
use core_types::SymbolFilters;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Per-symbol trading rules, fetched once and cached for the life of the process.
pub struct TickSizeOracle {
    gateway: Arc<dyn ExchangeGateway>,
    cache: RwLock<HashMap<String, SymbolFilters>>,
}

impl TickSizeOracle {
    pub fn new(gateway: Arc<dyn ExchangeGateway>) -> Self {
        Self {
            gateway,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn filters(&self, symbol: &str) -> Result<SymbolFilters, ExecutorError> {
        if let Some(filters) = self.cache.read().await.get(symbol) {
            return Ok(*filters);
        }

        let filters = self.gateway.get_symbol_filters(symbol).await?;
        info!(
            symbol,
            tick_size = %filters.tick_size,
            step_size = %filters.step_size,
            min_notional = %filters.min_notional,
            "Loaded symbol filters"
        );
        self.cache
            .write()
            .await
            .insert(symbol.to_string(), filters);
        Ok(filters)
    }

    pub async fn tick_size(&self, symbol: &str) -> Result<Decimal, ExecutorError> {
        Ok(self.filters(symbol).await?.tick_size)
    }

    pub async fn min_notional(&self, symbol: &str) -> Result<Decimal, ExecutorError> {
        Ok(self.filters(symbol).await?.min_notional)
    }
}
