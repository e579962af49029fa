//! Application state for catalog service.

use std::sync::Arc;

use catalog_core::transport::postgres::PgConnectionProvider;
use catalog_core::Instance;
use common::config::AppConfig;
use common::errors::AppResult;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub instance: Arc<Instance>,
    /// Present when the catalog is backed by a live server.
    pub pools: Option<Arc<PgConnectionProvider>>,
}

impl AppState {
    /// Creates the state for the server named by `config.database_url`.
    /// Connections are opened lazily.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let pools = Arc::new(PgConnectionProvider::new(config.clone())?);
        let instance = Instance::new(
            pools.server_label(),
            pools.clone(),
            Arc::new(config.filters.clone()),
        );
        Ok(Self {
            config,
            instance,
            pools: Some(pools),
        })
    }

    /// Creates a state around an already built catalog.
    pub fn with_instance(config: AppConfig, instance: Arc<Instance>) -> Self {
        Self {
            config,
            instance,
            pools: None,
        }
    }

    /// Number of open connection pools.
    pub async fn pool_count(&self) -> usize {
        match &self.pools {
            Some(pools) => pools.pool_count().await,
            None => 0,
        }
    }
}
