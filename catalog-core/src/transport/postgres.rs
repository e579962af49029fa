//! sqlx-backed PostgreSQL collaborators.
//!
//! A PostgreSQL connection is bound to one database, so the provider keeps a
//! pool per database name and opens it on first use.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::config::AppConfig;
use common::errors::{AppError, AppResult};
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{Column, PgPool, Row, TypeInfo};
use tokio::sync::RwLock;

use super::{BufferedCursor, CatalogQuery, ConnectionProvider, DdlExecutor, QueryExecutor, ResultRow, RowCursor};
use crate::ddl::PersistAction;
use crate::progress::ProgressMonitor;

/// Opens and caches one pool per database.
pub struct PgConnectionProvider {
    config: AppConfig,
    options: PgConnectOptions,
    /// Database used when no specific database is requested.
    maintenance_database: String,
    pools: RwLock<HashMap<String, PgPool>>,
}

impl PgConnectionProvider {
    /// Creates a provider from `config.database_url`. No connection is opened
    /// until the first query.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| AppError::Config("DATABASE_URL is not set".into()))?;
        let options = PgConnectOptions::from_str(url)
            .map_err(|e| AppError::Config(format!("Invalid DATABASE_URL: {}", e)))?;
        let maintenance_database = options
            .get_database()
            .unwrap_or("postgres")
            .to_string();

        Ok(Self {
            config,
            options,
            maintenance_database,
            pools: RwLock::new(HashMap::new()),
        })
    }

    /// Name of the database used for instance-level queries.
    pub fn maintenance_database(&self) -> &str {
        &self.maintenance_database
    }

    /// `host:port` of the server, used to name the catalog instance.
    pub fn server_label(&self) -> String {
        format!("{}:{}", self.options.get_host(), self.options.get_port())
    }

    /// Number of open pools.
    pub async fn pool_count(&self) -> usize {
        self.pools.read().await.len()
    }

    /// Closes and forgets every pool.
    pub async fn close_all(&self) {
        let pools: Vec<PgPool> = self.pools.write().await.drain().map(|(_, p)| p).collect();
        for pool in pools {
            pool.close().await;
        }
    }

    async fn pool_for(&self, database: &str) -> AppResult<PgPool> {
        if let Some(pool) = self.pools.read().await.get(database) {
            return Ok(pool.clone());
        }

        let pool = PgPoolOptions::new()
            .max_connections(self.config.max_connections)
            .acquire_timeout(Duration::from_secs(self.config.connect_timeout_secs))
            .connect_with(self.options.clone().database(database))
            .await
            .map_err(|e| AppError::DatabaseConnection(format!("{}: {}", database, e)))?;

        // Another caller may have connected while we were waiting.
        let mut pools = self.pools.write().await;
        let pool = pools.entry(database.to_string()).or_insert(pool).clone();
        tracing::info!(database = %database, "Connection pool opened");
        Ok(pool)
    }
}

#[async_trait]
impl ConnectionProvider for PgConnectionProvider {
    async fn query_executor(&self, database: Option<&str>) -> AppResult<Arc<dyn QueryExecutor>> {
        let database = database.unwrap_or(&self.maintenance_database);
        let pool = self.pool_for(database).await?;
        Ok(Arc::new(PgQueryExecutor::new(pool)))
    }

    async fn ddl_executor(&self, database: &str) -> AppResult<Arc<dyn DdlExecutor>> {
        let pool = self.pool_for(database).await?;
        Ok(Arc::new(PgDdlExecutor::new(pool)))
    }
}

/// Runs catalog queries on a pool.
pub struct PgQueryExecutor {
    pool: PgPool,
}

impl PgQueryExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueryExecutor for PgQueryExecutor {
    async fn execute(&self, query: &CatalogQuery) -> AppResult<Box<dyn RowCursor>> {
        let mut statement = sqlx::query(query.sql());
        for param in query.params() {
            statement = statement.bind(param.as_str());
        }
        let rows = statement
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseQuery(e.to_string()))?;

        let rows = rows.iter().map(decode_row).collect::<AppResult<Vec<_>>>()?;
        Ok(Box::new(BufferedCursor::new(rows)))
    }
}

/// Converts a driver row into a [`ResultRow`] by column type.
fn decode_row(row: &PgRow) -> AppResult<ResultRow> {
    let mut result = ResultRow::new();
    for (index, column) in row.columns().iter().enumerate() {
        let value = match column.type_info().name() {
            "BOOL" => row.try_get::<Option<bool>, _>(index).map(|v| v.map(Value::from)),
            "INT2" => row.try_get::<Option<i16>, _>(index).map(|v| v.map(Value::from)),
            "INT4" => row.try_get::<Option<i32>, _>(index).map(|v| v.map(Value::from)),
            "INT8" => row.try_get::<Option<i64>, _>(index).map(|v| v.map(Value::from)),
            _ => row.try_get::<Option<String>, _>(index).map(|v| v.map(Value::from)),
        }
        .map_err(|e| {
            AppError::DatabaseQuery(format!("malformed result in column `{}`: {}", column.name(), e))
        })?;
        result.set(column.name(), value.unwrap_or(Value::Null));
    }
    Ok(result)
}

/// Executes DDL statements one by one on a pool.
pub struct PgDdlExecutor {
    pool: PgPool,
}

impl PgDdlExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DdlExecutor for PgDdlExecutor {
    async fn execute_actions(
        &self,
        actions: &[PersistAction],
        monitor: &dyn ProgressMonitor,
    ) -> AppResult<()> {
        for (index, action) in actions.iter().enumerate() {
            if monitor.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            monitor.begin_task(&action.description);
            tracing::info!(index, description = %action.description, sql = %action.sql, "Executing DDL");

            sqlx::query(&action.sql)
                .execute(&self.pool)
                .await
                .map_err(|e| AppError::Execution {
                    index,
                    statement: action.sql.clone(),
                    message: e.to_string(),
                })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: Option<&str>) -> AppConfig {
        AppConfig {
            database_url: url.map(String::from),
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_url_is_a_config_error() {
        let err = PgConnectionProvider::new(config(None)).err().unwrap();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_maintenance_database_from_url() {
        let provider =
            PgConnectionProvider::new(config(Some("postgres://u:p@localhost:5432/appdb"))).unwrap();
        assert_eq!(provider.maintenance_database(), "appdb");
    }

    #[tokio::test]
    async fn test_no_pools_before_first_query() {
        let provider =
            PgConnectionProvider::new(config(Some("postgres://u:p@localhost/postgres"))).unwrap();
        assert_eq!(provider.pool_count().await, 0);
    }
}
