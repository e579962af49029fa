//! Boundary to the connection layer.
//!
//! The core never talks to the network itself. It builds [`CatalogQuery`]
//! text, reads [`ResultRow`]s back through a [`RowCursor`] and hands DDL to a
//! [`DdlExecutor`]. [`postgres`] provides the sqlx-backed implementations.

pub mod postgres;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::errors::{AppError, AppResult};
use serde_json::Value;

use crate::ddl::PersistAction;
use crate::progress::ProgressMonitor;

/// A prepared catalog statement: SQL text plus positional text parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogQuery {
    sql: String,
    params: Vec<String>,
}

impl CatalogQuery {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Appends raw SQL text.
    pub fn push_sql(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    /// Registers a parameter and returns its `$n` placeholder.
    pub fn push_param(&mut self, value: impl Into<String>) -> String {
        self.params.push(value.into());
        format!("${}", self.params.len())
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }
}

/// One row of a catalog result set, keyed by column label.
///
/// Getters follow the lenient conventions of catalog readers: a missing or
/// NULL value reads as `None`, `0` or `false`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultRow {
    values: HashMap<String, Value>,
}

impl ResultRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    pub fn set(&mut self, column: &str, value: impl Into<Value>) {
        self.values.insert(column.to_string(), value.into());
    }

    pub fn get_string(&self, column: &str) -> Option<String> {
        match self.values.get(column)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    pub fn get_int(&self, column: &str) -> i64 {
        match self.values.get(column) {
            Some(Value::Number(n)) => n.as_i64().unwrap_or_default(),
            Some(Value::String(s)) => s.trim().parse().unwrap_or_default(),
            _ => 0,
        }
    }

    pub fn get_i32(&self, column: &str) -> i32 {
        i32::try_from(self.get_int(column)).unwrap_or_default()
    }

    pub fn get_bool(&self, column: &str) -> bool {
        match self.values.get(column) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => matches!(s.as_str(), "t" | "true" | "TRUE" | "1"),
            Some(Value::Number(n)) => n.as_i64().is_some_and(|v| v != 0),
            _ => false,
        }
    }

    /// Reads a mandatory object identifier.
    ///
    /// # Errors
    /// Returns `AppError::DatabaseQuery` if the column is missing, NULL or
    /// not a valid oid.
    pub fn require_oid(&self, column: &str) -> AppResult<u32> {
        let raw = match self.values.get(column) {
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        };
        raw.and_then(|v| u32::try_from(v).ok()).ok_or_else(|| {
            AppError::DatabaseQuery(format!("malformed result: column `{}` is not an oid", column))
        })
    }

    /// Reads an optional object identifier, treating 0 as absent.
    pub fn get_oid(&self, column: &str) -> Option<u32> {
        u32::try_from(self.get_int(column)).ok().filter(|oid| *oid != 0)
    }
}

/// Forward-only cursor over a result set.
#[async_trait]
pub trait RowCursor: Send {
    /// Returns the next row, or `None` at the end.
    async fn next_row(&mut self) -> AppResult<Option<ResultRow>>;
}

/// Cursor over rows that were already received.
pub struct BufferedCursor {
    rows: std::vec::IntoIter<ResultRow>,
}

impl BufferedCursor {
    pub fn new(rows: Vec<ResultRow>) -> Self {
        Self {
            rows: rows.into_iter(),
        }
    }
}

#[async_trait]
impl RowCursor for BufferedCursor {
    async fn next_row(&mut self) -> AppResult<Option<ResultRow>> {
        Ok(self.rows.next())
    }
}

/// Executes catalog introspection queries.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, query: &CatalogQuery) -> AppResult<Box<dyn RowCursor>>;
}

/// Executes DDL in order, stopping at the first failure.
#[async_trait]
pub trait DdlExecutor: Send + Sync {
    /// # Errors
    /// Returns `AppError::Execution` naming the failing statement and its
    /// index in `actions`. Earlier statements are not undone.
    async fn execute_actions(
        &self,
        actions: &[PersistAction],
        monitor: &dyn ProgressMonitor,
    ) -> AppResult<()>;
}

/// Hands out execution contexts per database.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Executor for `database`, or for the maintenance database when `None`.
    async fn query_executor(&self, database: Option<&str>) -> AppResult<Arc<dyn QueryExecutor>>;

    /// DDL executor bound to `database`.
    async fn ddl_executor(&self, database: &str) -> AppResult<Arc<dyn DdlExecutor>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_are_numbered() {
        let mut query = CatalogQuery::new("SELECT 1 WHERE a = ");
        let p1 = query.push_param("x");
        query.push_sql(&p1).push_sql(" AND b = ");
        let p2 = query.push_param("y");
        query.push_sql(&p2);
        assert_eq!(query.sql(), "SELECT 1 WHERE a = $1 AND b = $2");
        assert_eq!(query.params(), &["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn test_lenient_getters() {
        let row = ResultRow::new()
            .with("name", "public")
            .with("oid", 2200)
            .with("flag", Value::Null)
            .with("text_flag", "t");
        assert_eq!(row.get_string("name").as_deref(), Some("public"));
        assert_eq!(row.get_string("missing"), None);
        assert_eq!(row.get_int("flag"), 0);
        assert!(!row.get_bool("flag"));
        assert!(row.get_bool("text_flag"));
        assert_eq!(row.require_oid("oid").unwrap(), 2200);
        assert!(row.require_oid("name").is_err());
        assert_eq!(row.get_oid("flag"), None);
    }
}
