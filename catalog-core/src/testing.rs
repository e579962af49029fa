//! In-memory collaborators for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::config::FilterConfig;
use common::errors::{AppError, AppResult};

use crate::ddl::PersistAction;
use crate::model::{DataKind, DataType, Instance};
use crate::progress::ProgressMonitor;
use crate::transport::{
    BufferedCursor, CatalogQuery, ConnectionProvider, DdlExecutor, QueryExecutor, ResultRow, RowCursor,
};

pub const INT4_OID: u32 = 23;
pub const TEXT_OID: u32 = 25;
pub const INT4_ARRAY_OID: u32 = 1007;
pub const VARCHAR_ARRAY_OID: u32 = 1015;

/// Answers queries with canned rows, picked by a fragment of the SQL text.
#[derive(Default)]
pub struct ScriptedExecutor {
    /// Checked newest first.
    routes: Mutex<Vec<(String, Vec<ResultRow>)>>,
    default_rows: Mutex<Vec<ResultRow>>,
    failure: Mutex<Option<String>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    queries: Mutex<Vec<CatalogQuery>>,
}

impl ScriptedExecutor {
    pub fn with_rows(rows: Vec<ResultRow>) -> Self {
        Self {
            default_rows: Mutex::new(rows),
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Answers queries containing `fragment` with `rows`.
    pub fn route(&self, fragment: &str, rows: Vec<ResultRow>) {
        self.routes.lock().unwrap().push((fragment.to_string(), rows));
    }

    pub fn set_rows(&self, rows: Vec<ResultRow>) {
        *self.default_rows.lock().unwrap() = rows;
    }

    /// Makes the next query fail with `message`.
    pub fn fail_next(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<CatalogQuery> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryExecutor for ScriptedExecutor {
    async fn execute(&self, query: &CatalogQuery) -> AppResult<Box<dyn RowCursor>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = self.failure.lock().unwrap().take() {
            return Err(AppError::DatabaseQuery(message));
        }
        let routed = self
            .routes
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(fragment, _)| query.sql().contains(fragment.as_str()))
            .map(|(_, rows)| rows.clone());
        let rows = routed.unwrap_or_else(|| self.default_rows.lock().unwrap().clone());
        Ok(Box::new(BufferedCursor::new(rows)))
    }
}

/// Records DDL batches; can fail on a statement fragment.
#[derive(Default)]
pub struct RecordingDdlExecutor {
    batches: Mutex<Vec<Vec<PersistAction>>>,
    fail_on: Mutex<Option<String>>,
}

impl RecordingDdlExecutor {
    /// Batches that executed completely.
    pub fn batches(&self) -> Vec<Vec<PersistAction>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn fail_on(&self, fragment: &str) {
        *self.fail_on.lock().unwrap() = Some(fragment.to_string());
    }

    pub fn clear_failure(&self) {
        *self.fail_on.lock().unwrap() = None;
    }
}

#[async_trait]
impl DdlExecutor for RecordingDdlExecutor {
    async fn execute_actions(
        &self,
        actions: &[PersistAction],
        monitor: &dyn ProgressMonitor,
    ) -> AppResult<()> {
        let fail_on = self.fail_on.lock().unwrap().clone();
        for (index, action) in actions.iter().enumerate() {
            if monitor.is_cancelled() {
                return Err(AppError::Cancelled);
            }
            if let Some(fragment) = &fail_on {
                if action.sql.contains(fragment.as_str()) {
                    return Err(AppError::Execution {
                        index,
                        statement: action.sql.clone(),
                        message: "simulated failure".into(),
                    });
                }
            }
        }
        self.batches.lock().unwrap().push(actions.to_vec());
        Ok(())
    }
}

/// Hands out the same scripted executors for every database.
pub struct StaticProvider {
    pub executor: Arc<ScriptedExecutor>,
    pub ddl: Arc<RecordingDdlExecutor>,
}

#[async_trait]
impl ConnectionProvider for StaticProvider {
    async fn query_executor(&self, _database: Option<&str>) -> AppResult<Arc<dyn QueryExecutor>> {
        Ok(self.executor.clone())
    }

    async fn ddl_executor(&self, _database: &str) -> AppResult<Arc<dyn DdlExecutor>> {
        Ok(self.ddl.clone())
    }
}

pub fn database_row(oid: u32, name: &str, is_template: bool) -> ResultRow {
    ResultRow::new()
        .with("oid", oid)
        .with("datname", name)
        .with("datdba", 10)
        .with("encoding", 6)
        .with("datcollate", "en_US.UTF-8")
        .with("datctype", "en_US.UTF-8")
        .with("datistemplate", is_template)
        .with("datallowconn", !is_template)
        .with("datconnlimit", -1)
        .with("dattablespace", 1663)
}

pub fn schema_row(oid: u32, name: &str) -> ResultRow {
    ResultRow::new().with("oid", oid).with("nspname", name).with("nspowner", 10)
}

pub fn table_row(oid: u32, name: &str) -> ResultRow {
    ResultRow::new().with("oid", oid).with("relname", name).with("relkind", "r")
}

pub fn column_row(
    name: &str,
    position: i32,
    type_oid: u32,
    typmod: i32,
    not_null: bool,
    default: Option<&str>,
) -> ResultRow {
    let row = ResultRow::new()
        .with("attname", name)
        .with("attnum", position)
        .with("atttypid", type_oid)
        .with("atttypmod", typmod)
        .with("attnotnull", not_null);
    match default {
        Some(default) => row.with("default_value", default),
        None => row,
    }
}

fn data_type(oid: u32, name: &str, kind: DataKind, element_oid: Option<u32>) -> Arc<DataType> {
    Arc::new(DataType {
        oid,
        name: name.to_string(),
        schema: "pg_catalog".to_string(),
        kind,
        element_oid,
    })
}

/// A slice of `pg_type` large enough for DDL tests.
pub fn builtin_types() -> Vec<Arc<DataType>> {
    vec![
        data_type(16, "bool", DataKind::Boolean, None),
        data_type(20, "int8", DataKind::Numeric, None),
        data_type(INT4_OID, "int4", DataKind::Numeric, None),
        data_type(TEXT_OID, "text", DataKind::String, None),
        data_type(1042, "bpchar", DataKind::String, None),
        data_type(1043, "varchar", DataKind::String, None),
        data_type(1114, "timestamp", DataKind::DateTime, None),
        data_type(1700, "numeric", DataKind::Numeric, None),
        data_type(INT4_ARRAY_OID, "_int4", DataKind::Array, Some(INT4_OID)),
        data_type(VARCHAR_ARRAY_OID, "_varchar", DataKind::Array, Some(1043)),
        data_type(1231, "_numeric", DataKind::Array, Some(1700)),
    ]
}

fn type_row(data_type: &DataType) -> ResultRow {
    let category = match data_type.kind {
        DataKind::String => "S",
        DataKind::Numeric => "N",
        DataKind::Boolean => "B",
        DataKind::DateTime => "D",
        DataKind::Array => "A",
        DataKind::Other => "U",
    };
    ResultRow::new()
        .with("oid", data_type.oid)
        .with("typname", data_type.name.as_str())
        .with("nspname", data_type.schema.as_str())
        .with("typcategory", category)
        .with("typelem", data_type.element_oid.unwrap_or_default())
}

pub struct Fixture {
    pub instance: Arc<Instance>,
    pub executor: Arc<ScriptedExecutor>,
    pub ddl: Arc<RecordingDdlExecutor>,
}

/// Instance with databases `appdb`, `postgres` and `template1`; schemas
/// including internal ones; tables `orders` and `customers`; and columns
/// `id int4`, `title varchar(50)`, `amount numeric(10,2)` for every table.
pub fn catalog_fixture(filters: FilterConfig) -> Fixture {
    let executor = Arc::new(ScriptedExecutor::default());
    executor.route(
        "pg_database",
        vec![
            database_row(16384, "appdb", false),
            database_row(5, "postgres", false),
            database_row(1, "template1", true),
        ],
    );
    executor.route(
        "pg_namespace n",
        vec![
            schema_row(11, "pg_catalog"),
            schema_row(13000, "information_schema"),
            schema_row(99, "pg_toast"),
            schema_row(12001, "pg_toast_temp_1"),
            schema_row(12002, "pg_temp_1"),
            schema_row(2200, "public"),
            schema_row(16400, "sales"),
        ],
    );
    executor.route("pg_type", builtin_types().iter().map(|t| type_row(t)).collect());
    executor.route(
        "pg_class c",
        vec![table_row(16500, "orders"), table_row(16510, "customers")],
    );
    executor.route(
        "pg_attribute",
        vec![
            column_row("id", 1, INT4_OID, -1, true, Some("nextval('orders_id_seq'::regclass)")),
            column_row("title", 2, 1043, 54, false, None),
            column_row("amount", 3, 1700, ((10 << 16) | 2) + 4, false, None),
        ],
    );

    let ddl = Arc::new(RecordingDdlExecutor::default());
    let provider = Arc::new(StaticProvider {
        executor: executor.clone(),
        ddl: ddl.clone(),
    });
    let instance = Instance::new("test", provider, Arc::new(filters));
    Fixture {
        instance,
        executor,
        ddl,
    }
}
