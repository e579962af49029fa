use std::sync::{Arc, Weak};

use async_trait::async_trait;
use common::errors::AppResult;
use common::models::{ObjectKind, SchemaItem};
use tracing::Span;

use crate::cache::{CacheOwner, CachedObject, ObjectCache, ObjectLoader};
use crate::progress::ProgressMonitor;
use crate::transport::{CatalogQuery, QueryExecutor, ResultRow};

use super::table::TableLoader;
use super::{CatalogContext, CatalogNode, CatalogObject, Database, Table};

/// Prefixes of per-backend internal schemas. Never materialized.
const INTERNAL_PREFIXES: &[&str] = &["pg_toast", "pg_temp"];

/// Catalog schemas, shown only with system objects enabled.
const SYSTEM_SCHEMAS: &[&str] = &["pg_catalog", "information_schema"];

/// True for schemas that are skipped whatever the filter says.
pub fn is_internal_schema(name: &str) -> bool {
    INTERNAL_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

pub fn is_system_schema(name: &str) -> bool {
    SYSTEM_SCHEMAS.contains(&name)
}

/// A namespace of a database.
pub struct Schema {
    self_ref: Weak<Schema>,
    database: Weak<Database>,
    context: CatalogContext,
    database_name: String,
    oid: u32,
    name: String,
    owner_id: u32,
    tables: ObjectCache<Schema, Table>,
}

impl Schema {
    pub fn oid(&self) -> u32 {
        self.oid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    pub fn is_system(&self) -> bool {
        is_system_schema(&self.name)
    }

    pub fn database(&self) -> Option<Arc<Database>> {
        self.database.upgrade()
    }

    pub async fn tables(&self, monitor: &dyn ProgressMonitor) -> AppResult<Vec<Arc<Table>>> {
        self.tables.get_all_objects(self, monitor).await
    }

    pub async fn table(&self, name: &str, monitor: &dyn ProgressMonitor) -> AppResult<Arc<Table>> {
        self.tables.get_object(self, name, monitor).await
    }

    pub async fn find_table(
        &self,
        name: &str,
        monitor: &dyn ProgressMonitor,
    ) -> AppResult<Option<Arc<Table>>> {
        self.tables.find_object(self, name, monitor).await
    }

    /// Drops cached tables, and with them their columns.
    pub async fn invalidate(&self) {
        self.tables.invalidate(self).await;
    }

    pub fn to_item(&self) -> SchemaItem {
        SchemaItem {
            oid: self.oid,
            name: self.name.clone(),
            owner_id: self.owner_id,
            is_system: self.is_system(),
        }
    }

    pub(super) fn context(&self) -> &CatalogContext {
        &self.context
    }

    pub(super) fn downgrade(&self) -> Weak<Schema> {
        self.self_ref.clone()
    }
}

impl CachedObject for Schema {
    fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl CacheOwner for Schema {
    fn owner_label(&self) -> String {
        format!("schema {}", self.name)
    }

    fn span(&self) -> &Span {
        self.context.span()
    }

    async fn query_executor(&self) -> AppResult<Arc<dyn QueryExecutor>> {
        self.context.provider().query_executor(Some(&self.database_name)).await
    }
}

#[async_trait]
impl CatalogObject for Schema {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ObjectKind {
        ObjectKind::Schema
    }

    fn parent(&self) -> Option<CatalogNode> {
        self.database().map(CatalogNode::Database)
    }

    fn child_kind(&self) -> Option<ObjectKind> {
        Some(ObjectKind::Table)
    }

    async fn children(&self, monitor: &dyn ProgressMonitor) -> AppResult<Vec<CatalogNode>> {
        Ok(self.tables(monitor).await?.into_iter().map(CatalogNode::Table).collect())
    }

    async fn child(&self, name: &str, monitor: &dyn ProgressMonitor) -> AppResult<CatalogNode> {
        self.table(name, monitor).await.map(CatalogNode::Table)
    }
}

pub(super) struct SchemaLoader;

impl ObjectLoader<Database, Schema> for SchemaLoader {
    fn prepare_query(&self, database: &Database) -> AppResult<CatalogQuery> {
        let mut query = CatalogQuery::new(
            "SELECT n.oid::int8 AS oid, n.nspname::text AS nspname, n.nspowner::int8 AS nspowner \
             FROM pg_catalog.pg_namespace n",
        );
        if let Some(filter) = database.context().filter(ObjectKind::Schema) {
            filter.append_sql_condition(&mut query, "n.nspname", false);
        }
        query.push_sql(" ORDER BY n.nspname");
        Ok(query)
    }

    fn fetch_object(&self, database: &Database, row: &ResultRow) -> AppResult<Option<Arc<Schema>>> {
        let Some(name) = row.get_string("nspname") else {
            return Ok(None);
        };
        if is_internal_schema(&name) {
            return Ok(None);
        }
        let context = database.context();
        if is_system_schema(&name) && !context.show_system_objects() {
            return Ok(None);
        }
        if let Some(filter) = context.filter(ObjectKind::Schema) {
            if !filter.matches(&name) {
                return Ok(None);
            }
        }
        let oid = row.require_oid("oid")?;

        Ok(Some(Arc::new_cyclic(|self_ref| Schema {
            self_ref: self_ref.clone(),
            database: database.downgrade(),
            context: context.clone(),
            database_name: database.name().to_string(),
            oid,
            name,
            owner_id: row.get_oid("nspowner").unwrap_or_default(),
            tables: ObjectCache::new(TableLoader),
        })))
    }
}
