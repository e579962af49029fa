use std::sync::{Arc, Weak};

use async_trait::async_trait;
use common::errors::AppResult;
use common::models::{ObjectKind, TableItem};
use tracing::Span;

use crate::cache::{CacheOwner, CachedObject, ObjectCache, ObjectLoader};
use crate::ddl::TableRef;
use crate::progress::ProgressMonitor;
use crate::transport::{CatalogQuery, QueryExecutor, ResultRow};

use super::column::ColumnLoader;
use super::{CatalogContext, CatalogNode, CatalogObject, Schema, TableColumn};

/// Ordinary or partitioned table.
pub struct Table {
    self_ref: Weak<Table>,
    schema: Weak<Schema>,
    context: CatalogContext,
    database_name: String,
    schema_name: String,
    oid: u32,
    name: String,
    /// `r` or `p`.
    relkind: String,
    description: Option<String>,
    columns: ObjectCache<Table, TableColumn>,
}

impl Table {
    pub fn oid(&self) -> u32 {
        self.oid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    pub fn is_partitioned(&self) -> bool {
        self.relkind == "p"
    }

    pub fn schema(&self) -> Option<Arc<Schema>> {
        self.schema.upgrade()
    }

    pub fn table_ref(&self) -> TableRef {
        TableRef::new(&self.schema_name, &self.name)
    }

    pub async fn columns(&self, monitor: &dyn ProgressMonitor) -> AppResult<Vec<Arc<TableColumn>>> {
        self.columns.get_all_objects(self, monitor).await
    }

    pub async fn column(&self, name: &str, monitor: &dyn ProgressMonitor) -> AppResult<Arc<TableColumn>> {
        self.columns.get_object(self, name, monitor).await
    }

    pub async fn find_column(
        &self,
        name: &str,
        monitor: &dyn ProgressMonitor,
    ) -> AppResult<Option<Arc<TableColumn>>> {
        self.columns.find_object(self, name, monitor).await
    }

    /// Drops the cached columns so the next read sees the server state.
    pub async fn invalidate_columns(&self) {
        self.columns.invalidate(self).await;
    }

    pub fn to_item(&self) -> TableItem {
        TableItem {
            oid: self.oid,
            schema: self.schema_name.clone(),
            name: self.name.clone(),
            kind: self.relkind.clone(),
            description: self.description.clone(),
        }
    }

    pub(super) fn downgrade(&self) -> Weak<Table> {
        self.self_ref.clone()
    }
}

impl CachedObject for Table {
    fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl CacheOwner for Table {
    fn owner_label(&self) -> String {
        format!("table {}.{}", self.schema_name, self.name)
    }

    fn span(&self) -> &Span {
        self.context.span()
    }

    async fn query_executor(&self) -> AppResult<Arc<dyn QueryExecutor>> {
        self.context.provider().query_executor(Some(&self.database_name)).await
    }
}

#[async_trait]
impl CatalogObject for Table {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ObjectKind {
        ObjectKind::Table
    }

    fn parent(&self) -> Option<CatalogNode> {
        self.schema().map(CatalogNode::Schema)
    }

    fn child_kind(&self) -> Option<ObjectKind> {
        Some(ObjectKind::Column)
    }

    async fn children(&self, monitor: &dyn ProgressMonitor) -> AppResult<Vec<CatalogNode>> {
        Ok(self.columns(monitor).await?.into_iter().map(CatalogNode::Column).collect())
    }

    async fn child(&self, name: &str, monitor: &dyn ProgressMonitor) -> AppResult<CatalogNode> {
        self.column(name, monitor).await.map(CatalogNode::Column)
    }
}

pub(super) struct TableLoader;

impl ObjectLoader<Schema, Table> for TableLoader {
    fn prepare_query(&self, schema: &Schema) -> AppResult<CatalogQuery> {
        let mut query = CatalogQuery::new(
            "SELECT c.oid::int8 AS oid, c.relname::text AS relname, c.relkind::text AS relkind, \
             pg_catalog.obj_description(c.oid, 'pg_class') AS description \
             FROM pg_catalog.pg_class c \
             JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace \
             WHERE c.relkind IN ('r', 'p') AND n.nspname = ",
        );
        let param = query.push_param(schema.name());
        query.push_sql(&param);
        if let Some(filter) = schema.context().filter(ObjectKind::Table) {
            filter.append_sql_condition(&mut query, "c.relname", true);
        }
        query.push_sql(" ORDER BY c.relname");
        Ok(query)
    }

    fn fetch_object(&self, schema: &Schema, row: &ResultRow) -> AppResult<Option<Arc<Table>>> {
        let Some(name) = row.get_string("relname") else {
            return Ok(None);
        };
        if let Some(filter) = schema.context().filter(ObjectKind::Table) {
            if !filter.matches(&name) {
                return Ok(None);
            }
        }
        let oid = row.require_oid("oid")?;

        Ok(Some(Arc::new_cyclic(|self_ref| Table {
            self_ref: self_ref.clone(),
            schema: schema.downgrade(),
            context: schema.context().clone(),
            database_name: schema.database_name().to_string(),
            schema_name: schema.name().to_string(),
            oid,
            name,
            relkind: row.get_string("relkind").unwrap_or_else(|| "r".to_string()),
            description: row.get_string("description"),
            columns: ObjectCache::new(ColumnLoader),
        })))
    }
}
