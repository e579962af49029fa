use std::sync::{Arc, Weak};

use async_trait::async_trait;
use common::errors::AppResult;
use common::models::{DatabaseItem, ObjectKind};
use tracing::Span;

use crate::cache::{CacheOwner, CachedObject, ObjectCache, ObjectLoader};
use crate::progress::ProgressMonitor;
use crate::transport::{CatalogQuery, DdlExecutor, QueryExecutor, ResultRow};

use super::data_type::DataTypeLoader;
use super::schema::SchemaLoader;
use super::{CatalogContext, CatalogNode, CatalogObject, DataType, Instance, Schema, Table, TypeRegistry};

/// A database of the instance, as read from `pg_database`.
pub struct Database {
    self_ref: Weak<Database>,
    instance: Weak<Instance>,
    context: CatalogContext,
    oid: u32,
    name: String,
    owner_id: u32,
    encoding_id: i32,
    collation: String,
    ctype: String,
    is_template: bool,
    allow_connect: bool,
    connection_limit: i32,
    tablespace_id: u32,
    schemas: ObjectCache<Database, Schema>,
    types: ObjectCache<Database, DataType>,
}

impl Database {
    pub fn oid(&self) -> u32 {
        self.oid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_template(&self) -> bool {
        self.is_template
    }

    pub fn allow_connect(&self) -> bool {
        self.allow_connect
    }

    pub fn instance(&self) -> Option<Arc<Instance>> {
        self.instance.upgrade()
    }

    pub async fn schemas(&self, monitor: &dyn ProgressMonitor) -> AppResult<Vec<Arc<Schema>>> {
        self.schemas.get_all_objects(self, monitor).await
    }

    pub async fn schema(&self, name: &str, monitor: &dyn ProgressMonitor) -> AppResult<Arc<Schema>> {
        self.schemas.get_object(self, name, monitor).await
    }

    /// Resolves `schema_name.table_name` for speculative lookups.
    ///
    /// A missing schema is logged and reported as `None`, as is a missing
    /// table. Fetch failures still propagate.
    pub async fn find_table(
        &self,
        schema_name: &str,
        table_name: &str,
        monitor: &dyn ProgressMonitor,
    ) -> AppResult<Option<Arc<Table>>> {
        if schema_name.is_empty() {
            return Ok(None);
        }
        let Some(schema) = self.schemas.find_object(self, schema_name, monitor).await? else {
            tracing::error!(parent: self.context.span(), database = %self.name, "Schema {} not found", schema_name);
            return Ok(None);
        };
        schema.find_table(table_name, monitor).await
    }

    /// Snapshot of the database's types, loading them on first use.
    pub async fn type_registry(&self, monitor: &dyn ProgressMonitor) -> AppResult<TypeRegistry> {
        Ok(TypeRegistry::new(self.types.get_all_objects(self, monitor).await?))
    }

    /// Executor for DDL against this database.
    pub async fn ddl_executor(&self) -> AppResult<Arc<dyn DdlExecutor>> {
        self.context.provider().ddl_executor(&self.name).await
    }

    /// Drops schemas and types; they are fetched again on next access.
    pub async fn invalidate(&self) {
        self.schemas.invalidate(self).await;
        self.types.invalidate(self).await;
    }

    pub fn to_item(&self) -> DatabaseItem {
        DatabaseItem {
            oid: self.oid,
            name: self.name.clone(),
            owner_id: self.owner_id,
            encoding_id: self.encoding_id,
            collation: self.collation.clone(),
            ctype: self.ctype.clone(),
            is_template: self.is_template,
            allow_connect: self.allow_connect,
            connection_limit: self.connection_limit,
            tablespace_id: self.tablespace_id,
        }
    }

    pub(super) fn context(&self) -> &CatalogContext {
        &self.context
    }

    pub(super) fn downgrade(&self) -> Weak<Database> {
        self.self_ref.clone()
    }
}

impl CachedObject for Database {
    fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl CacheOwner for Database {
    fn owner_label(&self) -> String {
        format!("database {}", self.name)
    }

    fn span(&self) -> &Span {
        self.context.span()
    }

    async fn query_executor(&self) -> AppResult<Arc<dyn QueryExecutor>> {
        self.context.provider().query_executor(Some(&self.name)).await
    }
}

#[async_trait]
impl CatalogObject for Database {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ObjectKind {
        ObjectKind::Database
    }

    fn parent(&self) -> Option<CatalogNode> {
        self.instance().map(CatalogNode::Instance)
    }

    fn child_kind(&self) -> Option<ObjectKind> {
        Some(ObjectKind::Schema)
    }

    async fn children(&self, monitor: &dyn ProgressMonitor) -> AppResult<Vec<CatalogNode>> {
        Ok(self.schemas(monitor).await?.into_iter().map(CatalogNode::Schema).collect())
    }

    async fn child(&self, name: &str, monitor: &dyn ProgressMonitor) -> AppResult<CatalogNode> {
        self.schema(name, monitor).await.map(CatalogNode::Schema)
    }
}

pub(super) struct DatabaseLoader;

impl ObjectLoader<Instance, Database> for DatabaseLoader {
    fn prepare_query(&self, instance: &Instance) -> AppResult<CatalogQuery> {
        let mut query = CatalogQuery::new(
            "SELECT d.oid::int8 AS oid, d.datname::text AS datname, d.datdba::int8 AS datdba, \
             d.encoding AS encoding, d.datcollate::text AS datcollate, d.datctype::text AS datctype, \
             d.datistemplate AS datistemplate, d.datallowconn AS datallowconn, \
             d.datconnlimit AS datconnlimit, d.dattablespace::int8 AS dattablespace \
             FROM pg_catalog.pg_database d",
        );
        let context = instance.context();
        let mut has_where = false;
        if !context.show_system_objects() {
            query.push_sql(" WHERE NOT d.datistemplate");
            has_where = true;
        }
        if let Some(filter) = context.filter(ObjectKind::Database) {
            filter.append_sql_condition(&mut query, "d.datname", has_where);
        }
        query.push_sql(" ORDER BY d.datname");
        Ok(query)
    }

    fn fetch_object(&self, instance: &Instance, row: &ResultRow) -> AppResult<Option<Arc<Database>>> {
        let Some(name) = row.get_string("datname") else {
            return Ok(None);
        };
        let context = instance.context();
        let is_template = row.get_bool("datistemplate");
        if is_template && !context.show_system_objects() {
            return Ok(None);
        }
        if let Some(filter) = context.filter(ObjectKind::Database) {
            if !filter.matches(&name) {
                return Ok(None);
            }
        }
        let oid = row.require_oid("oid")?;

        Ok(Some(Arc::new_cyclic(|self_ref| Database {
            self_ref: self_ref.clone(),
            instance: instance.downgrade(),
            context: context.clone(),
            oid,
            name,
            owner_id: row.get_oid("datdba").unwrap_or_default(),
            encoding_id: row.get_i32("encoding"),
            collation: row.get_string("datcollate").unwrap_or_default(),
            ctype: row.get_string("datctype").unwrap_or_default(),
            is_template,
            allow_connect: row.get_bool("datallowconn"),
            connection_limit: row.get_i32("datconnlimit"),
            tablespace_id: row.get_oid("dattablespace").unwrap_or_default(),
            schemas: ObjectCache::new(SchemaLoader),
            types: ObjectCache::new(DataTypeLoader),
        })))
    }
}
