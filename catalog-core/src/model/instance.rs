use std::sync::{Arc, Weak};

use async_trait::async_trait;
use common::errors::AppResult;
use common::models::ObjectKind;
use tracing::Span;

use crate::cache::{CacheOwner, ObjectCache};
use crate::filter::FilterSource;
use crate::progress::ProgressMonitor;
use crate::transport::{ConnectionProvider, QueryExecutor};

use super::database::DatabaseLoader;
use super::{CatalogContext, CatalogNode, CatalogObject, Database};

/// Root of the catalog: one PostgreSQL server.
pub struct Instance {
    self_ref: Weak<Instance>,
    name: String,
    context: CatalogContext,
    databases: ObjectCache<Instance, Database>,
}

impl Instance {
    pub fn new(
        name: impl Into<String>,
        provider: Arc<dyn ConnectionProvider>,
        filters: Arc<dyn FilterSource>,
    ) -> Arc<Self> {
        let name = name.into();
        let context = CatalogContext::new(&name, provider, filters);
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            name,
            context,
            databases: ObjectCache::new(DatabaseLoader),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn databases(&self, monitor: &dyn ProgressMonitor) -> AppResult<Vec<Arc<Database>>> {
        self.databases.get_all_objects(self, monitor).await
    }

    pub async fn database(&self, name: &str, monitor: &dyn ProgressMonitor) -> AppResult<Arc<Database>> {
        self.databases.get_object(self, name, monitor).await
    }

    /// Discards every cached object. Databases still referenced elsewhere
    /// keep their own caches but are no longer reachable from the instance.
    pub async fn invalidate_all(&self) {
        if let Some(databases) = self.databases.cached_objects().await {
            for database in databases {
                database.invalidate().await;
            }
        }
        self.databases.invalidate(self).await;
        tracing::info!(parent: self.context.span(), instance = %self.name, "Catalog invalidated");
    }

    pub(super) fn context(&self) -> &CatalogContext {
        &self.context
    }

    pub(super) fn downgrade(&self) -> Weak<Instance> {
        self.self_ref.clone()
    }
}

#[async_trait]
impl CacheOwner for Instance {
    fn owner_label(&self) -> String {
        format!("instance {}", self.name)
    }

    fn span(&self) -> &Span {
        self.context.span()
    }

    async fn query_executor(&self) -> AppResult<Arc<dyn QueryExecutor>> {
        self.context.provider().query_executor(None).await
    }
}

#[async_trait]
impl CatalogObject for Instance {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ObjectKind {
        ObjectKind::Instance
    }

    fn parent(&self) -> Option<CatalogNode> {
        None
    }

    fn child_kind(&self) -> Option<ObjectKind> {
        Some(ObjectKind::Database)
    }

    async fn children(&self, monitor: &dyn ProgressMonitor) -> AppResult<Vec<CatalogNode>> {
        Ok(self.databases(monitor).await?.into_iter().map(CatalogNode::Database).collect())
    }

    async fn child(&self, name: &str, monitor: &dyn ProgressMonitor) -> AppResult<CatalogNode> {
        self.database(name, monitor).await.map(CatalogNode::Database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NullMonitor;
    use crate::testing::{catalog_fixture, Fixture};
    use common::config::{FilterConfig, ObjectFilterConfig};

    #[tokio::test]
    async fn test_navigation_down_and_up() {
        let Fixture { instance, .. } = catalog_fixture(FilterConfig::default());

        let database = instance.database("appdb", &NullMonitor).await.unwrap();
        let schema = database.schema("public", &NullMonitor).await.unwrap();
        let table = schema.table("orders", &NullMonitor).await.unwrap();
        let columns = table.columns(&NullMonitor).await.unwrap();
        let names: Vec<&str> = columns.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["id", "title", "amount"]);

        let parent = columns[0].parent().unwrap();
        assert_eq!(parent.kind(), ObjectKind::Table);
        assert_eq!(parent.name(), "orders");
        assert_eq!(table.parent().unwrap().name(), "public");
        assert_eq!(schema.parent().unwrap().name(), "appdb");
        assert_eq!(database.parent().unwrap().kind(), ObjectKind::Instance);
        assert!(instance.parent().is_none());
        assert_eq!(table.child_kind(), Some(ObjectKind::Column));
        assert_eq!(columns[0].child_kind(), None);
    }

    #[tokio::test]
    async fn test_templates_hidden_without_system_objects() {
        let Fixture { instance, .. } = catalog_fixture(FilterConfig::default());
        let names: Vec<String> = instance
            .databases(&NullMonitor)
            .await
            .unwrap()
            .iter()
            .map(|d| d.name().to_string())
            .collect();
        assert_eq!(names, vec!["appdb", "postgres"]);

        let with_system = catalog_fixture(FilterConfig {
            show_system_objects: true,
            ..Default::default()
        });
        let count = with_system.instance.databases(&NullMonitor).await.unwrap().len();
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn test_internal_schemas_never_materialized() {
        let filters = FilterConfig {
            show_system_objects: true,
            schema: ObjectFilterConfig {
                include: Some("pg_*,public".into()),
                exclude: None,
            },
            ..Default::default()
        };
        let fixture = catalog_fixture(filters);
        let database = fixture.instance.database("appdb", &NullMonitor).await.unwrap();
        let names: Vec<String> = database
            .schemas(&NullMonitor)
            .await
            .unwrap()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, vec!["pg_catalog", "public"]);
        let err = database.schema("pg_toast_temp_1", &NullMonitor).await.err().unwrap();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_system_schemas_need_flag() {
        let Fixture { instance, .. } = catalog_fixture(FilterConfig::default());
        let database = instance.database("appdb", &NullMonitor).await.unwrap();
        let names: Vec<String> = database
            .schemas(&NullMonitor)
            .await
            .unwrap()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, vec!["public", "sales"]);
    }

    #[tokio::test]
    async fn test_schema_filter_is_pushed_down() {
        let filters = FilterConfig {
            schema: ObjectFilterConfig {
                include: Some("sal*".into()),
                exclude: None,
            },
            ..Default::default()
        };
        let fixture = catalog_fixture(filters);
        let database = fixture.instance.database("appdb", &NullMonitor).await.unwrap();
        let names: Vec<String> = database
            .schemas(&NullMonitor)
            .await
            .unwrap()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, vec!["sales"]);

        let query = fixture
            .executor
            .queries()
            .into_iter()
            .find(|q| q.sql().contains("pg_namespace n WHERE"))
            .unwrap();
        assert!(query.sql().contains("n.nspname ILIKE $1"));
        assert_eq!(query.params(), &["sal%".to_string()]);
    }

    #[tokio::test]
    async fn test_find_table_is_soft() {
        let Fixture { instance, .. } = catalog_fixture(FilterConfig::default());
        let database = instance.database("appdb", &NullMonitor).await.unwrap();

        assert!(database.find_table("public", "orders", &NullMonitor).await.unwrap().is_some());
        assert!(database.find_table("missing", "orders", &NullMonitor).await.unwrap().is_none());
        assert!(database.find_table("public", "missing", &NullMonitor).await.unwrap().is_none());
        assert!(database.find_table("", "orders", &NullMonitor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_table_propagates_fetch_errors() {
        let fixture = catalog_fixture(FilterConfig::default());
        let database = fixture.instance.database("appdb", &NullMonitor).await.unwrap();
        fixture.executor.fail_next("server closed the connection");
        let err = database.find_table("public", "orders", &NullMonitor).await.err().unwrap();
        assert_eq!(err.code(), "FETCH_ERROR");
        assert!(err.to_string().contains("database appdb"));
    }

    #[tokio::test]
    async fn test_invalidate_all_refetches() {
        let fixture = catalog_fixture(FilterConfig::default());
        let database = fixture.instance.database("appdb", &NullMonitor).await.unwrap();
        database.schemas(&NullMonitor).await.unwrap();
        let before = fixture.executor.call_count();

        fixture.instance.invalidate_all().await;
        let database = fixture.instance.database("appdb", &NullMonitor).await.unwrap();
        database.schemas(&NullMonitor).await.unwrap();
        assert_eq!(fixture.executor.call_count(), before + 2);
    }

    #[tokio::test]
    async fn test_type_registry_is_cached() {
        let fixture = catalog_fixture(FilterConfig::default());
        let database = fixture.instance.database("appdb", &NullMonitor).await.unwrap();
        let first = database.type_registry(&NullMonitor).await.unwrap();
        let before = fixture.executor.call_count();
        let second = database.type_registry(&NullMonitor).await.unwrap();
        assert_eq!(fixture.executor.call_count(), before);
        assert_eq!(first.len(), second.len());
        assert!(first.find_by_name("varchar").is_some());
    }
}
