//! Catalog object model.
//!
//! `Instance → Database → Schema → Table → TableColumn`, each container
//! owning an [`ObjectCache`](crate::cache::ObjectCache) of its children.
//! Parents are reached through `Weak` links, data types through the owning
//! database's [`TypeRegistry`].

mod column;
mod data_type;
mod database;
mod instance;
mod schema;
mod table;

use std::sync::Arc;

use async_trait::async_trait;
use common::errors::AppResult;
use common::models::ObjectKind;
use tracing::Span;

use crate::filter::{FilterSource, ObjectFilter};
use crate::progress::ProgressMonitor;
use crate::transport::ConnectionProvider;

pub use column::{ColumnDefinition, TableColumn};
pub use data_type::{DataKind, DataType, TypeRegistry};
pub(crate) use data_type::{NUMERIC_OID, VARCHAR_OID};
pub use database::Database;
pub use instance::Instance;
pub use schema::Schema;
pub use table::Table;

/// Collaborators and logging span shared by every object of one instance.
#[derive(Clone)]
pub struct CatalogContext {
    provider: Arc<dyn ConnectionProvider>,
    filters: Arc<dyn FilterSource>,
    span: Span,
}

impl CatalogContext {
    pub fn new(
        instance_name: &str,
        provider: Arc<dyn ConnectionProvider>,
        filters: Arc<dyn FilterSource>,
    ) -> Self {
        Self {
            provider,
            filters,
            span: tracing::info_span!("catalog", instance = %instance_name),
        }
    }

    pub fn provider(&self) -> &Arc<dyn ConnectionProvider> {
        &self.provider
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn show_system_objects(&self) -> bool {
        self.filters.show_system_objects()
    }

    /// Configured filter for `kind`, if any.
    pub fn filter(&self, kind: ObjectKind) -> Option<ObjectFilter> {
        self.filters.object_filter(kind).filter(|f| !f.is_empty())
    }
}

/// Navigation over the catalog tree.
#[async_trait]
pub trait CatalogObject: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> ObjectKind;

    /// Parent object, `None` for the instance or when the parent is gone.
    fn parent(&self) -> Option<CatalogNode>;

    /// Kind of the children, `None` for leaves.
    fn child_kind(&self) -> Option<ObjectKind>;

    /// Children in catalog order, populating the cache on first use.
    async fn children(&self, monitor: &dyn ProgressMonitor) -> AppResult<Vec<CatalogNode>>;

    /// Child named `name`.
    ///
    /// # Errors
    /// `AppError::ObjectNotFound` when no such child exists.
    async fn child(&self, name: &str, monitor: &dyn ProgressMonitor) -> AppResult<CatalogNode>;
}

/// Any object of the catalog tree.
#[derive(Clone)]
pub enum CatalogNode {
    Instance(Arc<Instance>),
    Database(Arc<Database>),
    Schema(Arc<Schema>),
    Table(Arc<Table>),
    Column(Arc<TableColumn>),
}

impl CatalogNode {
    pub fn as_object(&self) -> &dyn CatalogObject {
        match self {
            CatalogNode::Instance(o) => &**o,
            CatalogNode::Database(o) => &**o,
            CatalogNode::Schema(o) => &**o,
            CatalogNode::Table(o) => &**o,
            CatalogNode::Column(o) => &**o,
        }
    }

    pub fn name(&self) -> &str {
        self.as_object().name()
    }

    pub fn kind(&self) -> ObjectKind {
        self.as_object().kind()
    }
}

impl std::fmt::Debug for CatalogNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind(), self.name())
    }
}
