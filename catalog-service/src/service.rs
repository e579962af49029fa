//! 目录浏览与列变更服务模块

use std::sync::Arc;

use async_trait::async_trait;
use catalog_core::{
    ColumnKey, CommandContext, Database, Instance, NullMonitor, PersistAction, ProgressMonitor,
    Table,
};
use common::errors::{AppError, AppResult};
use common::models::{
    ColumnEditRequest, ColumnItem, CreateColumnRequest, DataTypeItem, DatabaseItem, DdlResult,
    SchemaItem, TableItem,
};
use validator::Validate;

/// 刷新范围：未指定的层级表示刷新其上一级全部内容
#[derive(Debug, Default, Clone)]
pub struct RefreshScope {
    pub database: Option<String>,
    pub schema: Option<String>,
    pub table: Option<String>,
}

/// 目录服务 Trait
#[async_trait]
pub trait CatalogServiceTrait: Send + Sync {
    /// 列出实例下的数据库
    async fn list_databases(&self) -> AppResult<Vec<DatabaseItem>>;

    /// 列出数据库下的模式
    async fn list_schemas(&self, database: &str) -> AppResult<Vec<SchemaItem>>;

    /// 列出数据库的类型注册表
    async fn list_types(&self, database: &str) -> AppResult<Vec<DataTypeItem>>;

    /// 列出模式下的表
    async fn list_tables(&self, database: &str, schema: &str) -> AppResult<Vec<TableItem>>;

    /// 列出表的列
    async fn list_columns(&self, database: &str, schema: &str, table: &str) -> AppResult<Vec<ColumnItem>>;

    /// 丢弃缓存，下次访问时重新加载
    async fn refresh(&self, scope: RefreshScope) -> AppResult<()>;

    /// 新增列
    async fn create_column(
        &self,
        database: &str,
        schema: &str,
        table: &str,
        req: CreateColumnRequest,
    ) -> AppResult<DdlResult>;

    /// 修改列（类型、可空性、默认值、名称）
    async fn modify_column(
        &self,
        database: &str,
        key: ColumnKey,
        req: ColumnEditRequest,
    ) -> AppResult<DdlResult>;

    /// 删除列
    async fn drop_column(&self, database: &str, key: ColumnKey, dry_run: bool) -> AppResult<DdlResult>;
}

/// 基于目录缓存的服务实现
pub struct CatalogService {
    instance: Arc<Instance>,
}

impl CatalogService {
    /// 创建新的目录服务实例
    pub fn new(instance: Arc<Instance>) -> Self {
        Self { instance }
    }

    async fn database(&self, name: &str) -> AppResult<Arc<Database>> {
        self.instance.database(name, &NullMonitor).await
    }

    async fn table(&self, database: &str, schema: &str, table: &str) -> AppResult<Arc<Table>> {
        self.database(database)
            .await?
            .schema(schema, &NullMonitor)
            .await?
            .table(table, &NullMonitor)
            .await
    }
}

#[async_trait]
impl CatalogServiceTrait for CatalogService {
    async fn list_databases(&self) -> AppResult<Vec<DatabaseItem>> {
        let databases = self.instance.databases(&NullMonitor).await?;
        Ok(databases.iter().map(|d| d.to_item()).collect())
    }

    async fn list_schemas(&self, database: &str) -> AppResult<Vec<SchemaItem>> {
        let schemas = self.database(database).await?.schemas(&NullMonitor).await?;
        Ok(schemas.iter().map(|s| s.to_item()).collect())
    }

    async fn list_types(&self, database: &str) -> AppResult<Vec<DataTypeItem>> {
        let registry = self.database(database).await?.type_registry(&NullMonitor).await?;
        let mut types: Vec<DataTypeItem> = registry.iter().map(|t| DataTypeItem::from(&**t)).collect();
        types.sort_by_key(|t| t.oid);
        Ok(types)
    }

    async fn list_tables(&self, database: &str, schema: &str) -> AppResult<Vec<TableItem>> {
        let tables = self
            .database(database)
            .await?
            .schema(schema, &NullMonitor)
            .await?
            .tables(&NullMonitor)
            .await?;
        Ok(tables.iter().map(|t| t.to_item()).collect())
    }

    async fn list_columns(&self, database: &str, schema: &str, table: &str) -> AppResult<Vec<ColumnItem>> {
        let database = self.database(database).await?;
        let registry = database.type_registry(&NullMonitor).await?;
        let columns = database
            .schema(schema, &NullMonitor)
            .await?
            .table(table, &NullMonitor)
            .await?
            .columns(&NullMonitor)
            .await?;
        Ok(columns.iter().map(|c| c.definition().describe(&registry)).collect())
    }

    async fn refresh(&self, scope: RefreshScope) -> AppResult<()> {
        let RefreshScope { database, schema, table } = scope;
        match (database, schema, table) {
            (None, None, None) => self.instance.invalidate_all().await,
            (Some(database), None, None) => self.database(&database).await?.invalidate().await,
            (Some(database), Some(schema), None) => {
                self.database(&database)
                    .await?
                    .schema(&schema, &NullMonitor)
                    .await?
                    .invalidate()
                    .await
            }
            (Some(database), Some(schema), Some(table)) => {
                self.table(&database, &schema, &table).await?.invalidate_columns().await
            }
            _ => {
                return Err(AppError::Validation(
                    "table requires schema, schema requires database".into(),
                ))
            }
        }
        tracing::info!(instance = %self.instance.name(), "目录缓存已刷新");
        Ok(())
    }

    async fn create_column(
        &self,
        database: &str,
        schema: &str,
        table: &str,
        req: CreateColumnRequest,
    ) -> AppResult<DdlResult> {
        req.validate()?;
        let database = self.database(database).await?;
        let registry = database.type_registry(&NullMonitor).await?;
        let type_oid = match req.type_name.as_deref() {
            Some(name) => Some(registry.resolve(name)?.oid),
            None => None,
        };

        let context = CommandContext::new(database);
        let CreateColumnRequest {
            name,
            max_length,
            precision,
            scale,
            required,
            default_value,
            dry_run,
            ..
        } = req;
        let key = context
            .create_column(schema, table, &NullMonitor, move |column| {
                if let Some(name) = name {
                    column.name = name;
                }
                if let Some(type_oid) = type_oid {
                    column.type_oid = type_oid;
                    column.max_length = 0;
                }
                if let Some(max_length) = max_length {
                    column.max_length = max_length;
                }
                column.precision = precision.unwrap_or_default();
                column.scale = scale.unwrap_or_default();
                column.required = required;
                column.default_value = default_value;
            })
            .await?;

        let result = finish(&context, dry_run, &NullMonitor).await?;
        if result.executed {
            tracing::info!(column = %key, "列已创建");
        }
        Ok(result)
    }

    async fn modify_column(
        &self,
        database: &str,
        key: ColumnKey,
        req: ColumnEditRequest,
    ) -> AppResult<DdlResult> {
        req.validate()?;
        if !req.has_structural_change() && req.new_name.is_none() {
            return Err(AppError::Validation(format!("nothing to change for column {}", key)));
        }
        let database = self.database(database).await?;
        let context = CommandContext::new(database.clone());

        if req.has_structural_change() {
            let type_oid = match req.type_name.as_deref() {
                Some(name) => Some(database.type_registry(&NullMonitor).await?.resolve(name)?.oid),
                None => None,
            };
            let ColumnEditRequest {
                max_length,
                precision,
                scale,
                required,
                default_value,
                ..
            } = &req;
            let (max_length, precision, scale, required) = (*max_length, *precision, *scale, *required);
            let default_value = default_value.clone();
            context
                .modify_column(&key, &NullMonitor, move |column| {
                    if let Some(type_oid) = type_oid {
                        column.type_oid = type_oid;
                        column.max_length = max_length.unwrap_or_default();
                        column.precision = precision.unwrap_or_default();
                        column.scale = scale.unwrap_or_default();
                    } else {
                        if let Some(max_length) = max_length {
                            column.max_length = max_length;
                        }
                        if let Some(precision) = precision {
                            column.precision = precision;
                        }
                        if let Some(scale) = scale {
                            column.scale = scale;
                        }
                    }
                    if let Some(required) = required {
                        column.required = required;
                    }
                    if let Some(default_value) = default_value {
                        column.default_value = Some(default_value).filter(|d| !d.trim().is_empty());
                    }
                })
                .await?;
        }
        if let Some(new_name) = req.new_name.as_deref() {
            context.rename_column(&key, new_name, &NullMonitor).await?;
        }

        let result = finish(&context, req.dry_run, &NullMonitor).await?;
        if result.executed {
            tracing::info!(column = %key, statements = result.actions.len(), "列已修改");
        }
        Ok(result)
    }

    async fn drop_column(&self, database: &str, key: ColumnKey, dry_run: bool) -> AppResult<DdlResult> {
        let context = CommandContext::new(self.database(database).await?);
        context.drop_column(&key, &NullMonitor).await?;

        let result = finish(&context, dry_run, &NullMonitor).await?;
        if result.executed {
            tracing::info!(column = %key, "列已删除");
        }
        Ok(result)
    }
}

/// 预览或执行上下文中记录的全部变更
async fn finish(
    context: &CommandContext,
    dry_run: bool,
    monitor: &dyn ProgressMonitor,
) -> AppResult<DdlResult> {
    let (actions, executed) = if dry_run {
        (context.preview(monitor).await?, false)
    } else {
        (context.flush(monitor).await?.into_result()?, true)
    };
    Ok(DdlResult {
        actions: actions.into_iter().map(PersistAction::into).collect(),
        executed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_core::testing::{catalog_fixture, Fixture};
    use common::config::FilterConfig;

    fn service() -> (CatalogService, Fixture) {
        let fixture = catalog_fixture(FilterConfig::default());
        (CatalogService::new(fixture.instance.clone()), fixture)
    }

    fn key(column: &str) -> ColumnKey {
        ColumnKey::new("public", "orders", column)
    }

    #[tokio::test]
    async fn test_list_columns_renders_types() {
        let (service, _fixture) = service();
        let columns = service.list_columns("appdb", "public", "orders").await.unwrap();
        let types: Vec<&str> = columns.iter().map(|c| c.type_name.as_str()).collect();
        assert_eq!(types, vec!["INT4", "VARCHAR(50)", "NUMERIC(10,2)"]);
    }

    #[tokio::test]
    async fn test_list_tables_unknown_schema() {
        let (service, _fixture) = service();
        let err = service.list_tables("appdb", "missing").await.err().unwrap();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_modify_dry_run_executes_nothing() {
        let (service, fixture) = service();
        let req = ColumnEditRequest {
            type_name: Some("varchar".into()),
            max_length: Some(80),
            dry_run: true,
            ..Default::default()
        };
        let result = service.modify_column("appdb", key("title"), req).await.unwrap();
        assert!(!result.executed);
        assert_eq!(result.actions.len(), 3);
        assert_eq!(
            result.actions[0].sql,
            "ALTER TABLE public.orders ALTER COLUMN title TYPE VARCHAR(80) USING title::VARCHAR"
        );
        assert!(fixture.ddl.batches().is_empty());
    }

    #[tokio::test]
    async fn test_modify_and_rename_in_one_request() {
        let (service, fixture) = service();
        let req = ColumnEditRequest {
            new_name: Some("label".into()),
            required: Some(true),
            ..Default::default()
        };
        let result = service.modify_column("appdb", key("title"), req).await.unwrap();
        assert!(result.executed);
        let last = result.actions.last().unwrap();
        assert_eq!(last.sql, "ALTER TABLE public.orders RENAME COLUMN title TO label");
        assert_eq!(fixture.ddl.batches().len(), 2);
    }

    #[tokio::test]
    async fn test_modify_requires_a_change() {
        let (service, _fixture) = service();
        let err = service
            .modify_column("appdb", key("title"), ColumnEditRequest::default())
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_create_with_unknown_type() {
        let (service, fixture) = service();
        let req = CreateColumnRequest {
            name: Some("flag".into()),
            type_name: Some("no_such_type".into()),
            ..Default::default()
        };
        let err = service.create_column("appdb", "public", "orders", req).await.err().unwrap();
        assert_eq!(err.code(), "SYNTHESIS_ERROR");
        assert!(fixture.ddl.batches().is_empty());
    }

    #[tokio::test]
    async fn test_create_numeric_column() {
        let (service, _fixture) = service();
        let req = CreateColumnRequest {
            name: Some("discount".into()),
            type_name: Some("numeric".into()),
            precision: Some(5),
            scale: Some(2),
            required: true,
            default_value: Some("0".into()),
            dry_run: true,
            ..Default::default()
        };
        let result = service.create_column("appdb", "public", "orders", req).await.unwrap();
        assert_eq!(
            result.actions[0].sql,
            "ALTER TABLE public.orders ADD COLUMN discount NUMERIC(5,2) NOT NULL DEFAULT 0"
        );
    }

    #[tokio::test]
    async fn test_drop_failure_reports_statement() {
        let (service, fixture) = service();
        fixture.ddl.fail_on("DROP COLUMN");
        let err = service.drop_column("appdb", key("amount"), false).await.err().unwrap();
        match err {
            AppError::Execution { statement, .. } => {
                assert_eq!(statement, "ALTER TABLE public.orders DROP COLUMN amount")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_refresh_scope_requires_parents() {
        let (service, _fixture) = service();
        let scope = RefreshScope {
            table: Some("orders".into()),
            ..Default::default()
        };
        assert!(service.refresh(scope).await.is_err());
        assert!(service.refresh(RefreshScope::default()).await.is_ok());
    }
}
