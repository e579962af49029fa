//! Handler模块

use axum::{
    extract::{Path, Query, State},
    Json,
};
use catalog_core::ColumnKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use common::errors::AppError;
use common::models::{
    ColumnEditRequest, ColumnItem, CreateColumnRequest, DataTypeItem, DatabaseItem, DdlResult,
    SchemaItem, TableItem,
};
use common::response::ApiResponse;
use crate::service::{CatalogService, CatalogServiceTrait, RefreshScope};
use crate::state::AppState;

const SERVICE: &str = "catalog-service";

/// 列出实例下的数据库
#[utoipa::path(
    get,
    path = "/api/databases",
    tag = "catalog",
    responses(
        (status = 200, description = "数据库列表", body = ApiResponse<Vec<DatabaseItem>>),
        (status = 502, description = "目录查询失败")
    )
)]
pub async fn list_databases(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<DatabaseItem>>>, AppError> {
    let service = CatalogService::new(state.instance);
    let data = service.list_databases().await?;
    Ok(Json(ApiResponse::ok_with_service(data, SERVICE)))
}

/// 列出数据库下的模式
#[utoipa::path(
    get,
    path = "/api/databases/{database}/schemas",
    tag = "catalog",
    params(
        ("database" = String, Path, description = "数据库名称")
    ),
    responses(
        (status = 200, description = "模式列表", body = ApiResponse<Vec<SchemaItem>>),
        (status = 404, description = "数据库未找到")
    )
)]
pub async fn list_schemas(
    State(state): State<AppState>,
    Path(database): Path<String>,
) -> Result<Json<ApiResponse<Vec<SchemaItem>>>, AppError> {
    let service = CatalogService::new(state.instance);
    let data = service.list_schemas(&database).await?;
    Ok(Json(ApiResponse::ok_with_service(data, SERVICE)))
}

/// 列出数据库的数据类型
#[utoipa::path(
    get,
    path = "/api/databases/{database}/types",
    tag = "catalog",
    params(
        ("database" = String, Path, description = "数据库名称")
    ),
    responses(
        (status = 200, description = "类型列表", body = ApiResponse<Vec<DataTypeItem>>),
        (status = 404, description = "数据库未找到")
    )
)]
pub async fn list_types(
    State(state): State<AppState>,
    Path(database): Path<String>,
) -> Result<Json<ApiResponse<Vec<DataTypeItem>>>, AppError> {
    let service = CatalogService::new(state.instance);
    let data = service.list_types(&database).await?;
    Ok(Json(ApiResponse::ok_with_service(data, SERVICE)))
}

/// 列出模式下的表
#[utoipa::path(
    get,
    path = "/api/databases/{database}/schemas/{schema}/tables",
    tag = "catalog",
    params(
        ("database" = String, Path, description = "数据库名称"),
        ("schema" = String, Path, description = "模式名称")
    ),
    responses(
        (status = 200, description = "表列表", body = ApiResponse<Vec<TableItem>>),
        (status = 404, description = "数据库或模式未找到")
    )
)]
pub async fn list_tables(
    State(state): State<AppState>,
    Path((database, schema)): Path<(String, String)>,
) -> Result<Json<ApiResponse<Vec<TableItem>>>, AppError> {
    let service = CatalogService::new(state.instance);
    let data = service.list_tables(&database, &schema).await?;
    Ok(Json(ApiResponse::ok_with_service(data, SERVICE)))
}

/// 列出表的列
#[utoipa::path(
    get,
    path = "/api/databases/{database}/schemas/{schema}/tables/{table}/columns",
    tag = "catalog",
    params(
        ("database" = String, Path, description = "数据库名称"),
        ("schema" = String, Path, description = "模式名称"),
        ("table" = String, Path, description = "表名称")
    ),
    responses(
        (status = 200, description = "列列表", body = ApiResponse<Vec<ColumnItem>>),
        (status = 404, description = "对象未找到")
    )
)]
pub async fn list_columns(
    State(state): State<AppState>,
    Path((database, schema, table)): Path<(String, String, String)>,
) -> Result<Json<ApiResponse<Vec<ColumnItem>>>, AppError> {
    let service = CatalogService::new(state.instance);
    let data = service.list_columns(&database, &schema, &table).await?;
    Ok(Json(ApiResponse::ok_with_service(data, SERVICE)))
}

/// 新增列
#[utoipa::path(
    post,
    path = "/api/databases/{database}/schemas/{schema}/tables/{table}/columns",
    tag = "ddl",
    params(
        ("database" = String, Path, description = "数据库名称"),
        ("schema" = String, Path, description = "模式名称"),
        ("table" = String, Path, description = "表名称")
    ),
    request_body = CreateColumnRequest,
    responses(
        (status = 200, description = "生成（并执行）的 DDL", body = ApiResponse<DdlResult>),
        (status = 400, description = "请求无效或无法生成 DDL"),
        (status = 422, description = "DDL 执行失败")
    )
)]
pub async fn create_column(
    State(state): State<AppState>,
    Path((database, schema, table)): Path<(String, String, String)>,
    Json(req): Json<CreateColumnRequest>,
) -> Result<Json<ApiResponse<DdlResult>>, AppError> {
    let service = CatalogService::new(state.instance);
    let data = service.create_column(&database, &schema, &table, req).await?;
    Ok(Json(ApiResponse::ok_with_service(data, SERVICE)))
}

/// 修改或重命名列
#[utoipa::path(
    patch,
    path = "/api/databases/{database}/schemas/{schema}/tables/{table}/columns/{column}",
    tag = "ddl",
    params(
        ("database" = String, Path, description = "数据库名称"),
        ("schema" = String, Path, description = "模式名称"),
        ("table" = String, Path, description = "表名称"),
        ("column" = String, Path, description = "列名称")
    ),
    request_body = ColumnEditRequest,
    responses(
        (status = 200, description = "生成（并执行）的 DDL", body = ApiResponse<DdlResult>),
        (status = 400, description = "请求无效或无法生成 DDL"),
        (status = 404, description = "列未找到"),
        (status = 422, description = "DDL 执行失败")
    )
)]
pub async fn modify_column(
    State(state): State<AppState>,
    Path((database, schema, table, column)): Path<(String, String, String, String)>,
    Json(req): Json<ColumnEditRequest>,
) -> Result<Json<ApiResponse<DdlResult>>, AppError> {
    let service = CatalogService::new(state.instance);
    let key = ColumnKey::new(schema, table, column);
    let data = service.modify_column(&database, key, req).await?;
    Ok(Json(ApiResponse::ok_with_service(data, SERVICE)))
}

/// 删除列
#[utoipa::path(
    delete,
    path = "/api/databases/{database}/schemas/{schema}/tables/{table}/columns/{column}",
    tag = "ddl",
    params(
        ("database" = String, Path, description = "数据库名称"),
        ("schema" = String, Path, description = "模式名称"),
        ("table" = String, Path, description = "表名称"),
        ("column" = String, Path, description = "列名称"),
        DropColumnQuery
    ),
    responses(
        (status = 200, description = "生成（并执行）的 DDL", body = ApiResponse<DdlResult>),
        (status = 404, description = "列未找到"),
        (status = 422, description = "DDL 执行失败")
    )
)]
pub async fn drop_column(
    State(state): State<AppState>,
    Path((database, schema, table, column)): Path<(String, String, String, String)>,
    Query(query): Query<DropColumnQuery>,
) -> Result<Json<ApiResponse<DdlResult>>, AppError> {
    let service = CatalogService::new(state.instance);
    let key = ColumnKey::new(schema, table, column);
    let data = service.drop_column(&database, key, query.dry_run).await?;
    Ok(Json(ApiResponse::ok_with_service(data, SERVICE)))
}

/// 刷新目录缓存
#[utoipa::path(
    post,
    path = "/api/catalog/refresh",
    tag = "catalog",
    params(RefreshQuery),
    responses(
        (status = 200, description = "缓存已丢弃", body = ApiResponse<bool>),
        (status = 400, description = "刷新范围无效"),
        (status = 404, description = "对象未找到")
    )
)]
pub async fn refresh_catalog(
    State(state): State<AppState>,
    Query(query): Query<RefreshQuery>,
) -> Result<Json<ApiResponse<bool>>, AppError> {
    let service = CatalogService::new(state.instance);
    service
        .refresh(RefreshScope {
            database: query.database,
            schema: query.schema,
            table: query.table,
        })
        .await?;
    Ok(Json(ApiResponse::ok_with_service(true, SERVICE)))
}

/// 健康检查端点
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "health",
    responses(
        (status = 200, description = "服务运行正常", body = HealthResponse)
    )
)]
pub async fn health_check(
    State(state): State<AppState>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: SERVICE.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        instance: state.instance.name().to_string(),
        pools: state.pool_count().await,
    })
}

/// 删除列的查询参数
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DropColumnQuery {
    /// 只生成语句，不执行
    #[serde(default)]
    pub dry_run: bool,
}

/// 刷新范围；均为空时刷新整个实例
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RefreshQuery {
    pub database: Option<String>,
    pub schema: Option<String>,
    pub table: Option<String>,
}

/// 健康检查响应
#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    /// 服务状态
    pub status: String,
    /// 服务名称
    pub service: String,
    /// 服务版本
    pub version: String,
    /// 当前时间戳
    pub timestamp: DateTime<Utc>,
    /// 目录实例名称
    pub instance: String,
    /// 已打开的连接池数量
    pub pools: usize,
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use catalog_core::testing::{catalog_fixture, Fixture};
    use common::config::{AppConfig, FilterConfig};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::routes;
    use crate::state::AppState;

    fn app() -> (Router, Fixture) {
        let fixture = catalog_fixture(FilterConfig::default());
        let state = AppState::with_instance(AppConfig::default(), fixture.instance.clone());
        (routes::router().with_state(state), fixture)
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn with_json(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _fixture) = app();
        let (status, body) = send(app, get("/api/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "catalog-service");
        assert_eq!(body["instance"], "test");
    }

    #[tokio::test]
    async fn test_list_databases_hides_templates() {
        let (app, _fixture) = app();
        let (status, body) = send(app, get("/api/databases")).await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["appdb", "postgres"]);
        assert_eq!(body["meta"]["service"], "catalog-service");
    }

    #[tokio::test]
    async fn test_unknown_schema_is_404() {
        let (app, _fixture) = app();
        let (status, body) = send(app, get("/api/databases/appdb/schemas/nope/tables")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_list_columns() {
        let (app, _fixture) = app();
        let (status, body) = send(app, get("/api/databases/appdb/schemas/public/tables/orders/columns")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][2]["type_name"], "NUMERIC(10,2)");
        assert_eq!(body["data"][0]["required"], true);
    }

    #[tokio::test]
    async fn test_patch_column_dry_run() {
        let (app, fixture) = app();
        let (status, body) = send(
            app,
            with_json(
                "PATCH",
                "/api/databases/appdb/schemas/public/tables/orders/columns/title",
                json!({ "new_name": "headline", "dry_run": true }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["executed"], false);
        assert_eq!(
            body["data"]["actions"][0]["sql"],
            "ALTER TABLE public.orders RENAME COLUMN title TO headline"
        );
        assert!(fixture.ddl.batches().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_request_is_400() {
        let (app, _fixture) = app();
        let (status, body) = send(
            app,
            with_json(
                "POST",
                "/api/databases/appdb/schemas/public/tables/orders/columns",
                json!({ "name": "" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_execution_failure_is_422_with_statement() {
        let (app, fixture) = app();
        fixture.ddl.fail_on("DROP COLUMN");
        let request = Request::builder()
            .method("DELETE")
            .uri("/api/databases/appdb/schemas/public/tables/orders/columns/amount")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(app, request).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["code"], "EXECUTION_ERROR");
        assert_eq!(
            body["error"]["details"]["statement"],
            "ALTER TABLE public.orders DROP COLUMN amount"
        );
    }

    #[tokio::test]
    async fn test_refresh_table_refetches_columns() {
        let (app, fixture) = app();
        send(app.clone(), get("/api/databases/appdb/schemas/public/tables/orders/columns")).await;
        let before = fixture.executor.call_count();

        let refresh = Request::builder()
            .method("POST")
            .uri("/api/catalog/refresh?database=appdb&schema=public&table=orders")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(app.clone(), refresh).await;
        assert_eq!(status, StatusCode::OK);

        send(app, get("/api/databases/appdb/schemas/public/tables/orders/columns")).await;
        assert_eq!(fixture.executor.call_count(), before + 1);
    }
}
