//! 目录服务路由模块

use axum::{
    routing::{get, patch, post},
    Router,
};

use crate::handlers::{
    create_column, drop_column, health_check, list_columns, list_databases, list_schemas,
    list_tables, list_types, modify_column, refresh_catalog,
};
use crate::state::AppState;

/// 创建目录浏览与列变更路由
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/databases", get(list_databases))
        .route("/api/databases/{database}/schemas", get(list_schemas))
        .route("/api/databases/{database}/types", get(list_types))
        .route("/api/databases/{database}/schemas/{schema}/tables", get(list_tables))
        .route(
            "/api/databases/{database}/schemas/{schema}/tables/{table}/columns",
            get(list_columns).post(create_column),
        )
        .route(
            "/api/databases/{database}/schemas/{schema}/tables/{table}/columns/{column}",
            patch(modify_column).delete(drop_column),
        )
        .route("/api/catalog/refresh", post(refresh_catalog))
        .route("/api/health", get(health_check))
}
