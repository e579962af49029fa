//! PostgreSQL 目录服务
//!
//! 提供目录浏览与列结构变更功能，包括：
//! - 数据库、模式、表、列的懒加载浏览
//! - 列的新增、修改、重命名、删除（支持仅预览 DDL）
//! - 目录缓存刷新

mod handlers;
mod routes;
mod service;
mod state;

use anyhow::Context;
use axum::{middleware, routing::get, Json, Router};
use common::config::AppConfig;
use common::middleware::request_id::request_id_middleware;
use state::AppState;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;

const SERVICE_NAME: &str = "catalog-service";

#[derive(OpenApi)]
#[openapi(
    info(
        title = "目录服务 API",
        version = "0.1.0",
        description = "PostgreSQL 目录浏览与列结构变更微服务"
    ),
    paths(
        handlers::list_databases,
        handlers::list_schemas,
        handlers::list_types,
        handlers::list_tables,
        handlers::list_columns,
        handlers::create_column,
        handlers::modify_column,
        handlers::drop_column,
        handlers::refresh_catalog,
        handlers::health_check,
    ),
    components(schemas(
        common::models::DatabaseItem,
        common::models::SchemaItem,
        common::models::TableItem,
        common::models::ColumnItem,
        common::models::DataTypeItem,
        common::models::ColumnEditRequest,
        common::models::CreateColumnRequest,
        common::models::PersistActionItem,
        common::models::DdlResult,
        handlers::HealthResponse,
    )),
    tags(
        (name = "catalog", description = "目录浏览端点"),
        (name = "ddl", description = "列结构变更端点"),
        (name = "health", description = "健康检查端点")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file (if present) before anything else
    load_dotenv();

    // 初始化日志追踪
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // 加载配置
    let config = AppConfig::load_with_service(SERVICE_NAME);

    // 创建应用状态（连接在首次访问时建立）
    let state = AppState::new(config.clone())
        .context("Failed to initialize application state (check DATABASE_URL)")?;
    let pools = state.pools.clone();

    // 创建路由
    let app = create_router(state);

    // 启动服务
    let addr = format!("{}:{}", config.host, config.port);
    info!(service = SERVICE_NAME, address = %addr, "启动服务");

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("绑定地址失败: {}", addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("服务启动失败")?;

    if let Some(pools) = pools {
        pools.close_all().await;
    }
    info!(service = SERVICE_NAME, "服务已停止");
    Ok(())
}

fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::router())
        .route("/api-docs/openapi.json", get(openapi_json))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "无法监听退出信号");
        std::future::pending::<()>().await;
    }
}

/// Load .env file from the working directory (best-effort, no error if missing).
fn load_dotenv() {
    let Ok(content) = std::fs::read_to_string(".env") else {
        return;
    };
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            // Only set if not already set by the environment
            if std::env::var(key).is_err() {
                std::env::set_var(key, value.trim().trim_matches('"'));
            }
        }
    }
}
