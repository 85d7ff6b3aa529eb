//! # fedsql - Federated SQL Executor
//!
//! fedsql runs one SQL statement against many independently administered
//! databases at once and returns a single report, one entry per datasource,
//! in the order the datasources were requested.
//!
//! ## Features
//!
//! - **SQL Guard**: allow-listed leading keywords plus injection heuristics
//! - **Encrypted credentials**: AES-256-GCM tokens for stored passwords
//! - **Bounded concurrency**: a fixed worker pool shared by all requests
//! - **Failure containment**: one backend failing never fails the others
//! - **Backends**: PostgreSQL, MySQL/MariaDB and SQLite through sqlx
//! - **Export**: results as `.xlsx` workbooks, one sheet per datasource
//! - **Metrics**: Prometheus metrics for monitoring
//! - **Health Checks**: Kubernetes-ready health endpoints
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fedsql::config::Settings;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Load configuration
//!     let settings = Settings::new()?;
//!
//!     // Server will start on configured host:port
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **Domain**: value types, errors and the `DatasourceStore` / `BackendConnector` ports
//! - **Adapters**: guard, cipher, registry, executors, HTTP handlers
//! - **Persistence**: SQL catalog of datasources
//! - **Config**: Configuration management

pub mod adapters;
pub mod cli;
pub mod config;
pub mod domain;
pub mod persistence;

use crate::adapters::api_handler::{self, ApiState};
use crate::adapters::health_handler::HealthHandler;
use crate::adapters::metrics_handler::MetricsHandler;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Creates the Axum application router with all endpoints configured.
///
/// # Arguments
///
/// * `api_state` - Federated executor shared by the query endpoints
/// * `health_handler` - Health check handler
/// * `metrics_handler` - Metrics collection handler
pub fn create_app(
    api_state: ApiState,
    health_handler: Arc<HealthHandler>,
    metrics_handler: Arc<MetricsHandler>,
) -> Router {
    let health_router = Router::new()
        .route("/health", get({
            let handler = health_handler.clone();
            move || {
                let h = handler.clone();
                async move { h.health().await }
            }
        }))
        .route("/health/ready", get({
            let handler = health_handler.clone();
            move || {
                let h = handler.clone();
                async move { h.ready().await }
            }
        }))
        .route("/health/live", get({
            let handler = health_handler.clone();
            move || {
                let h = handler.clone();
                async move { h.live().await }
            }
        }))
        .route("/metrics", get({
            let handler = metrics_handler.clone();
            move || {
                let h = handler.clone();
                async move { h.metrics().await }
            }
        }));

    let api_router = Router::new()
        .route("/datasource/multi-query", post(api_handler::multi_query))
        .route("/datasource/tree", get(api_handler::datasource_tree))
        .route("/execute-sql", post(api_handler::execute_sql))
        .route("/execute-sql/validate", post(api_handler::validate_sql))
        .route(
            "/execute-sql/supported-operations",
            get(api_handler::supported_operations),
        )
        .route("/export-excel", post(api_handler::export_excel))
        .route(
            "/export-multi-datasource-excel",
            post(api_handler::export_multi_datasource_excel),
        )
        .with_state(api_state);

    health_router
        .nest("/api", api_router)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}
