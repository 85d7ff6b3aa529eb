//! REST API handlers for federated and single-datasource queries

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::adapters::export::{self, XLSX_CONTENT_TYPE};
use crate::adapters::federated_executor::FederatedExecutor;
use crate::domain::query::millis;
use crate::domain::{ErrorKind, QueryOptions, StatementKind};

/// Shared application state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub executor: Arc<FederatedExecutor>,
}

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiQueryRequest {
    #[serde(alias = "statement", alias = "sql")]
    pub query: String,
    pub datasource_codes: Vec<String>,
    #[serde(default)]
    pub options: QueryOptions,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteSqlRequest {
    #[serde(alias = "statement", alias = "sql")]
    pub query: String,
    pub datasource_code: String,
    #[serde(default)]
    pub options: QueryOptions,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportExcelRequest {
    #[serde(alias = "statement", alias = "sql")]
    pub query: String,
    /// Datasource code.
    #[serde(alias = "datasourceCode")]
    pub database: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub options: QueryOptions,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiExportRequest {
    #[serde(alias = "statement", alias = "sql")]
    pub query: String,
    pub datasource_codes: Vec<String>,
    #[serde(default)]
    pub filename_prefix: Option<String>,
    #[serde(default)]
    pub options: QueryOptions,
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    #[serde(alias = "statement", alias = "sql")]
    pub query: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResponse {
    pub valid: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_type: Option<StatementKind>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedOperations {
    pub allowed_operations: Vec<String>,
    pub default_timeout_ms: u64,
    pub max_timeout_ms: u64,
    pub max_rows: u64,
    pub pool_size: usize,
}

/// HTTP status for an error kind
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidStatement => StatusCode::BAD_REQUEST,
        ErrorKind::DatasourceNotFound | ErrorKind::DatasourceDisabled => StatusCode::NOT_FOUND,
        ErrorKind::TimeoutExceeded => StatusCode::REQUEST_TIMEOUT,
        ErrorKind::ConnectionFailure | ErrorKind::ExecutionFailure => StatusCode::BAD_GATEWAY,
        ErrorKind::DecryptionFailed
        | ErrorKind::EncryptionFailed
        | ErrorKind::Configuration
        | ErrorKind::Catalog
        | ErrorKind::WorkerPool
        | ErrorKind::Export => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ============================================================================
// Datasource Endpoints
// ============================================================================

/// POST /api/datasource/multi-query - Run one statement on many datasources
///
/// The body is always the report. 200 once dispatched, even when some
/// backends failed; otherwise the status of the rejection.
pub async fn multi_query(
    State(state): State<ApiState>,
    Json(request): Json<MultiQueryRequest>,
) -> impl IntoResponse {
    let report = state
        .executor
        .run(&request.query, &request.datasource_codes, &request.options)
        .await;

    let status = match report.error_kind {
        Some(kind) if !report.success => status_for(kind),
        _ => StatusCode::OK,
    };
    (status, Json(report))
}

/// GET /api/datasource/tree - Enabled categories and datasources
pub async fn datasource_tree(State(state): State<ApiState>) -> impl IntoResponse {
    match state.executor.registry().tree().await {
        Ok(tree) => (StatusCode::OK, Json(ApiResponse::success(tree))),
        Err(e) => {
            tracing::error!("Failed to load datasource tree: {}", e);
            (status_for(e.kind()), Json(ApiResponse::error(e.to_string())))
        }
    }
}

// ============================================================================
// Single Datasource Endpoints
// ============================================================================

/// POST /api/execute-sql - Run one statement on one datasource
pub async fn execute_sql(
    State(state): State<ApiState>,
    Json(request): Json<ExecuteSqlRequest>,
) -> impl IntoResponse {
    match state
        .executor
        .run_single(&request.query, &request.datasource_code, &request.options)
        .await
    {
        Ok(result) => (StatusCode::OK, Json(ApiResponse::success(result))),
        Err(e) => (status_for(e.kind()), Json(ApiResponse::error(e.to_string()))),
    }
}

/// POST /api/execute-sql/validate - Check a statement without running it
pub async fn validate_sql(
    State(state): State<ApiState>,
    Json(request): Json<ValidateRequest>,
) -> impl IntoResponse {
    let response = match state.executor.guard().validate(&request.query) {
        Ok(kind) => ValidationResponse {
            valid: true,
            message: "statement is valid".to_string(),
            query_type: Some(kind),
        },
        Err(e) => ValidationResponse {
            valid: false,
            message: e.to_string(),
            query_type: None,
        },
    };
    (StatusCode::OK, Json(response))
}

/// GET /api/execute-sql/supported-operations - Allow-list and limits
pub async fn supported_operations(State(state): State<ApiState>) -> impl IntoResponse {
    let limits = state.executor.limits();
    let operations = SupportedOperations {
        allowed_operations: state.executor.guard().allowed_operations().to_vec(),
        default_timeout_ms: millis(limits.default_timeout),
        max_timeout_ms: millis(limits.max_timeout),
        max_rows: limits.max_rows,
        pool_size: state.executor.pool().size(),
    };
    (StatusCode::OK, Json(ApiResponse::success(operations)))
}

// ============================================================================
// Export Endpoints
// ============================================================================

/// POST /api/export-excel - Run one statement on one datasource as a workbook
pub async fn export_excel(
    State(state): State<ApiState>,
    Json(request): Json<ExportExcelRequest>,
) -> Response {
    let result = match state
        .executor
        .run_single(&request.query, &request.database, &request.options)
        .await
    {
        Ok(result) => result,
        Err(e) => {
            return (status_for(e.kind()), Json(ApiResponse::<()>::error(e.to_string())))
                .into_response()
        }
    };

    if !result.success {
        let message = result.error.clone().unwrap_or_else(|| result.message.clone());
        return (StatusCode::BAD_REQUEST, Json(ApiResponse::<()>::error(message))).into_response();
    }

    let filename = format!("{}.xlsx", export::safe_filename(&request.filename, "query_result"));
    workbook_response(export::result_workbook(&result), &filename)
}

/// POST /api/export-multi-datasource-excel - Federated run as one workbook
///
/// One sheet per requested datasource; failed backends get an error sheet.
pub async fn export_multi_datasource_excel(
    State(state): State<ApiState>,
    Json(request): Json<MultiExportRequest>,
) -> Response {
    let report = state
        .executor
        .run(&request.query, &request.datasource_codes, &request.options)
        .await;

    if report.results.is_empty() {
        let status = report.error_kind.map(status_for).unwrap_or(StatusCode::BAD_REQUEST);
        return (status, Json(report)).into_response();
    }

    let prefix = request
        .filename_prefix
        .as_deref()
        .map(|prefix| export::safe_filename(prefix, "multi_datasource_query"))
        .unwrap_or_else(|| "multi_datasource_query".to_string());
    let filename = format!(
        "{}_{}.xlsx",
        prefix,
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    );
    workbook_response(export::report_workbook(&report.results), &filename)
}

fn workbook_response(
    rendered: Result<Vec<u8>, crate::domain::FederationError>,
    filename: &str,
) -> Response {
    match rendered {
        Ok(bytes) => {
            tracing::info!(filename, bytes = bytes.len(), "workbook exported");
            let disposition = format!("attachment; filename=\"{}\"", filename);
            (
                [
                    (header::CONTENT_TYPE, XLSX_CONTENT_TYPE.to_string()),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                bytes,
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!("Failed to render workbook: {}", e);
            (status_for(e.kind()), Json(ApiResponse::<()>::error(e.to_string()))).into_response()
        }
    }
}
