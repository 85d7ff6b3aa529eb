use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::adapters::registry::DatasourceRegistry;
use crate::adapters::worker_pool::WorkerPool;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub checks: HealthChecks,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthChecks {
    pub catalog: String,
    pub worker_pool: String,
}

pub struct HealthHandler {
    registry: DatasourceRegistry,
    pool: Arc<WorkerPool>,
    start_time: std::time::Instant,
}

impl HealthHandler {
    pub fn new(registry: DatasourceRegistry, pool: Arc<WorkerPool>) -> Self {
        Self {
            registry,
            pool,
            start_time: std::time::Instant::now(),
        }
    }

    fn pool_check(&self) -> String {
        if self.pool.is_shut_down() {
            "stopped".to_string()
        } else {
            format!("{}/{} idle", self.pool.idle(), self.pool.size())
        }
    }

    /// Basic health check - returns 200 if server is running
    pub async fn health(&self) -> impl IntoResponse {
        let catalog = match self.registry.ping().await {
            Ok(()) => "ok".to_string(),
            Err(e) => format!("unavailable: {}", e),
        };
        let status = HealthStatus {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            checks: HealthChecks {
                catalog,
                worker_pool: self.pool_check(),
            },
        };

        (StatusCode::OK, Json(status))
    }

    /// Readiness check - the catalog answers and the pool accepts work
    pub async fn ready(&self) -> impl IntoResponse {
        if self.pool.is_shut_down() {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "not_ready",
                    "message": "Worker pool is shutting down"
                })),
            );
        }

        match self.registry.ping().await {
            Ok(()) => (
                StatusCode::OK,
                Json(serde_json::json!({
                    "status": "ready",
                    "message": "Server is ready to accept requests"
                })),
            ),
            Err(e) => {
                tracing::warn!("Readiness check failed: {}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(serde_json::json!({
                        "status": "not_ready",
                        "message": e.to_string()
                    })),
                )
            }
        }
    }

    /// Liveness check - returns 200 if server is alive
    pub async fn live(&self) -> impl IntoResponse {
        (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "alive",
                "message": "Server is alive"
            })),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_store::InMemoryDatasourceStore;

    fn handler() -> HealthHandler {
        let store = Arc::new(InMemoryDatasourceStore::new(vec![], vec![]));
        HealthHandler::new(DatasourceRegistry::new(store), Arc::new(WorkerPool::new(2)))
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let response = handler().health().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_endpoint() {
        let handler = handler();
        let response = handler.ready().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        handler.pool.shutdown().await;
        let response = handler.ready().await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_live_endpoint() {
        let response = handler().live().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
