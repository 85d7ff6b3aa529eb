//! Fan one statement out to many datasources and gather the results in order

use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::adapters::backend_executor::{ExecutionLimits, SingleBackendExecutor};
use crate::adapters::metrics_handler::MetricsCollector;
use crate::adapters::registry::{missing_codes, DatasourceRegistry};
use crate::adapters::sql_guard::SqlGuard;
use crate::adapters::worker_pool::WorkerPool;
use crate::domain::{
    DatasourceConfig, DatasourceQueryResult, FederatedQueryReport, FederationError, QueryOptions,
};

const PREVIEW_CHARS: usize = 50;

pub struct FederatedExecutor {
    guard: SqlGuard,
    registry: DatasourceRegistry,
    backend: Arc<SingleBackendExecutor>,
    pool: Arc<WorkerPool>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl FederatedExecutor {
    pub fn new(
        guard: SqlGuard,
        registry: DatasourceRegistry,
        backend: Arc<SingleBackendExecutor>,
        pool: Arc<WorkerPool>,
    ) -> Self {
        Self {
            guard,
            registry,
            backend,
            pool,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        metrics.pool_size.set(self.pool.size() as i64);
        self.metrics = Some(metrics);
        self
    }

    pub fn guard(&self) -> &SqlGuard {
        &self.guard
    }

    pub fn registry(&self) -> &DatasourceRegistry {
        &self.registry
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn limits(&self) -> &ExecutionLimits {
        self.backend.limits()
    }

    /// Run `statement` on every datasource in `codes`.
    ///
    /// The report is rejected when the statement fails validation or any code
    /// is unknown or disabled; in both cases no backend is contacted. Once
    /// dispatched, backend failures stay inside their own result and the
    /// report lists results in the order the codes were requested.
    pub async fn run(
        &self,
        statement: &str,
        codes: &[String],
        options: &QueryOptions,
    ) -> FederatedQueryReport {
        let started = Instant::now();
        let span = info_span!(
            "federated_query",
            request_id = %Uuid::new_v4(),
            datasources = codes.len()
        );

        async {
            info!(
                statement = %preview(statement),
                codes = ?codes,
                "starting federated query"
            );

            let report = match self.dispatch(statement, codes, options).await {
                Ok(results) => {
                    let report = FederatedQueryReport::completed(results, started.elapsed());
                    info!(
                        succeeded = report.succeeded_count(),
                        failed = report.failed_count(),
                        elapsed_ms = report.total_execution_time_ms,
                        "federated query finished"
                    );
                    report
                }
                Err(e) => {
                    warn!(error = %e, "federated query rejected");
                    FederatedQueryReport::rejected(&e, started.elapsed())
                }
            };

            if let Some(metrics) = &self.metrics {
                metrics.record_report(&report);
            }
            report
        }
        .instrument(span)
        .await
    }

    /// Run `statement` on one datasource through the shared pool.
    pub async fn run_single(
        &self,
        statement: &str,
        code: &str,
        options: &QueryOptions,
    ) -> Result<DatasourceQueryResult, FederationError> {
        self.guard.validate(statement)?;
        let config = self.registry.get_by_code(code).await?;
        info!(datasource = %code, statement = %preview(statement), "starting single query");

        let handle = self
            .pool
            .submit(self.task(config, statement, options).in_current_span())?;
        let result = handle
            .await
            .map_err(|e| FederationError::WorkerPool(format!("query task failed: {}", e)))??;

        if let Some(metrics) = &self.metrics {
            metrics.record_backend(&result);
        }
        Ok(result)
    }

    async fn dispatch(
        &self,
        statement: &str,
        codes: &[String],
        options: &QueryOptions,
    ) -> Result<Vec<DatasourceQueryResult>, FederationError> {
        self.guard.validate(statement)?;

        if codes.is_empty() {
            return Err(FederationError::DatasourceNotFound(
                "no datasource requested".to_string(),
            ));
        }

        let resolved = self.registry.get_by_codes(codes).await?;
        let missing = missing_codes(codes, &resolved);
        if !missing.is_empty() {
            return Err(FederationError::DatasourceNotFound(missing.join(", ")));
        }

        // One task per requested entry, repeats included.
        let configs: Vec<DatasourceConfig> = codes
            .iter()
            .filter_map(|code| resolved.get(code).cloned())
            .collect();

        let mut handles = Vec::with_capacity(configs.len());
        for config in &configs {
            let task = self.task(config.clone(), statement, options).in_current_span();
            match self.pool.submit(task) {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    handles.iter().for_each(|handle| handle.abort());
                    return Err(e);
                }
            }
        }

        let mut results = Vec::with_capacity(handles.len());
        for (config, joined) in configs.iter().zip(join_all(handles).await) {
            let error = match joined {
                Ok(Ok(result)) => {
                    results.push(result);
                    continue;
                }
                Ok(Err(pool_error)) => pool_error,
                Err(join_error) => {
                    FederationError::WorkerPool(format!("query task aborted: {}", join_error))
                }
            };
            warn!(datasource = %config.code, error = %error, "query task did not run");
            results.push(DatasourceQueryResult::failed(config, &error, Duration::ZERO));
        }
        Ok(results)
    }

    fn task(
        &self,
        config: DatasourceConfig,
        statement: &str,
        options: &QueryOptions,
    ) -> impl std::future::Future<Output = DatasourceQueryResult> + Send + 'static {
        let backend = self.backend.clone();
        let statement = statement.to_string();
        let options = options.clone();
        async move { backend.run(&config, &statement, &options).await }
    }
}

/// First characters of a statement for log lines.
fn preview(statement: &str) -> String {
    let statement = statement.trim();
    match statement.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &statement[..cut]),
        None => statement.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview() {
        assert_eq!(preview("  SELECT 1  "), "SELECT 1");
        let long = format!("SELECT {} FROM t", "a, ".repeat(40));
        let cut = preview(&long);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), PREVIEW_CHARS + 3);
    }
}
