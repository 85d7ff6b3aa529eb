use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

use crate::domain::{DatasourceQueryResult, FederatedQueryReport};

pub struct MetricsCollector {
    registry: Registry,

    // Federated runs
    pub federated_queries: CounterVec,
    pub federated_duration: HistogramVec,

    // Per-backend calls
    pub backend_queries: CounterVec,
    pub backend_duration: HistogramVec,

    pub pool_size: IntGauge,
}

impl MetricsCollector {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let federated_queries = CounterVec::new(
            Opts::new("fedsql_federated_queries_total", "Total federated runs"),
            &["outcome"],
        )?;
        registry.register(Box::new(federated_queries.clone()))?;

        let federated_duration = HistogramVec::new(
            HistogramOpts::new(
                "fedsql_federated_duration_seconds",
                "Wall time of a federated run",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(federated_duration.clone()))?;

        let backend_queries = CounterVec::new(
            Opts::new("fedsql_backend_queries_total", "Total statements sent to backends"),
            &["datasource", "status"],
        )?;
        registry.register(Box::new(backend_queries.clone()))?;

        let backend_duration = HistogramVec::new(
            HistogramOpts::new(
                "fedsql_backend_duration_seconds",
                "Execution time reported by one backend",
            ),
            &["datasource"],
        )?;
        registry.register(Box::new(backend_duration.clone()))?;

        let pool_size = IntGauge::new("fedsql_worker_pool_size", "Configured worker pool size")?;
        registry.register(Box::new(pool_size.clone()))?;

        Ok(Self {
            registry,
            federated_queries,
            federated_duration,
            backend_queries,
            backend_duration,
            pool_size,
        })
    }

    pub fn record_backend(&self, result: &DatasourceQueryResult) {
        let status = if result.success { "success" } else { "failure" };
        self.backend_queries
            .with_label_values(&[result.datasource_code.as_str(), status])
            .inc();
        self.backend_duration
            .with_label_values(&[result.datasource_code.as_str()])
            .observe(result.execution_time_ms as f64 / 1000.0);
    }

    pub fn record_report(&self, report: &FederatedQueryReport) {
        let outcome = if report.success { "completed" } else { "rejected" };
        self.federated_queries.with_label_values(&[outcome]).inc();
        self.federated_duration
            .with_label_values(&[outcome])
            .observe(report.total_execution_time_ms as f64 / 1000.0);
        report
            .results
            .iter()
            .for_each(|result| self.record_backend(result));
    }

    pub fn encode(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

pub struct MetricsHandler {
    collector: Arc<MetricsCollector>,
}

impl MetricsHandler {
    pub fn new(collector: Arc<MetricsCollector>) -> Self {
        Self { collector }
    }

    pub async fn metrics(&self) -> String {
        self.collector.encode().unwrap_or_else(|e| {
            tracing::error!("Failed to encode metrics: {}", e);
            String::from("# Error encoding metrics\n")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DatasourceConfig, FederationError};
    use std::time::Duration;

    #[test]
    fn test_record_report() {
        let collector = MetricsCollector::new().unwrap();
        let config = DatasourceConfig::new("ORDERS", "orders", "sqlite::memory:");
        let report = FederatedQueryReport::completed(
            vec![
                DatasourceQueryResult::succeeded(&config, vec![], 0, Duration::from_millis(12)),
                DatasourceQueryResult::failed(
                    &config,
                    &FederationError::ConnectionFailure("refused".into()),
                    Duration::from_millis(3),
                ),
            ],
            Duration::from_millis(15),
        );
        collector.record_report(&report);

        let text = collector.encode().unwrap();
        assert!(text.contains("fedsql_federated_queries_total{outcome=\"completed\"} 1"));
        assert!(text.contains("fedsql_backend_queries_total{datasource=\"ORDERS\",status=\"failure\"} 1"));
        assert!(text.contains("fedsql_backend_queries_total{datasource=\"ORDERS\",status=\"success\"} 1"));
    }

    #[tokio::test]
    async fn test_metrics_handler() {
        let collector = Arc::new(MetricsCollector::new().unwrap());
        let handler = MetricsHandler::new(collector.clone());

        collector.pool_size.set(4);

        let metrics = handler.metrics().await;
        assert!(metrics.contains("fedsql_worker_pool_size 4"));
    }
}
