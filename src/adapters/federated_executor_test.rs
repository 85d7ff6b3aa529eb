use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;

use crate::adapters::backend_executor::{ExecutionLimits, SingleBackendExecutor};
use crate::adapters::encryption::CredentialCipher;
use crate::adapters::federated_executor::FederatedExecutor;
use crate::adapters::memory_store::InMemoryDatasourceStore;
use crate::adapters::metrics_handler::MetricsCollector;
use crate::adapters::registry::DatasourceRegistry;
use crate::adapters::sql_guard::SqlGuard;
use crate::adapters::test_support::{Script, ScriptedConnector};
use crate::adapters::worker_pool::WorkerPool;
use crate::domain::{DatasourceConfig, ErrorKind, FederationError, QueryOptions, SqlValue};

fn datasource(code: &str) -> DatasourceConfig {
    DatasourceConfig::new(code, format!("{} reporting", code), "mysql://db.internal/app")
}

fn setup(
    connector: ScriptedConnector,
    datasources: Vec<DatasourceConfig>,
    pool_size: usize,
) -> (FederatedExecutor, Arc<ScriptedConnector>) {
    let connector = Arc::new(connector);
    let cipher =
        Arc::new(CredentialCipher::new(&SecretString::from("test-secret".to_string())).unwrap());
    let backend = SingleBackendExecutor::new(
        cipher,
        connector.clone(),
        ExecutionLimits {
            default_timeout: Duration::from_secs(5),
            max_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(1),
            max_rows: 1_000,
        },
    );
    let store = Arc::new(InMemoryDatasourceStore::new(vec![], datasources));
    let executor = FederatedExecutor::new(
        SqlGuard::new(["SELECT", "INSERT", "UPDATE", "DELETE", "WITH"]).unwrap(),
        DatasourceRegistry::new(store),
        Arc::new(backend),
        Arc::new(WorkerPool::new(pool_size)),
    );
    (executor, connector)
}

fn codes(codes: &[&str]) -> Vec<String> {
    codes.iter().map(|c| c.to_string()).collect()
}

fn one_row(value: i64) -> Script {
    Script::rows(&["n"], vec![vec![SqlValue::Int(value)]])
}

#[tokio::test]
async fn test_results_follow_request_order() {
    let connector = ScriptedConnector::default()
        .with("A", one_row(1).delayed(Duration::from_millis(80)))
        .with("B", one_row(2).delayed(Duration::from_millis(5)))
        .with("C", one_row(3).delayed(Duration::from_millis(40)));
    let (executor, _) = setup(
        connector,
        vec![datasource("C"), datasource("A"), datasource("B")],
        4,
    );

    let report = executor
        .run("SELECT n FROM t", &codes(&["A", "B", "C"]), &QueryOptions::default())
        .await;

    assert!(report.success);
    assert_eq!(report.message, "success 3/3, failed 0/3");
    let order: Vec<_> = report.results.iter().map(|r| r.datasource_code.as_str()).collect();
    assert_eq!(order, vec!["A", "B", "C"]);
    assert_eq!(report.results[0].data[0].get("n"), Some(&SqlValue::Int(1)));
    assert_eq!(report.results[2].data[0].get("n"), Some(&SqlValue::Int(3)));
    assert_eq!(report.results[0].datasource_name, "A reporting");
}

#[tokio::test]
async fn test_unknown_code_rejects_before_dispatch() {
    let connector = ScriptedConnector::default().with("A", one_row(1));
    let (executor, connector) = setup(connector, vec![datasource("A")], 2);

    let report = executor
        .run("SELECT 1", &codes(&["A", "B"]), &QueryOptions::default())
        .await;

    assert!(!report.success);
    assert!(report.results.is_empty());
    assert_eq!(report.error_kind, Some(ErrorKind::DatasourceNotFound));
    assert!(report.message.contains('B'));
    assert!(!report.message.contains('A'));
    assert!(connector.calls().is_empty());
}

#[tokio::test]
async fn test_disabled_code_rejects_before_dispatch() {
    let mut disabled = datasource("B");
    disabled.enabled = false;
    let (executor, connector) = setup(
        ScriptedConnector::default().with("A", one_row(1)),
        vec![datasource("A"), disabled],
        2,
    );

    let report = executor
        .run("SELECT 1", &codes(&["A", "B"]), &QueryOptions::default())
        .await;

    assert!(!report.success);
    assert!(report.message.ends_with('B'));
    assert!(!connector.called("A"));
}

#[tokio::test]
async fn test_failure_is_contained_per_backend() {
    let connector = ScriptedConnector::default()
        .with("A", Script::fail("host unreachable"))
        .with("B", one_row(7));
    let (executor, _) = setup(connector, vec![datasource("A"), datasource("B")], 2);

    let report = executor
        .run("SELECT n FROM t", &codes(&["A", "B"]), &QueryOptions::default())
        .await;

    assert!(report.success);
    assert_eq!(report.message, "success 1/2, failed 1/2");
    let failed = &report.results[0];
    assert!(!failed.success);
    assert!(failed.data.is_empty());
    assert_eq!(failed.error_kind, Some(ErrorKind::ConnectionFailure));
    assert!(report.results[1].success);
    assert_eq!(report.results[1].row_count, 1);
}

#[tokio::test]
async fn test_pool_bounds_concurrency() {
    let names = ["A", "B", "C", "D", "E"];
    let connector = names.iter().fold(ScriptedConnector::default(), |c, name| {
        c.with(name, one_row(1).delayed(Duration::from_millis(30)))
    });
    let (executor, connector) = setup(connector, names.iter().map(|n| datasource(n)).collect(), 2);

    let report = executor
        .run("SELECT n FROM t", &codes(&names), &QueryOptions::default())
        .await;

    assert_eq!(report.results.len(), 5);
    assert!(report.results.iter().all(|r| r.success));
    assert!(connector.peak_concurrency() <= 2);
    assert_eq!(connector.calls().len(), 5);
}

#[tokio::test]
async fn test_timeout_applies_per_backend() {
    let connector = ScriptedConnector::default()
        .with("SLOW", one_row(1).delayed(Duration::from_millis(500)))
        .with("FAST", one_row(2));
    let (executor, _) = setup(connector, vec![datasource("SLOW"), datasource("FAST")], 2);

    let options = QueryOptions {
        timeout_ms: Some(50),
        ..Default::default()
    };
    let report = executor
        .run("SELECT n FROM t", &codes(&["SLOW", "FAST"]), &options)
        .await;

    assert!(report.success);
    assert_eq!(report.results[0].error_kind, Some(ErrorKind::TimeoutExceeded));
    assert!(report.results[1].success);
}

#[tokio::test]
async fn test_guard_rejection_dispatches_nothing() {
    let (executor, connector) = setup(
        ScriptedConnector::default().with("A", one_row(1)),
        vec![datasource("A")],
        2,
    );

    for statement in ["DROP TABLE users", "SELECT * FROM t WHERE a = '' OR 1=1", "SELECT 1; DELETE FROM t"] {
        let report = executor
            .run(statement, &codes(&["A"]), &QueryOptions::default())
            .await;
        assert!(!report.success, "{statement}");
        assert_eq!(report.error_kind, Some(ErrorKind::InvalidStatement));
    }
    assert!(connector.calls().is_empty());
}

#[tokio::test]
async fn test_empty_and_repeated_codes() {
    let (executor, connector) = setup(
        ScriptedConnector::default()
            .with("A", one_row(1))
            .with("B", one_row(2)),
        vec![datasource("A"), datasource("B")],
        2,
    );

    let report = executor.run("SELECT 1", &[], &QueryOptions::default()).await;
    assert!(!report.success);
    assert_eq!(report.error_kind, Some(ErrorKind::DatasourceNotFound));

    let report = executor
        .run("SELECT 1", &codes(&["A", "B", "A"]), &QueryOptions::default())
        .await;
    assert!(report.success);
    let order: Vec<&str> = report
        .results
        .iter()
        .map(|r| r.datasource_code.as_str())
        .collect();
    assert_eq!(order, vec!["A", "B", "A"]);
    assert_eq!(report.message, "success 3/3, failed 0/3");
    assert_eq!(connector.calls().len(), 3);
}

#[tokio::test]
async fn test_rows_capped_by_options() {
    let (executor, connector) = setup(
        ScriptedConnector::default().with("A", one_row(1)),
        vec![datasource("A")],
        1,
    );
    let options = QueryOptions {
        max_rows: Some(25),
        ..Default::default()
    };

    executor.run("SELECT n FROM t;", &codes(&["A"]), &options).await;

    let call = &connector.calls()[0];
    assert_eq!(call.statement, "SELECT n FROM t LIMIT 25");
    assert_eq!(call.max_rows, Some(25));
}

#[tokio::test]
async fn test_run_single() {
    let mut disabled = datasource("OFF");
    disabled.enabled = false;
    let (executor, _) = setup(
        ScriptedConnector::default().with("A", Script::affected(3)),
        vec![datasource("A"), disabled],
        1,
    );

    let result = executor
        .run_single("UPDATE t SET a = 1", "A", &QueryOptions::default())
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.rows_affected, 3);

    let missing = executor
        .run_single("SELECT 1", "NOPE", &QueryOptions::default())
        .await;
    assert!(matches!(missing, Err(FederationError::DatasourceNotFound(_))));

    let off = executor
        .run_single("SELECT 1", "OFF", &QueryOptions::default())
        .await;
    assert!(matches!(off, Err(FederationError::DatasourceDisabled(_))));

    let invalid = executor
        .run_single("TRUNCATE t", "A", &QueryOptions::default())
        .await;
    assert!(matches!(invalid, Err(FederationError::InvalidStatement(_))));
}

#[tokio::test]
async fn test_shut_down_pool_rejects_report() {
    let (executor, _) = setup(
        ScriptedConnector::default().with("A", one_row(1)),
        vec![datasource("A")],
        1,
    );
    executor.pool().shutdown().await;

    let report = executor
        .run("SELECT 1", &codes(&["A"]), &QueryOptions::default())
        .await;
    assert!(!report.success);
    assert_eq!(report.error_kind, Some(ErrorKind::WorkerPool));
}

#[tokio::test]
async fn test_metrics_recorded() {
    let metrics = Arc::new(MetricsCollector::new().unwrap());
    let (executor, _) = setup(
        ScriptedConnector::default()
            .with("A", one_row(1))
            .with("B", Script::fail("refused")),
        vec![datasource("A"), datasource("B")],
        3,
    );
    let executor = executor.with_metrics(metrics.clone());

    executor
        .run("SELECT 1", &codes(&["A", "B"]), &QueryOptions::default())
        .await;
    executor.run("DROP TABLE t", &codes(&["A"]), &QueryOptions::default()).await;

    let text = metrics.encode().unwrap();
    assert!(text.contains("fedsql_federated_queries_total{outcome=\"completed\"} 1"));
    assert!(text.contains("fedsql_federated_queries_total{outcome=\"rejected\"} 1"));
    assert!(text.contains("fedsql_backend_queries_total{datasource=\"B\",status=\"failure\"} 1"));
    assert!(text.contains("fedsql_worker_pool_size 3"));
}
