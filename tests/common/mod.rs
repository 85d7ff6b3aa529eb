#![allow(dead_code)]

use axum::Router;
use fedsql::adapters::api_handler::ApiState;
use fedsql::adapters::backend_executor::{ExecutionLimits, SingleBackendExecutor};
use fedsql::adapters::encryption::CredentialCipher;
use fedsql::adapters::federated_executor::FederatedExecutor;
use fedsql::adapters::health_handler::HealthHandler;
use fedsql::adapters::memory_store::InMemoryDatasourceStore;
use fedsql::adapters::metrics_handler::{MetricsCollector, MetricsHandler};
use fedsql::adapters::registry::DatasourceRegistry;
use fedsql::adapters::sql_guard::SqlGuard;
use fedsql::adapters::sqlx_connector::SqlxConnector;
use fedsql::adapters::worker_pool::WorkerPool;
use fedsql::config::ExecutorSettings;
use fedsql::domain::DatasourceConfig;
use secrecy::SecretString;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection};
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

pub const SECRET: &str = "integration-test-secret";

/// Create a SQLite file with an `items` table holding `labels` and return its URL.
pub async fn seed_backend(dir: &Path, name: &str, labels: &[&str]) -> anyhow::Result<String> {
    let url = format!("sqlite://{}", dir.join(format!("{}.db", name)).display());
    let mut conn: SqliteConnection = SqliteConnectOptions::from_str(&url)?
        .create_if_missing(true)
        .connect()
        .await?;

    sqlx::raw_sql("CREATE TABLE items (id INTEGER PRIMARY KEY, label TEXT NOT NULL)")
        .execute(&mut conn)
        .await?;
    for (idx, label) in labels.iter().enumerate() {
        sqlx::query("INSERT INTO items (id, label) VALUES (?, ?)")
            .bind(idx as i64 + 1)
            .bind(*label)
            .execute(&mut conn)
            .await?;
    }
    conn.close().await?;
    Ok(url)
}

pub fn cipher() -> Arc<CredentialCipher> {
    Arc::new(CredentialCipher::new(&SecretString::from(SECRET.to_string())).unwrap())
}

pub fn codes(codes: &[&str]) -> Vec<String> {
    codes.iter().map(|c| c.to_string()).collect()
}

/// A fully wired executor over an in-memory catalog.
pub struct Harness {
    pub executor: Arc<FederatedExecutor>,
    pub registry: DatasourceRegistry,
    pub pool: Arc<WorkerPool>,
    pub metrics: Arc<MetricsCollector>,
}

impl Harness {
    pub fn new(datasources: Vec<DatasourceConfig>) -> Self {
        let settings = ExecutorSettings {
            pool_size: 4,
            ..Default::default()
        };
        let store = Arc::new(InMemoryDatasourceStore::new(vec![], datasources));
        let registry = DatasourceRegistry::new(store);
        let pool = Arc::new(WorkerPool::new(settings.pool_size));
        let backend = SingleBackendExecutor::new(
            cipher(),
            Arc::new(SqlxConnector::new()),
            ExecutionLimits::from_settings(&settings),
        );
        let metrics = Arc::new(MetricsCollector::new().unwrap());
        let executor = FederatedExecutor::new(
            SqlGuard::new(&settings.allowed_operations).unwrap(),
            registry.clone(),
            Arc::new(backend),
            pool.clone(),
        )
        .with_metrics(metrics.clone());

        Self {
            executor: Arc::new(executor),
            registry,
            pool,
            metrics,
        }
    }

    pub fn app(&self) -> Router {
        fedsql::create_app(
            ApiState {
                executor: self.executor.clone(),
            },
            Arc::new(HealthHandler::new(self.registry.clone(), self.pool.clone())),
            Arc::new(MetricsHandler::new(self.metrics.clone())),
        )
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub base_url: String,
}

impl TestServer {
    pub async fn start(app: Router) -> Self {
        // Start server on random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        TestServer { addr, base_url }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}
