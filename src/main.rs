use clap::Parser;
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
use fedsql::cli::{Cli, Command};
use fedsql::config::Settings;
use fedsql::domain::DatasourceStore;
use fedsql::persistence::CatalogStore;
use secrecy::SecretString;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command() {
        Command::Serve => serve(&cli).await,
        Command::GenerateKey => {
            println!("{}", CredentialCipher::generate_secret());
            Ok(())
        }
        Command::Encrypt { plaintext } => {
            println!("{}", cipher_for(&cli)?.encrypt(&plaintext)?);
            Ok(())
        }
        Command::Decrypt { ciphertext } => {
            println!("{}", cipher_for(&cli)?.decrypt(&ciphertext)?);
            Ok(())
        }
    }
}

/// The password tool takes the secret from the command line first, then from settings.
fn cipher_for(cli: &Cli) -> anyhow::Result<CredentialCipher> {
    let secret = match &cli.secret_key {
        Some(key) => SecretString::from(key.clone()),
        None => Settings::new_with_cli(cli)?
            .encryption
            .secret()
            .ok_or_else(|| anyhow::anyhow!("encryption.secret_key is not configured"))?,
    };
    Ok(CredentialCipher::new(&secret)?)
}

async fn serve(cli: &Cli) -> anyhow::Result<()> {
    let settings = Settings::new_with_cli(cli)?;
    let host = settings.server.host.clone();
    let port = settings.server.port;

    info!("Starting fedsql on {}:{}", host, port);

    let secret = settings
        .encryption
        .secret()
        .ok_or_else(|| anyhow::anyhow!("encryption.secret_key is not configured"))?;
    let cipher = Arc::new(CredentialCipher::new(&secret)?);

    // Datasources come from the SQL catalog when one is configured, else from the settings.
    let (store, catalog): (Arc<dyn DatasourceStore>, Option<CatalogStore>) = match &settings.catalog {
        Some(catalog_config) => {
            let catalog = CatalogStore::new(catalog_config).await?;
            catalog.prepare(&settings).await?;
            let store: Arc<dyn DatasourceStore> = catalog.datasources();
            (store, Some(catalog))
        }
        None => {
            info!(
                "Serving {} datasources from configuration",
                settings.datasources.len()
            );
            let store: Arc<dyn DatasourceStore> = Arc::new(InMemoryDatasourceStore::new(
                settings.categories.clone(),
                settings.datasources.clone(),
            ));
            (store, None)
        }
    };

    let registry = DatasourceRegistry::new(store);
    let pool = Arc::new(WorkerPool::new(settings.executor.pool_size));
    let backend = Arc::new(SingleBackendExecutor::new(
        cipher,
        Arc::new(SqlxConnector::new()),
        ExecutionLimits::from_settings(&settings.executor),
    ));
    let metrics = Arc::new(MetricsCollector::new()?);
    let executor = FederatedExecutor::new(
        SqlGuard::new(&settings.executor.allowed_operations)?,
        registry.clone(),
        backend,
        pool.clone(),
    )
    .with_metrics(metrics.clone());

    let app = fedsql::create_app(
        ApiState {
            executor: Arc::new(executor),
        },
        Arc::new(HealthHandler::new(registry, pool.clone())),
        Arc::new(MetricsHandler::new(metrics)),
    );

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.shutdown().await;
    if let Some(catalog) = catalog {
        catalog.close().await;
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on SIGINT (Ctrl+C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT (Ctrl+C), initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
