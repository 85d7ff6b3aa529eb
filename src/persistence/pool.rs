//! Catalog connection pool management

use crate::domain::DriverKind;
use crate::persistence::error::PersistenceError;
use sqlx::{any::AnyPoolOptions, AnyPool};
use std::time::Duration;

/// Connection pool wrapper with backend information
#[derive(Clone)]
pub struct ConnectionPool {
    pool: AnyPool,
    backend: DriverKind,
}

impl ConnectionPool {
    /// Create a new connection pool from a database URL
    ///
    /// # Arguments
    ///
    /// * `url` - Database connection URL (sqlite://, postgres://, mysql://)
    /// * `max_connections` - Maximum number of connections in the pool
    /// * `connect_timeout_secs` - Connection timeout in seconds
    pub async fn new(
        url: &str,
        max_connections: u32,
        connect_timeout_secs: u64,
    ) -> Result<Self, PersistenceError> {
        // Install default drivers for sqlx::any
        sqlx::any::install_default_drivers();

        let backend = DriverKind::from_url(url).ok_or_else(|| {
            PersistenceError::Connection(format!(
                "Unsupported catalog URL. Expected sqlite://, postgres://, or mysql://. Got: {}",
                url.split(':').next().unwrap_or("unknown")
            ))
        })?;

        tracing::info!(
            "Connecting to {} catalog with max {} connections",
            backend.name(),
            max_connections
        );

        let pool = AnyPoolOptions::new()
            .max_connections(max_connections.max(1))
            .acquire_timeout(Duration::from_secs(connect_timeout_secs))
            .connect(url.strip_prefix("jdbc:").unwrap_or(url))
            .await
            .map_err(|e| PersistenceError::Connection(e.to_string()))?;

        tracing::info!("Successfully connected to {} catalog", backend.name());

        Ok(Self { pool, backend })
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn backend(&self) -> DriverKind {
        self.backend
    }

    /// Comma-separated bind placeholders `first..first + count` for this backend.
    pub fn placeholders(&self, first: usize, count: usize) -> String {
        (first..first + count)
            .map(|i| self.backend.placeholder(i))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Check if the database connection is healthy
    pub async fn health_check(&self) -> Result<(), PersistenceError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| PersistenceError::Connection(format!("Health check failed: {}", e)))?;
        Ok(())
    }

    /// Close the connection pool
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_pool() {
        let pool = ConnectionPool::new("sqlite::memory:", 1, 5).await.unwrap();
        assert_eq!(pool.backend(), DriverKind::Sqlite);
        assert_eq!(pool.placeholders(1, 3), "?, ?, ?");
        assert!(pool.health_check().await.is_ok());
    }

    #[tokio::test]
    async fn test_unsupported_url() {
        let result = ConnectionPool::new("oracle://db/x", 1, 5).await;
        assert!(matches!(result, Err(PersistenceError::Connection(_))));
    }
}
