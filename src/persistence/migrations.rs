//! Catalog schema migrations

use crate::persistence::error::PersistenceError;
use crate::persistence::pool::ConnectionPool;
use sha2::{Digest, Sha256};
use sqlx::Row;

const MIGRATIONS_TABLE: &str = "_fedsql_migrations";

/// Category and datasource tables. Kept to types every supported backend accepts.
const MIGRATION_001_CATALOG: &str = r#"
CREATE TABLE IF NOT EXISTS datasource_category (
    id BIGINT PRIMARY KEY,
    category_name VARCHAR(255) NOT NULL,
    category_code VARCHAR(255) NOT NULL UNIQUE,
    parent_id BIGINT,
    sort_order INTEGER,
    description TEXT,
    is_enabled SMALLINT NOT NULL DEFAULT 1,
    created_at VARCHAR(64) NOT NULL,
    updated_at VARCHAR(64) NOT NULL
);

CREATE TABLE IF NOT EXISTS datasource_config (
    id BIGINT PRIMARY KEY,
    datasource_code VARCHAR(255) NOT NULL UNIQUE,
    datasource_name VARCHAR(255) NOT NULL,
    category_id BIGINT,
    db_type VARCHAR(64),
    host VARCHAR(255),
    port INTEGER,
    database_name VARCHAR(255),
    jdbc_url TEXT,
    username VARCHAR(255),
    -- ciphertext, or plaintext for rows not yet migrated
    password TEXT,
    is_enabled SMALLINT NOT NULL DEFAULT 1,
    max_pool_size INTEGER,
    min_idle INTEGER,
    connection_timeout BIGINT,
    description TEXT,
    created_at VARCHAR(64) NOT NULL,
    updated_at VARCHAR(64) NOT NULL
);
"#;

struct Migration {
    name: &'static str,
    sql: &'static str,
}

impl Migration {
    fn checksum(&self) -> String {
        format!("{:x}", Sha256::digest(self.sql.as_bytes()))
    }

    /// Statements with comment lines removed.
    fn statements(&self) -> impl Iterator<Item = String> + '_ {
        self.sql
            .split(';')
            .map(|chunk| {
                chunk
                    .lines()
                    .filter(|line| !line.trim_start().starts_with("--"))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .map(|statement| statement.trim().to_string())
            .filter(|statement| !statement.is_empty())
    }
}

fn get_migrations() -> Vec<Migration> {
    vec![Migration {
        name: "001_datasource_catalog",
        sql: MIGRATION_001_CATALOG,
    }]
}

/// Migration runner for the catalog
pub struct MigrationRunner {
    pool: ConnectionPool,
}

impl MigrationRunner {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations
    pub async fn migrate_up(&self) -> Result<MigrationResult, PersistenceError> {
        let mut applied = 0;
        let mut skipped = 0;

        self.ensure_migrations_table().await?;

        for migration in get_migrations() {
            if let Some(checksum) = self.applied_checksum(migration.name).await? {
                if checksum != migration.checksum() {
                    tracing::warn!(
                        "Migration '{}' changed since it was applied",
                        migration.name
                    );
                }
                tracing::debug!("Migration '{}' already applied, skipping", migration.name);
                skipped += 1;
                continue;
            }

            tracing::info!("Applying migration: {}", migration.name);

            for statement in migration.statements() {
                sqlx::query(&statement)
                    .execute(self.pool.pool())
                    .await
                    .map_err(|e| {
                        PersistenceError::Migration(format!(
                            "Failed to execute migration '{}': {}",
                            migration.name, e
                        ))
                    })?;
            }

            self.record_migration(migration.name, &migration.checksum())
                .await?;

            tracing::info!("Migration '{}' applied successfully", migration.name);
            applied += 1;
        }

        Ok(MigrationResult { applied, skipped })
    }

    pub async fn status(&self) -> Result<Vec<MigrationStatus>, PersistenceError> {
        self.ensure_migrations_table().await?;

        let mut statuses = Vec::new();
        for migration in get_migrations() {
            let applied_at = self.applied_at(migration.name).await?;
            statuses.push(MigrationStatus {
                name: migration.name.to_string(),
                applied: applied_at.is_some(),
                applied_at,
            });
        }

        Ok(statuses)
    }

    async fn ensure_migrations_table(&self) -> Result<(), PersistenceError> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                name VARCHAR(255) PRIMARY KEY,
                applied_at VARCHAR(64) NOT NULL,
                checksum VARCHAR(64) NOT NULL
            )",
            MIGRATIONS_TABLE
        );

        sqlx::query(&sql)
            .execute(self.pool.pool())
            .await
            .map_err(|e| {
                PersistenceError::Migration(format!("Failed to create migrations table: {}", e))
            })?;

        Ok(())
    }

    async fn applied_checksum(&self, name: &str) -> Result<Option<String>, PersistenceError> {
        self.lookup(name, "checksum").await
    }

    async fn applied_at(&self, name: &str) -> Result<Option<String>, PersistenceError> {
        self.lookup(name, "applied_at").await
    }

    async fn lookup(&self, name: &str, column: &str) -> Result<Option<String>, PersistenceError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE name = {}",
            column,
            MIGRATIONS_TABLE,
            self.pool.placeholders(1, 1)
        );
        let row = sqlx::query(&sql)
            .bind(name)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| {
                PersistenceError::Migration(format!("Failed to check migration status: {}", e))
            })?;

        row.map(|row| row.try_get::<String, _>(column))
            .transpose()
            .map_err(PersistenceError::from)
    }

    async fn record_migration(&self, name: &str, checksum: &str) -> Result<(), PersistenceError> {
        let now = chrono::Utc::now().to_rfc3339();
        let sql = format!(
            "INSERT INTO {} (name, applied_at, checksum) VALUES ({})",
            MIGRATIONS_TABLE,
            self.pool.placeholders(1, 3)
        );

        sqlx::query(&sql)
            .bind(name)
            .bind(&now)
            .bind(checksum)
            .execute(self.pool.pool())
            .await
            .map_err(|e| PersistenceError::Migration(format!("Failed to record migration: {}", e)))?;

        Ok(())
    }
}

/// Result of running migrations
#[derive(Debug)]
pub struct MigrationResult {
    /// Number of migrations applied
    pub applied: usize,
    /// Number of migrations skipped (already applied)
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct MigrationStatus {
    pub name: String,
    pub applied: bool,
    pub applied_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statements_drop_comments() {
        let migration = &get_migrations()[0];
        let statements: Vec<_> = migration.statements().collect();
        assert_eq!(statements.len(), 2);
        assert!(statements[1].starts_with("CREATE TABLE IF NOT EXISTS datasource_config"));
        assert!(!statements[1].contains("--"));
        assert_eq!(migration.checksum().len(), 64);
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let pool = ConnectionPool::new("sqlite::memory:", 1, 5).await.unwrap();
        let runner = MigrationRunner::new(pool);

        let first = runner.migrate_up().await.unwrap();
        assert_eq!(first.applied, 1);

        let second = runner.migrate_up().await.unwrap();
        assert_eq!(second.applied, 0);
        assert_eq!(second.skipped, 1);

        let status = runner.status().await.unwrap();
        assert!(status[0].applied);
        assert!(status[0].applied_at.is_some());
    }
}
