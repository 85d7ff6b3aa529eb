//! SQL-backed datasource catalog

use crate::domain::{DatasourceCategory, DatasourceConfig, DatasourceStore, FederationError};
use crate::persistence::error::PersistenceError;
use crate::persistence::pool::ConnectionPool;
use async_trait::async_trait;
use sqlx::any::AnyRow;
use sqlx::Row;

const CATEGORY_COLUMNS: &str =
    "id, category_name, category_code, parent_id, sort_order, description, is_enabled";

const DATASOURCE_COLUMNS: &str = "id, datasource_code, datasource_name, category_id, db_type, \
     host, port, database_name, jdbc_url, username, password, is_enabled, max_pool_size, \
     min_idle, connection_timeout, description";

/// Reads and writes the `datasource_category` / `datasource_config` tables.
pub struct SqlxDatasourceStore {
    pool: ConnectionPool,
}

impl SqlxDatasourceStore {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    pub async fn count_datasources(&self) -> Result<i64, PersistenceError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM datasource_config")
            .fetch_one(self.pool.pool())
            .await?;
        Ok(int_column(&row, "count")?.unwrap_or(0))
    }

    pub async fn insert_category(&self, category: &DatasourceCategory) -> Result<(), PersistenceError> {
        let now = chrono::Utc::now().to_rfc3339();
        let sql = format!(
            "INSERT INTO datasource_category ({}, created_at, updated_at) VALUES ({})",
            CATEGORY_COLUMNS,
            self.pool.placeholders(1, 9)
        );

        sqlx::query(&sql)
            .bind(category.id)
            .bind(&category.name)
            .bind(&category.code)
            .bind(category.parent_id)
            .bind(category.sort_order)
            .bind(&category.description)
            .bind(i16::from(category.enabled))
            .bind(&now)
            .bind(&now)
            .execute(self.pool.pool())
            .await
            .map_err(|e| duplicate_or(e, "category", &category.code))?;

        Ok(())
    }

    /// Insert a datasource, assigning the next free id when it has none.
    pub async fn insert_datasource(&self, config: &DatasourceConfig) -> Result<i64, PersistenceError> {
        let id = match config.id {
            Some(id) => id,
            None => self.next_datasource_id().await?,
        };
        let now = chrono::Utc::now().to_rfc3339();
        let sql = format!(
            "INSERT INTO datasource_config ({}, created_at, updated_at) VALUES ({})",
            DATASOURCE_COLUMNS,
            self.pool.placeholders(1, 18)
        );

        sqlx::query(&sql)
            .bind(id)
            .bind(&config.code)
            .bind(&config.name)
            .bind(config.category_id)
            .bind(&config.driver)
            .bind(&config.host)
            .bind(config.port.map(i32::from))
            .bind(&config.database)
            .bind(&config.url)
            .bind(&config.username)
            .bind(&config.password)
            .bind(i16::from(config.enabled))
            .bind(config.max_pool_size.map(|n| n as i32))
            .bind(config.min_idle.map(|n| n as i32))
            .bind(config.connection_timeout_ms.map(|ms| ms as i64))
            .bind(&config.description)
            .bind(&now)
            .bind(&now)
            .execute(self.pool.pool())
            .await
            .map_err(|e| duplicate_or(e, "datasource", &config.code))?;

        Ok(id)
    }

    pub async fn set_enabled(&self, code: &str, enabled: bool) -> Result<(), PersistenceError> {
        let sql = self.update_sql("is_enabled");
        let result = sqlx::query(&sql)
            .bind(i16::from(enabled))
            .bind(chrono::Utc::now().to_rfc3339())
            .bind(code)
            .execute(self.pool.pool())
            .await?;
        ensure_updated(result.rows_affected(), code)
    }

    /// Store a new (normally encrypted) password for `code`.
    pub async fn update_password(&self, code: &str, password: &str) -> Result<(), PersistenceError> {
        let sql = self.update_sql("password");
        let result = sqlx::query(&sql)
            .bind(password)
            .bind(chrono::Utc::now().to_rfc3339())
            .bind(code)
            .execute(self.pool.pool())
            .await?;
        ensure_updated(result.rows_affected(), code)
    }

    fn update_sql(&self, column: &str) -> String {
        let backend = self.pool.backend();
        format!(
            "UPDATE datasource_config SET {} = {}, updated_at = {} WHERE datasource_code = {}",
            column,
            backend.placeholder(1),
            backend.placeholder(2),
            backend.placeholder(3)
        )
    }

    async fn next_datasource_id(&self) -> Result<i64, PersistenceError> {
        let row = sqlx::query("SELECT MAX(id) AS max_id FROM datasource_config")
            .fetch_one(self.pool.pool())
            .await?;
        Ok(int_column(&row, "max_id")?.unwrap_or(0) + 1)
    }

    async fn select_datasources(
        &self,
        filter: &str,
        codes: &[String],
    ) -> Result<Vec<DatasourceConfig>, PersistenceError> {
        let sql = format!(
            "SELECT {} FROM datasource_config {} ORDER BY id",
            DATASOURCE_COLUMNS, filter
        );
        let mut query = sqlx::query(&sql);
        for code in codes {
            query = query.bind(code.as_str());
        }

        query
            .fetch_all(self.pool.pool())
            .await?
            .iter()
            .map(datasource_from_row)
            .collect()
    }
}

#[async_trait]
impl DatasourceStore for SqlxDatasourceStore {
    async fn find_by_code(&self, code: &str) -> Result<Option<DatasourceConfig>, FederationError> {
        let filter = format!("WHERE datasource_code = {}", self.pool.placeholders(1, 1));
        let mut found = self.select_datasources(&filter, &[code.to_string()]).await?;
        Ok(found.pop())
    }

    async fn find_by_codes(&self, codes: &[String]) -> Result<Vec<DatasourceConfig>, FederationError> {
        if codes.is_empty() {
            return Ok(Vec::new());
        }
        let filter = format!(
            "WHERE datasource_code IN ({})",
            self.pool.placeholders(1, codes.len())
        );
        Ok(self.select_datasources(&filter, codes).await?)
    }

    async fn list_datasources(&self) -> Result<Vec<DatasourceConfig>, FederationError> {
        Ok(self.select_datasources("", &[]).await?)
    }

    async fn list_categories(&self) -> Result<Vec<DatasourceCategory>, FederationError> {
        let sql = format!("SELECT {} FROM datasource_category ORDER BY id", CATEGORY_COLUMNS);
        let rows = sqlx::query(&sql)
            .fetch_all(self.pool.pool())
            .await
            .map_err(PersistenceError::from)?;
        Ok(rows
            .iter()
            .map(category_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }

    async fn ping(&self) -> Result<(), FederationError> {
        Ok(self.pool.health_check().await?)
    }
}

fn ensure_updated(rows_affected: u64, code: &str) -> Result<(), PersistenceError> {
    if rows_affected == 0 {
        return Err(PersistenceError::NotFound {
            entity_type: "datasource".to_string(),
            identifier: code.to_string(),
        });
    }
    Ok(())
}

fn duplicate_or(error: sqlx::Error, entity_type: &str, name: &str) -> PersistenceError {
    match &error {
        sqlx::Error::Database(db) if db.is_unique_violation() => PersistenceError::Duplicate {
            entity_type: entity_type.to_string(),
            name: name.to_string(),
        },
        _ => PersistenceError::Database(error),
    }
}

/// Integer columns come back as i64, i32 or i16 depending on backend and declared type.
fn int_column(row: &AnyRow, column: &str) -> Result<Option<i64>, PersistenceError> {
    if let Ok(value) = row.try_get::<Option<i64>, _>(column) {
        return Ok(value);
    }
    if let Ok(value) = row.try_get::<Option<i32>, _>(column) {
        return Ok(value.map(i64::from));
    }
    if let Ok(value) = row.try_get::<Option<i16>, _>(column) {
        return Ok(value.map(i64::from));
    }
    row.try_get::<Option<bool>, _>(column)
        .map(|value| value.map(i64::from))
        .map_err(PersistenceError::from)
}

fn required_int(row: &AnyRow, table: &'static str, column: &str) -> Result<i64, PersistenceError> {
    int_column(row, column)?.ok_or_else(|| PersistenceError::InvalidRow {
        table,
        reason: format!("{} is null", column),
    })
}

fn narrow<T: TryFrom<i64>>(
    value: Option<i64>,
    table: &'static str,
    column: &str,
) -> Result<Option<T>, PersistenceError> {
    value
        .map(|v| {
            T::try_from(v).map_err(|_| PersistenceError::InvalidRow {
                table,
                reason: format!("{} out of range: {}", column, v),
            })
        })
        .transpose()
}

fn category_from_row(row: &AnyRow) -> Result<DatasourceCategory, PersistenceError> {
    const TABLE: &str = "datasource_category";
    Ok(DatasourceCategory {
        id: required_int(row, TABLE, "id")?,
        name: row.try_get("category_name")?,
        code: row.try_get("category_code")?,
        parent_id: int_column(row, "parent_id")?,
        sort_order: narrow(int_column(row, "sort_order")?, TABLE, "sort_order")?,
        description: row.try_get("description")?,
        enabled: required_int(row, TABLE, "is_enabled")? != 0,
    })
}

fn datasource_from_row(row: &AnyRow) -> Result<DatasourceConfig, PersistenceError> {
    const TABLE: &str = "datasource_config";
    Ok(DatasourceConfig {
        id: Some(required_int(row, TABLE, "id")?),
        code: row.try_get("datasource_code")?,
        name: row.try_get("datasource_name")?,
        category_id: int_column(row, "category_id")?,
        driver: row.try_get("db_type")?,
        host: row.try_get("host")?,
        port: narrow(int_column(row, "port")?, TABLE, "port")?,
        database: row.try_get("database_name")?,
        url: row.try_get("jdbc_url")?,
        username: row.try_get("username")?,
        password: row.try_get("password")?,
        enabled: required_int(row, TABLE, "is_enabled")? != 0,
        max_pool_size: narrow(int_column(row, "max_pool_size")?, TABLE, "max_pool_size")?,
        min_idle: narrow(int_column(row, "min_idle")?, TABLE, "min_idle")?,
        connection_timeout_ms: narrow(
            int_column(row, "connection_timeout")?,
            TABLE,
            "connection_timeout",
        )?,
        description: row.try_get("description")?,
    })
}
