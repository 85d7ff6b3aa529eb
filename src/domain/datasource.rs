//! Datasource descriptors and driver detection

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::FederationError;

/// Supported backend families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    Postgres,
    #[serde(rename = "mysql")]
    MySql,
    Sqlite,
}

impl DriverKind {
    /// Detect the backend from a connection URL. A leading `jdbc:` is ignored.
    pub fn from_url(url: &str) -> Option<Self> {
        let url = strip_jdbc(url.trim());
        if url.starts_with("sqlite:") {
            Some(Self::Sqlite)
        } else if url.starts_with("postgres:") || url.starts_with("postgresql:") {
            Some(Self::Postgres)
        } else if url.starts_with("mysql:") || url.starts_with("mariadb:") {
            Some(Self::MySql)
        } else {
            None
        }
    }

    /// Parse a driver identifier: a short alias or a legacy JDBC driver class name.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" | "org.postgresql.driver" => Some(Self::Postgres),
            "mysql" | "mariadb" | "com.mysql.cj.jdbc.driver" | "com.mysql.jdbc.driver"
            | "org.mariadb.jdbc.driver" => Some(Self::MySql),
            "sqlite" | "sqlite3" | "org.sqlite.jdbc" => Some(Self::Sqlite),
            _ => None,
        }
    }

    /// Get the backend name for display
    pub fn name(&self) -> &'static str {
        match self {
            Self::Postgres => "PostgreSQL",
            Self::MySql => "MySQL",
            Self::Sqlite => "SQLite",
        }
    }

    /// Bind placeholder for the 1-based parameter `index`.
    pub fn placeholder(&self, index: usize) -> String {
        match self {
            Self::Postgres => format!("${}", index),
            Self::MySql | Self::Sqlite => "?".to_string(),
        }
    }
}

fn strip_jdbc(url: &str) -> &str {
    url.strip_prefix("jdbc:").unwrap_or(url)
}

fn default_enabled() -> bool {
    true
}

/// One datasource as stored in the catalog. `password` holds ciphertext, or a
/// legacy plaintext value during migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasourceConfig {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(alias = "datasource_code")]
    pub code: String,
    #[serde(alias = "datasource_name")]
    pub name: String,
    #[serde(default)]
    pub category_id: Option<i64>,
    /// Driver alias or JDBC driver class. Falls back to the URL scheme when absent.
    #[serde(default, alias = "db_type", alias = "driver_class")]
    pub driver: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Database name, or the file path for SQLite.
    #[serde(default, alias = "database_name")]
    pub database: Option<String>,
    #[serde(default, alias = "jdbc_url")]
    pub url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    #[serde(default = "default_enabled", alias = "is_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub max_pool_size: Option<u32>,
    #[serde(default)]
    pub min_idle: Option<u32>,
    #[serde(default, alias = "connection_timeout")]
    pub connection_timeout_ms: Option<u64>,
    #[serde(default)]
    pub description: Option<String>,
}

impl DatasourceConfig {
    /// Minimal descriptor for a URL-addressed backend.
    pub fn new(code: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: None,
            code: code.into(),
            name: name.into(),
            category_id: None,
            driver: None,
            host: None,
            port: None,
            database: None,
            url: Some(url.into()),
            username: None,
            password: None,
            enabled: true,
            max_pool_size: None,
            min_idle: None,
            connection_timeout_ms: None,
            description: None,
        }
    }

    pub fn driver_kind(&self) -> Result<DriverKind, FederationError> {
        if let Some(driver) = self.driver.as_deref().filter(|d| !d.trim().is_empty()) {
            return DriverKind::parse(driver).ok_or_else(|| {
                FederationError::Configuration(format!(
                    "unsupported driver '{}' for datasource {}",
                    driver, self.code
                ))
            });
        }

        self.connection_url()
            .and_then(DriverKind::from_url)
            .ok_or_else(|| {
                FederationError::Configuration(format!(
                    "cannot determine driver for datasource {}",
                    self.code
                ))
            })
    }

    /// The configured URL with any `jdbc:` prefix removed.
    pub fn connection_url(&self) -> Option<&str> {
        self.url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(strip_jdbc)
    }

    /// Stable node id used by the catalog tree.
    pub fn node_key(&self) -> String {
        match self.id {
            Some(id) => id.to_string(),
            None => self.code.clone(),
        }
    }
}

/// A grouping node of the datasource catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasourceCategory {
    pub id: i64,
    #[serde(alias = "category_name")]
    pub name: String,
    #[serde(alias = "category_code")]
    pub code: String,
    #[serde(default)]
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub sort_order: Option<i32>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_enabled", alias = "is_enabled")]
    pub enabled: bool,
}

/// Everything needed to open one connection, credentials already in plaintext.
#[derive(Debug)]
pub struct ConnectionTarget {
    pub driver: DriverKind,
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub connect_timeout: Duration,
}

impl ConnectionTarget {
    pub fn resolve(
        config: &DatasourceConfig,
        password: Option<SecretString>,
        default_connect_timeout: Duration,
    ) -> Result<Self, FederationError> {
        let driver = config.driver_kind()?;
        let url = config.connection_url().map(str::to_string);

        if url.is_none() {
            let missing = match driver {
                DriverKind::Sqlite => config.database.is_none().then_some("database"),
                _ => config.host.is_none().then_some("host"),
            };
            if let Some(field) = missing {
                return Err(FederationError::Configuration(format!(
                    "datasource {} has neither url nor {}",
                    config.code, field
                )));
            }
        }

        Ok(Self {
            driver,
            url,
            host: config.host.clone(),
            port: config.port,
            database: config.database.clone(),
            username: config.username.clone().filter(|u| !u.is_empty()),
            password,
            connect_timeout: config
                .connection_timeout_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(default_connect_timeout),
        })
    }
}
