use config::{Config, Environment, File};
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub mod validator;

use crate::cli::Cli;
use crate::domain::{DatasourceCategory, DatasourceConfig};
use crate::persistence::CatalogConfig;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    pub server: ServerSettings,
    #[serde(default)]
    pub executor: ExecutorSettings,
    #[serde(default)]
    pub encryption: EncryptionSettings,
    /// SQL catalog holding the datasources. Absent means the inline lists below are the catalog.
    #[serde(default)]
    pub catalog: Option<CatalogConfig>,
    #[serde(default)]
    pub categories: Vec<DatasourceCategory>,
    #[serde(default)]
    pub datasources: Vec<DatasourceConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutorSettings {
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default = "default_max_timeout_ms")]
    pub max_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Process-wide row cap, `0` disables it.
    #[serde(default = "default_max_rows")]
    pub max_rows: u64,
    #[serde(default = "default_allowed_operations")]
    pub allowed_operations: Vec<String>,
}

fn default_pool_size() -> usize {
    10
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_timeout_ms() -> u64 {
    300_000
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_max_rows() -> u64 {
    10_000
}

fn default_allowed_operations() -> Vec<String> {
    ["SELECT", "INSERT", "UPDATE", "DELETE", "WITH"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            default_timeout_ms: default_timeout_ms(),
            max_timeout_ms: default_max_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_rows: default_max_rows(),
            allowed_operations: default_allowed_operations(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EncryptionSettings {
    #[serde(default, skip_serializing)]
    pub secret_key: Option<String>,
}

impl EncryptionSettings {
    pub fn secret(&self) -> Option<SecretString> {
        self.secret_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .map(|key| SecretString::from(key.to_string()))
    }
}

impl Settings {
    pub fn new() -> Result<Self, anyhow::Error> {
        Self::from_root(".")
    }

    /// Create settings from CLI arguments (includes config file and CLI overrides)
    pub fn new_with_cli(cli: &Cli) -> Result<Self, anyhow::Error> {
        let root = cli
            .config
            .parent()
            .and_then(|p| p.to_str())
            .filter(|p| !p.is_empty())
            .unwrap_or(".");

        let mut settings = Self::load(&cli.config)?;

        // CLI > env vars > config file
        settings.apply_cli_overrides(cli);
        settings.load_external_configs(root)?;
        settings.validated()
    }

    pub fn from_root(root: &str) -> Result<Self, anyhow::Error> {
        let mut settings = Self::load(&Path::new(root).join("fedsql"))?;
        settings.load_external_configs(root)?;
        settings.validated()
    }

    fn load(config_path: &Path) -> Result<Self, anyhow::Error> {
        let s = Config::builder()
            .add_source(File::from(config_path).required(false))
            .add_source(
                Environment::with_prefix("FEDSQL")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .build()?;

        Ok(s.try_deserialize()?)
    }

    fn apply_cli_overrides(&mut self, cli: &Cli) {
        if let Some(host) = &cli.host {
            self.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(secret_key) = &cli.secret_key {
            self.encryption.secret_key = Some(secret_key.clone());
        }
        if let Some(pool_size) = cli.pool_size {
            self.executor.pool_size = pool_size;
        }
    }

    fn validated(self) -> Result<Self, anyhow::Error> {
        validator::ConfigValidator::validate(&self).map_err(|errors| {
            let error_messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            anyhow::anyhow!(
                "Configuration validation failed:\n{}",
                error_messages.join("\n")
            )
        })?;
        Ok(self)
    }

    fn load_external_configs(&mut self, root: &str) -> Result<(), anyhow::Error> {
        self.categories
            .extend(load_dir::<DatasourceCategory>(&format!("{}/config/categories", root))?);
        self.datasources
            .extend(load_dir::<DatasourceConfig>(&format!("{}/config/datasources", root))?);
        Ok(())
    }
}

/// One definition per `.json`, `.yaml`/`.yml` or `.toml` file; other files are ignored.
fn load_dir<T: DeserializeOwned>(path: &str) -> Result<Vec<T>, anyhow::Error> {
    let pattern = format!("{}/*", path);
    let mut items = Vec::new();

    for entry in glob::glob(&pattern)? {
        match entry {
            Ok(path) => {
                let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
                    continue;
                };
                if !matches!(ext, "json" | "yaml" | "yml" | "toml") {
                    continue;
                }

                let content = std::fs::read_to_string(&path)?;
                let item: T = match ext {
                    "json" => serde_json::from_str(&content)?,
                    "toml" => toml::from_str(&content)?,
                    _ => serde_yaml::from_str(&content)?,
                };
                tracing::info!("Loaded {}", path.display());
                items.push(item);
            }
            Err(e) => tracing::error!("Error reading glob entry: {}", e),
        }
    }

    Ok(items)
}
