//! Datasource lookup over a [`DatasourceStore`]
//!
//! Every call reads the store afresh so a rotated credential or a toggled
//! `enabled` flag applies to the next request.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::domain::tree::build_tree;
use crate::domain::{DatasourceConfig, DatasourceStore, DatasourceTreeNode, FederationError};

#[derive(Clone)]
pub struct DatasourceRegistry {
    store: Arc<dyn DatasourceStore>,
}

impl DatasourceRegistry {
    pub fn new(store: Arc<dyn DatasourceStore>) -> Self {
        Self { store }
    }

    /// Resolve one enabled datasource.
    pub async fn get_by_code(&self, code: &str) -> Result<DatasourceConfig, FederationError> {
        match self.store.find_by_code(code).await? {
            Some(config) if config.enabled => Ok(config),
            Some(_) => Err(FederationError::DatasourceDisabled(code.to_string())),
            None => Err(FederationError::DatasourceNotFound(code.to_string())),
        }
    }

    /// Resolve the enabled subset of `codes`. Misses are not errors; callers diff
    /// against the request with [`missing_codes`].
    pub async fn get_by_codes(
        &self,
        codes: &[String],
    ) -> Result<HashMap<String, DatasourceConfig>, FederationError> {
        if codes.is_empty() {
            return Ok(HashMap::new());
        }

        let found: HashMap<String, DatasourceConfig> = self
            .store
            .find_by_codes(codes)
            .await?
            .into_iter()
            .filter(|config| config.enabled)
            .map(|config| (config.code.clone(), config))
            .collect();

        debug!(requested = codes.len(), resolved = found.len(), "resolved datasources");
        Ok(found)
    }

    /// Enabled categories and datasources as a sorted tree.
    pub async fn tree(&self) -> Result<Vec<DatasourceTreeNode>, FederationError> {
        let categories = self.store.list_categories().await?;
        let datasources = self.store.list_datasources().await?;
        Ok(build_tree(&categories, &datasources))
    }

    pub async fn ping(&self) -> Result<(), FederationError> {
        self.store.ping().await
    }
}

/// Requested codes absent from `resolved`, in request order, each listed once.
pub fn missing_codes(requested: &[String], resolved: &HashMap<String, DatasourceConfig>) -> Vec<String> {
    let mut seen = HashSet::new();
    requested
        .iter()
        .filter(|code| !resolved.contains_key(code.as_str()))
        .filter(|code| seen.insert(code.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory_store::InMemoryDatasourceStore;
    use crate::domain::DatasourceCategory;

    fn store() -> Arc<InMemoryDatasourceStore> {
        let mut disabled = DatasourceConfig::new("OFF", "off", "sqlite::memory:");
        disabled.enabled = false;
        Arc::new(InMemoryDatasourceStore::new(
            vec![DatasourceCategory {
                id: 1,
                name: "All".into(),
                code: "all".into(),
                parent_id: None,
                sort_order: None,
                description: None,
                enabled: true,
            }],
            vec![
                DatasourceConfig::new("A", "a", "sqlite::memory:"),
                DatasourceConfig::new("C", "c", "sqlite::memory:"),
                disabled,
            ],
        ))
    }

    #[tokio::test]
    async fn test_get_by_code() {
        let registry = DatasourceRegistry::new(store());
        assert_eq!(registry.get_by_code("A").await.unwrap().name, "a");
        assert!(matches!(
            registry.get_by_code("OFF").await,
            Err(FederationError::DatasourceDisabled(_))
        ));
        assert!(matches!(
            registry.get_by_code("NOPE").await,
            Err(FederationError::DatasourceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_get_by_codes_returns_enabled_subset() {
        let registry = DatasourceRegistry::new(store());
        let requested: Vec<String> = ["A", "B", "OFF", "C", "B"].iter().map(|s| s.to_string()).collect();

        let found = registry.get_by_codes(&requested).await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.contains_key("A") && found.contains_key("C"));
        assert_eq!(missing_codes(&requested, &found), vec!["B".to_string(), "OFF".to_string()]);
    }

    #[tokio::test]
    async fn test_changes_apply_to_next_lookup() {
        let store = store();
        let registry = DatasourceRegistry::new(store.clone());

        let mut rotated = DatasourceConfig::new("A", "a", "sqlite::memory:");
        rotated.password = Some("new-password".into());
        store.upsert(rotated).await;

        let config = registry.get_by_code("A").await.unwrap();
        assert_eq!(config.password.as_deref(), Some("new-password"));
    }
}
