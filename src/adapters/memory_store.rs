use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{DatasourceCategory, DatasourceConfig, DatasourceStore, FederationError};

#[derive(Debug, Default)]
struct Catalog {
    categories: Vec<DatasourceCategory>,
    datasources: Vec<DatasourceConfig>,
}

/// Catalog held in memory, populated from configuration files.
#[derive(Debug, Default)]
pub struct InMemoryDatasourceStore {
    catalog: RwLock<Catalog>,
}

impl InMemoryDatasourceStore {
    pub fn new(categories: Vec<DatasourceCategory>, datasources: Vec<DatasourceConfig>) -> Self {
        Self {
            catalog: RwLock::new(Catalog {
                categories,
                datasources,
            }),
        }
    }

    /// Swap the whole catalog, e.g. after a configuration reload.
    pub async fn replace(&self, categories: Vec<DatasourceCategory>, datasources: Vec<DatasourceConfig>) {
        let mut catalog = self.catalog.write().await;
        catalog.categories = categories;
        catalog.datasources = datasources;
    }

    /// Insert or overwrite a datasource by code.
    pub async fn upsert(&self, datasource: DatasourceConfig) {
        let mut catalog = self.catalog.write().await;
        match catalog
            .datasources
            .iter_mut()
            .find(|existing| existing.code == datasource.code)
        {
            Some(existing) => *existing = datasource,
            None => catalog.datasources.push(datasource),
        }
    }
}

#[async_trait]
impl DatasourceStore for InMemoryDatasourceStore {
    async fn find_by_code(&self, code: &str) -> Result<Option<DatasourceConfig>, FederationError> {
        let catalog = self.catalog.read().await;
        Ok(catalog.datasources.iter().find(|d| d.code == code).cloned())
    }

    async fn find_by_codes(&self, codes: &[String]) -> Result<Vec<DatasourceConfig>, FederationError> {
        let catalog = self.catalog.read().await;
        Ok(catalog
            .datasources
            .iter()
            .filter(|d| codes.contains(&d.code))
            .cloned()
            .collect())
    }

    async fn list_datasources(&self) -> Result<Vec<DatasourceConfig>, FederationError> {
        Ok(self.catalog.read().await.datasources.clone())
    }

    async fn list_categories(&self) -> Result<Vec<DatasourceCategory>, FederationError> {
        Ok(self.catalog.read().await.categories.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replace_swaps_catalog() {
        let store = InMemoryDatasourceStore::new(
            vec![],
            vec![DatasourceConfig::new("A", "a", "sqlite::memory:")],
        );
        assert!(store.find_by_code("A").await.unwrap().is_some());

        store
            .replace(vec![], vec![DatasourceConfig::new("B", "b", "sqlite::memory:")])
            .await;
        assert!(store.find_by_code("A").await.unwrap().is_none());
        assert_eq!(store.list_datasources().await.unwrap().len(), 1);
    }
}
