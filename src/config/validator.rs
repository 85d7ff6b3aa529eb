use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::config::{EncryptionSettings, ExecutorSettings, ServerSettings, Settings};
use crate::domain::{DatasourceCategory, DatasourceConfig, DriverKind};

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Cross-reference error: {0}")]
    CrossReference(String),

    #[error("Duplicate entry: {0}")]
    Duplicate(String),
}

pub struct ConfigValidator;

impl ConfigValidator {
    /// Collect every problem instead of stopping at the first.
    pub fn validate(settings: &Settings) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_server(&settings.server) {
            errors.extend(e);
        }

        if let Err(e) = Self::validate_executor(&settings.executor) {
            errors.extend(e);
        }

        if let Err(e) = Self::validate_encryption(&settings.encryption) {
            errors.extend(e);
        }

        if let Err(e) = Self::validate_categories(&settings.categories) {
            errors.extend(e);
        }

        if let Err(e) = Self::validate_datasources(&settings.datasources) {
            errors.extend(e);
        }

        if let Err(e) = Self::validate_cross_references(settings) {
            errors.extend(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_server(server: &ServerSettings) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if server.host.is_empty() {
            errors.push(ValidationError::MissingField("server.host".to_string()));
        }

        if server.port == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "server.port".to_string(),
                reason: "Port must be greater than 0".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_executor(executor: &ExecutorSettings) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if executor.pool_size == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "executor.pool_size".to_string(),
                reason: "Pool size must be greater than 0".to_string(),
            });
        }

        if executor.default_timeout_ms == 0 {
            errors.push(ValidationError::InvalidValue {
                field: "executor.default_timeout_ms".to_string(),
                reason: "Default timeout must be greater than 0".to_string(),
            });
        }

        if executor.max_timeout_ms < executor.default_timeout_ms {
            errors.push(ValidationError::InvalidValue {
                field: "executor.max_timeout_ms".to_string(),
                reason: format!(
                    "{} is below the default timeout {}",
                    executor.max_timeout_ms, executor.default_timeout_ms
                ),
            });
        }

        if executor
            .allowed_operations
            .iter()
            .all(|op| op.trim().is_empty())
        {
            errors.push(ValidationError::MissingField(
                "executor.allowed_operations".to_string(),
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_encryption(encryption: &EncryptionSettings) -> Result<(), Vec<ValidationError>> {
        if encryption.secret().is_none() {
            return Err(vec![ValidationError::MissingField(
                "encryption.secret_key".to_string(),
            )]);
        }
        Ok(())
    }

    fn validate_categories(categories: &[DatasourceCategory]) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        let mut seen_ids = HashMap::new();

        for (idx, category) in categories.iter().enumerate() {
            if let Some(prev_idx) = seen_ids.insert(category.id, idx) {
                errors.push(ValidationError::Duplicate(format!(
                    "Category id {} appears at indices {} and {}",
                    category.id, prev_idx, idx
                )));
            }

            if category.name.trim().is_empty() {
                errors.push(ValidationError::MissingField(format!("categories[{}].name", idx)));
            }

            if category.code.trim().is_empty() {
                errors.push(ValidationError::MissingField(format!("categories[{}].code", idx)));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_datasources(datasources: &[DatasourceConfig]) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        let mut seen_codes = HashMap::new();

        for (idx, datasource) in datasources.iter().enumerate() {
            if let Some(prev_idx) = seen_codes.insert(datasource.code.as_str(), idx) {
                errors.push(ValidationError::Duplicate(format!(
                    "Datasource code '{}' appears at indices {} and {}",
                    datasource.code, prev_idx, idx
                )));
            }

            if datasource.code.trim().is_empty() {
                errors.push(ValidationError::MissingField(format!("datasources[{}].code", idx)));
            }

            if datasource.name.trim().is_empty() {
                errors.push(ValidationError::MissingField(format!("datasources[{}].name", idx)));
            }

            match datasource.driver_kind() {
                Ok(driver) => {
                    let reachable = datasource.connection_url().is_some()
                        || match driver {
                            DriverKind::Sqlite => datasource.database.is_some(),
                            _ => datasource.host.is_some(),
                        };
                    if !reachable {
                        errors.push(ValidationError::InvalidValue {
                            field: format!("datasources[{}]", idx),
                            reason: "Either 'url' or 'host'/'database' must be provided"
                                .to_string(),
                        });
                    }
                }
                Err(e) => errors.push(ValidationError::InvalidValue {
                    field: format!("datasources[{}].driver", idx),
                    reason: e.to_string(),
                }),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_cross_references(settings: &Settings) -> Result<(), Vec<ValidationError>> {
        let category_ids: HashSet<i64> = settings.categories.iter().map(|c| c.id).collect();
        let mut errors = Vec::new();

        for category in &settings.categories {
            if let Some(parent) = category.parent_id {
                if !category_ids.contains(&parent) {
                    errors.push(ValidationError::CrossReference(format!(
                        "Category '{}' references unknown parent id {}",
                        category.code, parent
                    )));
                }
            }
        }

        // A SQL catalog may already hold the referenced categories.
        if settings.catalog.is_none() {
            for datasource in &settings.datasources {
                if let Some(category_id) = datasource.category_id {
                    if !category_ids.contains(&category_id) {
                        errors.push(ValidationError::CrossReference(format!(
                            "Datasource '{}' references unknown category id {}",
                            datasource.code, category_id
                        )));
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
