//! Persistence layer error types

use thiserror::Error;

use crate::domain::FederationError;

/// Errors that can occur in the catalog layer
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Database connection error
    #[error("Database connection error: {0}")]
    Connection(String),

    /// Duplicate entry
    #[error("Duplicate entry: {entity_type} '{name}' already exists")]
    Duplicate { entity_type: String, name: String },

    /// Item not found
    #[error("Item not found: {entity_type} '{identifier}'")]
    NotFound {
        entity_type: String,
        identifier: String,
    },

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// A stored row that cannot be turned into a domain value
    #[error("Invalid row in {table}: {reason}")]
    InvalidRow { table: &'static str, reason: String },

    /// Database error from SQLx
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<PersistenceError> for FederationError {
    fn from(err: PersistenceError) -> Self {
        Self::Catalog(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorKind;

    #[test]
    fn test_catalog_failures_surface_as_catalog_errors() {
        let err: FederationError = PersistenceError::Migration("checksum mismatch".into()).into();
        assert_eq!(err.kind(), ErrorKind::Catalog);
        assert!(err.to_string().contains("checksum mismatch"));
    }
}
