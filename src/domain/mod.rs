use async_trait::async_trait;

pub mod datasource;
pub mod error;
pub mod query;
pub mod tree;
pub mod value;

pub use datasource::{ConnectionTarget, DatasourceCategory, DatasourceConfig, DriverKind};
pub use error::{ErrorKind, FederationError};
pub use query::{
    BackendOutcome, BackendRequest, ColumnMeta, DatasourceQueryResult, Executed,
    FederatedQueryReport, QueryMetadata, QueryOptions, StatementKind,
};
pub use tree::{DatasourceTreeNode, NodeKind};
pub use value::{RowRecord, SqlValue};

/// Where datasource descriptors live. Implementations return disabled entries too;
/// filtering is the registry's job.
#[async_trait]
pub trait DatasourceStore: Send + Sync {
    async fn find_by_code(&self, code: &str) -> Result<Option<DatasourceConfig>, FederationError>;
    async fn find_by_codes(&self, codes: &[String]) -> Result<Vec<DatasourceConfig>, FederationError>;
    async fn list_datasources(&self) -> Result<Vec<DatasourceConfig>, FederationError>;
    async fn list_categories(&self) -> Result<Vec<DatasourceCategory>, FederationError>;

    /// Readiness probe for the backing store.
    async fn ping(&self) -> Result<(), FederationError> {
        Ok(())
    }
}

/// Runs one statement on one backend over a connection scoped to the call.
#[async_trait]
pub trait BackendConnector: Send + Sync {
    async fn execute(&self, request: BackendRequest<'_>) -> Result<Executed, FederationError>;
}
