//! Error taxonomy for federated execution

use serde::Serialize;
use thiserror::Error;

/// Everything that can go wrong between receiving a statement and producing a report.
///
/// Guard and resolution errors abort a whole run. Connection, execution, timeout and
/// credential errors are contained in the result of the backend they happened on.
#[derive(Debug, Error)]
pub enum FederationError {
    #[error("invalid statement: {0}")]
    InvalidStatement(String),

    #[error("datasource not found: {0}")]
    DatasourceNotFound(String),

    #[error("datasource disabled: {0}")]
    DatasourceDisabled(String),

    #[error("connection failed: {0}")]
    ConnectionFailure(String),

    #[error("execution failed: {0}")]
    ExecutionFailure(String),

    #[error("query timed out after {timeout_ms} ms")]
    TimeoutExceeded { timeout_ms: u64 },

    #[error("credential decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("credential encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("invalid datasource configuration: {0}")]
    Configuration(String),

    #[error("datasource catalog error: {0}")]
    Catalog(String),

    #[error("worker pool error: {0}")]
    WorkerPool(String),

    #[error("export failed: {0}")]
    Export(String),
}

/// Serializable tag for a [`FederationError`], carried by failed results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidStatement,
    DatasourceNotFound,
    DatasourceDisabled,
    ConnectionFailure,
    ExecutionFailure,
    TimeoutExceeded,
    DecryptionFailed,
    EncryptionFailed,
    Configuration,
    Catalog,
    WorkerPool,
    Export,
}

impl FederationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidStatement(_) => ErrorKind::InvalidStatement,
            Self::DatasourceNotFound(_) => ErrorKind::DatasourceNotFound,
            Self::DatasourceDisabled(_) => ErrorKind::DatasourceDisabled,
            Self::ConnectionFailure(_) => ErrorKind::ConnectionFailure,
            Self::ExecutionFailure(_) => ErrorKind::ExecutionFailure,
            Self::TimeoutExceeded { .. } => ErrorKind::TimeoutExceeded,
            Self::DecryptionFailed(_) => ErrorKind::DecryptionFailed,
            Self::EncryptionFailed(_) => ErrorKind::EncryptionFailed,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Catalog(_) => ErrorKind::Catalog,
            Self::WorkerPool(_) => ErrorKind::WorkerPool,
            Self::Export(_) => ErrorKind::Export,
        }
    }

    /// Whether the caller can fix this by changing the request.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidStatement | ErrorKind::DatasourceNotFound | ErrorKind::DatasourceDisabled
        )
    }
}
