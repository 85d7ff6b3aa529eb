//! Query options, per-backend results and the aggregate report

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::datasource::{ConnectionTarget, DatasourceConfig};
use super::error::{ErrorKind, FederationError};
use super::value::RowRecord;

/// Caller-supplied knobs for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOptions {
    /// Per-backend timeout in milliseconds. `None` or `0` means the configured default.
    #[serde(default, alias = "timeout")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub max_rows: Option<u64>,
    #[serde(default)]
    pub include_metadata: bool,
    /// Result format hint for downstream exporters.
    #[serde(default)]
    pub format: Option<String>,
}

/// Leading-keyword classification of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatementKind {
    Select,
    With,
    Insert,
    Update,
    Delete,
    Other,
}

impl StatementKind {
    pub fn classify(statement: &str) -> Self {
        let head = statement.trim_start().to_ascii_uppercase();
        [
            ("SELECT", Self::Select),
            ("INSERT", Self::Insert),
            ("UPDATE", Self::Update),
            ("DELETE", Self::Delete),
            ("WITH", Self::With),
        ]
        .into_iter()
        .find(|(keyword, _)| head.starts_with(keyword))
        .map(|(_, kind)| kind)
        .unwrap_or(Self::Other)
    }

    /// Mutations report an affected-row count, everything else is fetched.
    pub fn returns_rows(&self) -> bool {
        !matches!(self, Self::Insert | Self::Update | Self::Delete)
    }

    /// Whether a `LIMIT` clause may be appended.
    pub fn accepts_row_cap(&self) -> bool {
        matches!(self, Self::Select | Self::With)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Select => "SELECT",
            Self::With => "WITH",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Other => "OTHER",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnMeta {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub ordinal: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryMetadata {
    pub query_type: StatementKind,
    pub database: String,
    pub columns: Vec<ColumnMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// One statement bound for one backend.
#[derive(Debug)]
pub struct BackendRequest<'a> {
    pub datasource: &'a str,
    pub target: &'a ConnectionTarget,
    pub statement: &'a str,
    pub kind: StatementKind,
    pub timeout: Duration,
    pub max_rows: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BackendOutcome {
    Rows {
        columns: Vec<ColumnMeta>,
        rows: Vec<RowRecord>,
    },
    Affected(u64),
}

/// A completed backend call and the time spent applying the timeout and executing.
#[derive(Debug, Clone, PartialEq)]
pub struct Executed {
    pub outcome: BackendOutcome,
    pub elapsed: Duration,
}

/// Outcome of one backend. Failed results carry no rows.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasourceQueryResult {
    pub datasource_code: String,
    pub datasource_name: String,
    pub success: bool,
    pub data: Vec<RowRecord>,
    pub row_count: usize,
    pub rows_affected: u64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub execution_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<QueryMetadata>,
}

impl DatasourceQueryResult {
    pub fn succeeded(
        config: &DatasourceConfig,
        data: Vec<RowRecord>,
        rows_affected: u64,
        elapsed: Duration,
    ) -> Self {
        Self {
            datasource_code: config.code.clone(),
            datasource_name: config.name.clone(),
            success: true,
            row_count: data.len(),
            data,
            rows_affected,
            message: "query succeeded".to_string(),
            error: None,
            error_kind: None,
            execution_time_ms: millis(elapsed),
            metadata: None,
        }
    }

    pub fn failed(config: &DatasourceConfig, error: &FederationError, elapsed: Duration) -> Self {
        Self {
            datasource_code: config.code.clone(),
            datasource_name: config.name.clone(),
            success: false,
            data: Vec::new(),
            row_count: 0,
            rows_affected: 0,
            message: "query failed".to_string(),
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            execution_time_ms: millis(elapsed),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: QueryMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Aggregate of a federated run. `results` follows the requested code order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FederatedQueryReport {
    pub success: bool,
    pub message: String,
    pub total_execution_time_ms: u64,
    pub results: Vec<DatasourceQueryResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl FederatedQueryReport {
    /// Dispatch happened; per-backend failures stay inside `results`.
    pub fn completed(results: Vec<DatasourceQueryResult>, elapsed: Duration) -> Self {
        let total = results.len();
        let succeeded = results.iter().filter(|r| r.success).count();
        Self {
            success: true,
            message: format!(
                "success {}/{}, failed {}/{}",
                succeeded,
                total,
                total - succeeded,
                total
            ),
            total_execution_time_ms: millis(elapsed),
            results,
            error_kind: None,
        }
    }

    /// Nothing was dispatched, or orchestration itself broke.
    pub fn rejected(error: &FederationError, elapsed: Duration) -> Self {
        Self {
            success: false,
            message: error.to_string(),
            total_execution_time_ms: millis(elapsed),
            results: Vec::new(),
            error_kind: Some(error.kind()),
        }
    }

    pub fn succeeded_count(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.len() - self.succeeded_count()
    }
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(StatementKind::classify("  select 1"), StatementKind::Select);
        assert_eq!(StatementKind::classify("WITH t AS (SELECT 1) SELECT * FROM t"), StatementKind::With);
        assert_eq!(StatementKind::classify("\ndelete from t"), StatementKind::Delete);
        assert_eq!(StatementKind::classify("PRAGMA table_info(t)"), StatementKind::Other);
        assert!(StatementKind::Other.returns_rows());
        assert!(!StatementKind::Other.accepts_row_cap());
        assert!(!StatementKind::Update.returns_rows());
    }

    #[test]
    fn test_options_accept_legacy_timeout_key() {
        let options: QueryOptions =
            serde_json::from_str(r#"{"timeout": 5000, "maxRows": 10, "includeMetadata": true}"#)
                .unwrap();
        assert_eq!(options.timeout_ms, Some(5000));
        assert_eq!(options.max_rows, Some(10));
        assert!(options.include_metadata);
        assert!(options.format.is_none());
    }

    #[test]
    fn test_report_summary_counts() {
        let config = DatasourceConfig::new("A", "a", "sqlite::memory:");
        let ok = DatasourceQueryResult::succeeded(&config, vec![], 0, Duration::from_millis(3));
        let failed = DatasourceQueryResult::failed(
            &config,
            &FederationError::ConnectionFailure("refused".into()),
            Duration::from_millis(1),
        );
        let report = FederatedQueryReport::completed(vec![failed, ok], Duration::from_millis(5));
        assert!(report.success);
        assert_eq!(report.message, "success 1/2, failed 1/2");
        assert_eq!(report.failed_count(), 1);
    }

    #[test]
    fn test_failed_result_wire_shape() {
        let config = DatasourceConfig::new("A", "Alpha", "sqlite::memory:");
        let result = DatasourceQueryResult::failed(
            &config,
            &FederationError::TimeoutExceeded { timeout_ms: 100 },
            Duration::from_millis(100),
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["datasourceCode"], "A");
        assert_eq!(json["success"], false);
        assert_eq!(json["data"], serde_json::json!([]));
        assert_eq!(json["errorKind"], "TIMEOUT_EXCEEDED");
        assert_eq!(json["executionTimeMs"], 100);
        assert!(json.get("metadata").is_none());
    }
}
