//! Runs one statement against one datasource and always yields a result

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::adapters::encryption::CredentialCipher;
use crate::adapters::sql_guard::SqlGuard;
use crate::config::ExecutorSettings;
use crate::domain::query::millis;
use crate::domain::{
    BackendConnector, BackendOutcome, BackendRequest, ConnectionTarget, DatasourceConfig,
    DatasourceQueryResult, Executed, FederationError, QueryMetadata, QueryOptions, StatementKind,
};

/// Process-wide bounds applied to caller options.
#[derive(Debug, Clone)]
pub struct ExecutionLimits {
    pub default_timeout: Duration,
    pub max_timeout: Duration,
    pub connect_timeout: Duration,
    /// `0` disables the process-wide row cap.
    pub max_rows: u64,
}

impl ExecutionLimits {
    pub fn from_settings(settings: &ExecutorSettings) -> Self {
        Self {
            default_timeout: Duration::from_millis(settings.default_timeout_ms),
            max_timeout: Duration::from_millis(settings.max_timeout_ms),
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            max_rows: settings.max_rows,
        }
    }

    /// Caller timeout (zero means unset) or the default, clamped to `max_timeout`.
    pub fn effective_timeout(&self, options: &QueryOptions) -> Duration {
        options
            .timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout)
            .min(self.max_timeout)
    }

    pub fn effective_row_cap(&self, options: &QueryOptions) -> Option<u64> {
        let requested = options.max_rows.filter(|rows| *rows > 0);
        match (self.max_rows, requested) {
            (0, requested) => requested,
            (limit, Some(requested)) => Some(requested.min(limit)),
            (limit, None) => Some(limit),
        }
    }
}

pub struct SingleBackendExecutor {
    cipher: Arc<CredentialCipher>,
    connector: Arc<dyn BackendConnector>,
    limits: ExecutionLimits,
}

impl SingleBackendExecutor {
    pub fn new(
        cipher: Arc<CredentialCipher>,
        connector: Arc<dyn BackendConnector>,
        limits: ExecutionLimits,
    ) -> Self {
        Self {
            cipher,
            connector,
            limits,
        }
    }

    pub fn limits(&self) -> &ExecutionLimits {
        &self.limits
    }

    /// Every failure is folded into a failed result; nothing escapes.
    pub async fn run(
        &self,
        config: &DatasourceConfig,
        statement: &str,
        options: &QueryOptions,
    ) -> DatasourceQueryResult {
        let started = Instant::now();
        info!(datasource = %config.code, name = %config.name, "querying datasource");

        match self.execute(config, statement, options).await {
            Ok(result) => {
                info!(
                    datasource = %config.code,
                    rows = result.row_count,
                    rows_affected = result.rows_affected,
                    elapsed_ms = result.execution_time_ms,
                    "datasource query succeeded"
                );
                result
            }
            Err(e) => {
                let elapsed = started.elapsed();
                if matches!(e, FederationError::DecryptionFailed(_)) {
                    error!(
                        datasource = %config.code,
                        error = %e,
                        "stored password cannot be decrypted, check the encryption secret"
                    );
                } else {
                    warn!(
                        datasource = %config.code,
                        error = %e,
                        elapsed_ms = millis(elapsed),
                        "datasource query failed"
                    );
                }
                DatasourceQueryResult::failed(config, &e, elapsed)
            }
        }
    }

    async fn execute(
        &self,
        config: &DatasourceConfig,
        statement: &str,
        options: &QueryOptions,
    ) -> Result<DatasourceQueryResult, FederationError> {
        let password = config
            .password
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(|p| self.cipher.reveal(p))
            .transpose()?;
        let target = ConnectionTarget::resolve(config, password, self.limits.connect_timeout)?;

        let kind = StatementKind::classify(statement);
        let row_cap = self.limits.effective_row_cap(options);
        let statement = SqlGuard::apply_row_cap(statement, kind, row_cap);

        let Executed { outcome, elapsed } = self
            .connector
            .execute(BackendRequest {
                datasource: &config.code,
                target: &target,
                statement: &statement,
                kind,
                timeout: self.limits.effective_timeout(options),
                max_rows: row_cap,
            })
            .await?;

        let (rows, columns, rows_affected) = match outcome {
            BackendOutcome::Rows { columns, rows } => (rows, columns, 0),
            BackendOutcome::Affected(count) => (Vec::new(), Vec::new(), count),
        };

        let result = DatasourceQueryResult::succeeded(config, rows, rows_affected, elapsed);
        if !options.include_metadata {
            return Ok(result);
        }

        Ok(result.with_metadata(QueryMetadata {
            query_type: kind,
            database: target.driver.name().to_string(),
            columns,
            format: options.format.clone(),
        }))
    }
}
