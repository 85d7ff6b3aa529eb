//! Scripted backend used by executor tests

use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::domain::query::millis;
use crate::domain::{
    BackendConnector, BackendOutcome, BackendRequest, ColumnMeta, Executed, FederationError,
    RowRecord, SqlValue,
};

#[derive(Debug, Clone)]
pub(crate) struct Script {
    delay: Duration,
    result: Result<BackendOutcome, String>,
}

impl Script {
    pub fn rows(columns: &[&str], values: Vec<Vec<SqlValue>>) -> Self {
        let rows = values
            .into_iter()
            .map(|cells| {
                let mut row = RowRecord::default();
                for (label, value) in columns.iter().zip(cells) {
                    row.push(*label, value);
                }
                row
            })
            .collect::<Vec<_>>();
        let columns = if rows.is_empty() {
            Vec::new()
        } else {
            columns
                .iter()
                .enumerate()
                .map(|(ordinal, name)| ColumnMeta {
                    name: name.to_string(),
                    type_name: "TEXT".to_string(),
                    ordinal,
                })
                .collect()
        };
        Self {
            delay: Duration::ZERO,
            result: Ok(BackendOutcome::Rows { columns, rows }),
        }
    }

    pub fn affected(count: u64) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Ok(BackendOutcome::Affected(count)),
        }
    }

    pub fn fail(message: &str) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Err(message.to_string()),
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Call {
    pub datasource: String,
    pub statement: String,
    pub timeout: Duration,
    pub max_rows: Option<u64>,
    pub password: Option<String>,
}

/// Answers per datasource code; unknown codes fail with a connection error.
#[derive(Default)]
pub(crate) struct ScriptedConnector {
    scripts: HashMap<String, Script>,
    calls: Mutex<Vec<Call>>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedConnector {
    pub fn with(mut self, code: &str, script: Script) -> Self {
        self.scripts.insert(code.to_string(), script);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called(&self, code: &str) -> bool {
        self.calls().iter().any(|call| call.datasource == code)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendConnector for ScriptedConnector {
    async fn execute(&self, request: BackendRequest<'_>) -> Result<Executed, FederationError> {
        self.calls.lock().unwrap().push(Call {
            datasource: request.datasource.to_string(),
            statement: request.statement.to_string(),
            timeout: request.timeout,
            max_rows: request.max_rows,
            password: request
                .target
                .password
                .as_ref()
                .map(|p| p.expose_secret().to_string()),
        });

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let script = self
            .scripts
            .get(request.datasource)
            .cloned()
            .unwrap_or_else(|| Script::fail("connection refused"));

        let result = if script.delay > request.timeout {
            tokio::time::sleep(request.timeout).await;
            Err(FederationError::TimeoutExceeded {
                timeout_ms: millis(request.timeout),
            })
        } else {
            tokio::time::sleep(script.delay).await;
            script
                .result
                .map(|outcome| Executed {
                    outcome,
                    elapsed: script.delay,
                })
                .map_err(FederationError::ConnectionFailure)
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
