//! [`BackendConnector`] over sqlx's concrete drivers
//!
//! Every call opens its own connection and closes it before returning, whether the
//! statement succeeded, failed or timed out. The timeout is pushed to the server
//! where the backend supports it (PostgreSQL `statement_timeout`, MySQL
//! `max_execution_time`) and also enforced client-side.

use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use secrecy::ExposeSecret;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{ColumnIndex, ConnectOptions, Connection, Executor, Row};
use std::future::Future;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::adapters::type_adapters::TypeAdapters;
use crate::domain::query::millis;
use crate::domain::{
    BackendConnector, BackendOutcome, BackendRequest, ConnectionTarget, DriverKind, Executed,
    FederationError,
};

/// SQLSTATE / error codes that mean the server cancelled the statement on timeout.
const PG_QUERY_CANCELED: &str = "57014";
const MYSQL_EXECUTION_TIME_EXCEEDED: &str = "3024";

pub struct SqlxConnector {
    postgres: TypeAdapters<PgRow>,
    mysql: TypeAdapters<MySqlRow>,
    sqlite: TypeAdapters<SqliteRow>,
}

impl SqlxConnector {
    pub fn new() -> Self {
        Self {
            postgres: TypeAdapters::postgres(),
            mysql: TypeAdapters::mysql(),
            sqlite: TypeAdapters::sqlite(),
        }
    }

    async fn execute_postgres(
        &self,
        request: &BackendRequest<'_>,
    ) -> Result<Executed, FederationError> {
        let options = postgres_options(request.target)?;
        let mut conn = connect(request, PgConnection::connect_with(&options)).await?;

        let timeout_ms = millis(request.timeout);
        let set_timeout = format!("SET statement_timeout = {}", timeout_ms);
        let prepared = (&mut conn).execute(sqlx::raw_sql(&set_timeout)).await;

        let started = Instant::now();
        let outcome = match prepared {
            Ok(_) => bounded(request.timeout, run_postgres(&mut conn, request, &self.postgres)).await,
            Err(e) => Err(execution_error(e, timeout_ms)),
        };
        let elapsed = started.elapsed();

        release(conn.close().await, request.datasource);
        outcome.map(|outcome| Executed { outcome, elapsed })
    }

    async fn execute_mysql(
        &self,
        request: &BackendRequest<'_>,
    ) -> Result<Executed, FederationError> {
        let options = mysql_options(request.target)?;
        let mut conn = connect(request, MySqlConnection::connect_with(&options)).await?;

        let timeout_ms = millis(request.timeout);
        let set_timeout = format!("SET SESSION max_execution_time = {}", timeout_ms);
        // MariaDB has no max_execution_time; the client-side bound still applies.
        if let Err(e) = (&mut conn).execute(sqlx::raw_sql(&set_timeout)).await {
            debug!(datasource = request.datasource, error = %e, "server-side timeout not applied");
        }

        let started = Instant::now();
        let outcome = bounded(request.timeout, run_mysql(&mut conn, request, &self.mysql)).await;
        let elapsed = started.elapsed();

        release(conn.close().await, request.datasource);
        outcome.map(|outcome| Executed { outcome, elapsed })
    }

    async fn execute_sqlite(
        &self,
        request: &BackendRequest<'_>,
    ) -> Result<Executed, FederationError> {
        let options = sqlite_options(request.target)?;
        let mut conn = connect(request, SqliteConnection::connect_with(&options)).await?;

        let started = Instant::now();
        let outcome = bounded(request.timeout, run_sqlite(&mut conn, request, &self.sqlite)).await;
        let elapsed = started.elapsed();

        release(conn.close().await, request.datasource);
        outcome.map(|outcome| Executed { outcome, elapsed })
    }
}

async fn run_postgres(
    conn: &mut PgConnection,
    request: &BackendRequest<'_>,
    adapters: &TypeAdapters<PgRow>,
) -> Result<BackendOutcome, sqlx::Error> {
    if request.kind.returns_rows() {
        let stream = sqlx::query(request.statement).fetch(&mut *conn);
        collect_rows(stream, adapters, request.max_rows).await
    } else {
        let done = sqlx::query(request.statement).execute(&mut *conn).await?;
        Ok(BackendOutcome::Affected(done.rows_affected()))
    }
}

async fn run_mysql(
    conn: &mut MySqlConnection,
    request: &BackendRequest<'_>,
    adapters: &TypeAdapters<MySqlRow>,
) -> Result<BackendOutcome, sqlx::Error> {
    if request.kind.returns_rows() {
        let stream = sqlx::query(request.statement).fetch(&mut *conn);
        collect_rows(stream, adapters, request.max_rows).await
    } else {
        let done = sqlx::query(request.statement).execute(&mut *conn).await?;
        Ok(BackendOutcome::Affected(done.rows_affected()))
    }
}

async fn run_sqlite(
    conn: &mut SqliteConnection,
    request: &BackendRequest<'_>,
    adapters: &TypeAdapters<SqliteRow>,
) -> Result<BackendOutcome, sqlx::Error> {
    if request.kind.returns_rows() {
        let stream = sqlx::query(request.statement).fetch(&mut *conn);
        collect_rows(stream, adapters, request.max_rows).await
    } else {
        let done = sqlx::query(request.statement).execute(&mut *conn).await?;
        Ok(BackendOutcome::Affected(done.rows_affected()))
    }
}

impl Default for SqlxConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackendConnector for SqlxConnector {
    async fn execute(&self, request: BackendRequest<'_>) -> Result<Executed, FederationError> {
        debug!(
            datasource = request.datasource,
            driver = request.target.driver.name(),
            "opening connection"
        );
        match request.target.driver {
            DriverKind::Postgres => self.execute_postgres(&request).await,
            DriverKind::MySql => self.execute_mysql(&request).await,
            DriverKind::Sqlite => self.execute_sqlite(&request).await,
        }
    }
}

fn postgres_options(target: &ConnectionTarget) -> Result<PgConnectOptions, FederationError> {
    let mut options = match &target.url {
        Some(url) => PgConnectOptions::from_str(url).map_err(invalid_url)?,
        None => {
            let mut options = PgConnectOptions::new_without_pgpass()
                .host(target.host.as_deref().unwrap_or("localhost"))
                .port(target.port.unwrap_or(5432));
            if let Some(database) = &target.database {
                options = options.database(database);
            }
            options
        }
    };
    if let Some(username) = &target.username {
        options = options.username(username);
    }
    if let Some(password) = &target.password {
        options = options.password(password.expose_secret());
    }
    Ok(options.disable_statement_logging())
}

fn mysql_options(target: &ConnectionTarget) -> Result<MySqlConnectOptions, FederationError> {
    let mut options = match &target.url {
        Some(url) => MySqlConnectOptions::from_str(url).map_err(invalid_url)?,
        None => {
            let mut options = MySqlConnectOptions::new()
                .host(target.host.as_deref().unwrap_or("localhost"))
                .port(target.port.unwrap_or(3306));
            if let Some(database) = &target.database {
                options = options.database(database);
            }
            options
        }
    };
    if let Some(username) = &target.username {
        options = options.username(username);
    }
    if let Some(password) = &target.password {
        options = options.password(password.expose_secret());
    }
    Ok(options.disable_statement_logging())
}

fn sqlite_options(target: &ConnectionTarget) -> Result<SqliteConnectOptions, FederationError> {
    let options = match (&target.url, &target.database) {
        (Some(url), _) => SqliteConnectOptions::from_str(url).map_err(invalid_url)?,
        (None, Some(path)) => SqliteConnectOptions::new().filename(path),
        (None, None) => {
            return Err(FederationError::Configuration(
                "sqlite datasource needs a url or database path".to_string(),
            ))
        }
    };
    Ok(options.disable_statement_logging())
}

fn invalid_url(e: sqlx::Error) -> FederationError {
    FederationError::Configuration(format!("invalid connection url: {}", e))
}

async fn connect<C>(
    request: &BackendRequest<'_>,
    connecting: impl Future<Output = Result<C, sqlx::Error>>,
) -> Result<C, FederationError> {
    match tokio::time::timeout(request.target.connect_timeout, connecting).await {
        Ok(Ok(conn)) => Ok(conn),
        Ok(Err(e)) => Err(FederationError::ConnectionFailure(e.to_string())),
        Err(_) => Err(FederationError::ConnectionFailure(format!(
            "connect timed out after {} ms",
            millis(request.target.connect_timeout)
        ))),
    }
}

/// Client-side bound on statement execution.
async fn bounded<T>(
    limit: Duration,
    work: impl Future<Output = Result<T, sqlx::Error>>,
) -> Result<T, FederationError> {
    let timeout_ms = millis(limit);
    match tokio::time::timeout(limit, work).await {
        Ok(result) => result.map_err(|e| execution_error(e, timeout_ms)),
        Err(_) => Err(FederationError::TimeoutExceeded { timeout_ms }),
    }
}

fn execution_error(e: sqlx::Error, timeout_ms: u64) -> FederationError {
    if let sqlx::Error::Database(db) = &e {
        if matches!(
            db.code().as_deref(),
            Some(PG_QUERY_CANCELED) | Some(MYSQL_EXECUTION_TIME_EXCEEDED)
        ) {
            return FederationError::TimeoutExceeded { timeout_ms };
        }
    }
    match e {
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut => {
            FederationError::ConnectionFailure(e.to_string())
        }
        other => FederationError::ExecutionFailure(other.to_string()),
    }
}

/// Drain a row stream into records, stopping once `max_rows` rows are read.
async fn collect_rows<R, S>(
    mut stream: S,
    adapters: &TypeAdapters<R>,
    max_rows: Option<u64>,
) -> Result<BackendOutcome, sqlx::Error>
where
    R: Row,
    usize: ColumnIndex<R>,
    S: Stream<Item = Result<R, sqlx::Error>> + Unpin,
{
    let mut columns = Vec::new();
    let mut rows = Vec::new();
    while let Some(row) = stream.try_next().await? {
        if rows.is_empty() {
            columns = TypeAdapters::<R>::describe(&row);
        }
        rows.push(adapters.map_row(&row));
        if max_rows.is_some_and(|cap| rows.len() as u64 >= cap) {
            break;
        }
    }
    Ok(BackendOutcome::Rows { columns, rows })
}

fn release(closed: Result<(), sqlx::Error>, datasource: &str) {
    if let Err(e) = closed {
        debug!(datasource, error = %e, "connection close failed");
    }
}
