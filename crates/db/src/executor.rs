use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use pgchat_core::domain::execution::{ExecutionOutcome, ResultSet};
use pgchat_core::errors::{ConnectionError, ExecutionErrorKind};
use pgchat_core::guardrails::ValidatedStatement;
use serde_json::Value;
use sqlx::{Executor, Row, Statement};
use tracing::{debug, warn};

use crate::connection::DbPool;
use crate::value::{column_names, decode_row};

/// Extra time the client waits past the server-side `statement_timeout`
/// before abandoning the statement itself.
const CLIENT_DEADLINE_GRACE: Duration = Duration::from_secs(2);

#[async_trait]
pub trait StatementRunner: Send + Sync {
    /// Runs one validated statement in its own read-only transaction.
    /// Only an unreachable database is an `Err`; everything else the database
    /// reports comes back as `ExecutionOutcome::Failed`.
    async fn execute(
        &self,
        statement: &ValidatedStatement,
    ) -> Result<ExecutionOutcome, ConnectionError>;
}

#[async_trait]
impl<T> StatementRunner for Arc<T>
where
    T: StatementRunner + ?Sized,
{
    async fn execute(
        &self,
        statement: &ValidatedStatement,
    ) -> Result<ExecutionOutcome, ConnectionError> {
        (**self).execute(statement).await
    }
}

/// Accumulates rows up to a cap, remembering whether anything was dropped.
#[derive(Debug)]
pub struct RowCollector {
    max_rows: usize,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    truncated: bool,
}

impl RowCollector {
    pub fn new(max_rows: usize) -> Self {
        Self { max_rows, columns: Vec::new(), rows: Vec::new(), truncated: false }
    }

    pub fn set_columns(&mut self, columns: Vec<String>) {
        self.columns = columns;
    }

    pub fn has_columns(&self) -> bool {
        !self.columns.is_empty()
    }

    /// Returns `false` once the cap is exceeded and the caller should stop
    /// pulling rows.
    pub fn push(&mut self, row: Vec<Value>) -> bool {
        if self.rows.len() >= self.max_rows {
            self.truncated = true;
            return false;
        }
        self.rows.push(row);
        true
    }

    pub fn finish(self) -> ResultSet {
        ResultSet { columns: self.columns, rows: self.rows, truncated: self.truncated }
    }
}

pub struct PgStatementRunner {
    pool: DbPool,
    max_rows: usize,
    statement_timeout: Duration,
}

impl PgStatementRunner {
    pub fn new(pool: DbPool, max_rows: usize, statement_timeout: Duration) -> Self {
        Self { pool, max_rows: max_rows.max(1), statement_timeout }
    }

    async fn run(&self, sql: &str) -> Result<ResultSet, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION READ ONLY").persistent(false).execute(&mut *tx).await?;
        let timeout =
            format!("SET LOCAL statement_timeout = {}", self.statement_timeout.as_millis());
        sqlx::query(&timeout).persistent(false).execute(&mut *tx).await?;

        let mut collector = RowCollector::new(self.max_rows);
        {
            let mut rows = sqlx::query(sql).persistent(false).fetch(&mut *tx);
            while let Some(row) = rows.try_next().await? {
                if !collector.has_columns() {
                    collector.set_columns(column_names(row.columns()));
                }
                // Reading one row past the cap is how truncation is detected.
                if !collector.push(decode_row(&row)) {
                    break;
                }
            }
        }
        if !collector.has_columns() {
            // No rows to read names from; take them from the row description.
            let statement = (&mut *tx).prepare(sql).await?;
            collector.set_columns(column_names(statement.columns()));
        }

        tx.rollback().await?;
        Ok(collector.finish())
    }
}

#[async_trait]
impl StatementRunner for PgStatementRunner {
    async fn execute(
        &self,
        statement: &ValidatedStatement,
    ) -> Result<ExecutionOutcome, ConnectionError> {
        let deadline = self.statement_timeout + CLIENT_DEADLINE_GRACE;
        match tokio::time::timeout(deadline, self.run(statement.sql())).await {
            Ok(Ok(result)) => {
                debug!(
                    event_name = "db.statement.completed",
                    rows = result.row_count(),
                    truncated = result.truncated,
                    "statement completed"
                );
                Ok(ExecutionOutcome::Rows(result))
            }
            Ok(Err(error)) => classify_error(error),
            Err(_) => {
                warn!(
                    event_name = "db.statement.deadline_exceeded",
                    timeout_ms = deadline.as_millis() as u64,
                    "statement abandoned after client deadline"
                );
                Ok(ExecutionOutcome::failed(
                    ExecutionErrorKind::Timeout,
                    format!(
                        "statement did not finish within {}s",
                        self.statement_timeout.as_secs()
                    ),
                ))
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SqlStateClass {
    Connection,
    Failure(ExecutionErrorKind),
}

/// Maps a SQLSTATE code onto the executor's outcome taxonomy.
pub(crate) fn classify_sqlstate(code: &str) -> SqlStateClass {
    match code {
        "57014" | "55P03" => SqlStateClass::Failure(ExecutionErrorKind::Timeout),
        "42501" | "25006" => SqlStateClass::Failure(ExecutionErrorKind::Permission),
        "57P01" | "57P02" | "57P03" => SqlStateClass::Connection,
        _ if code.starts_with("08") => SqlStateClass::Connection,
        _ if code.starts_with("28") => SqlStateClass::Failure(ExecutionErrorKind::Permission),
        _ if code.starts_with("42") || code.starts_with("22") => {
            SqlStateClass::Failure(ExecutionErrorKind::Malformed)
        }
        _ => SqlStateClass::Failure(ExecutionErrorKind::Database),
    }
}

fn classify_error(error: sqlx::Error) -> Result<ExecutionOutcome, ConnectionError> {
    match error {
        sqlx::Error::Database(database_error) => {
            let code = database_error.code().map(|code| code.into_owned()).unwrap_or_default();
            let message = database_error.message().to_string();
            match classify_sqlstate(&code) {
                SqlStateClass::Connection => Err(ConnectionError::new(message)),
                SqlStateClass::Failure(kind) => {
                    debug!(
                        event_name = "db.statement.failed",
                        sqlstate = %code,
                        kind = kind.as_str(),
                        "statement failed"
                    );
                    Ok(ExecutionOutcome::failed(kind, message))
                }
            }
        }
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => Err(ConnectionError::new(error.to_string())),
        other => Ok(ExecutionOutcome::failed(ExecutionErrorKind::Database, other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use pgchat_core::errors::ExecutionErrorKind;
    use serde_json::json;

    use super::{classify_error, classify_sqlstate, RowCollector, SqlStateClass};

    #[test]
    fn collector_caps_rows_and_flags_truncation() {
        let mut collector = RowCollector::new(3);
        collector.set_columns(vec!["n".to_string()]);
        let mut accepted = 0;
        for n in 0..10 {
            if !collector.push(vec![json!(n)]) {
                break;
            }
            accepted += 1;
        }

        let result = collector.finish();
        assert_eq!(accepted, 3);
        assert_eq!(result.rows.len(), 3);
        assert!(result.truncated);
        assert_eq!(result.rows[2], vec![json!(2)]);
    }

    #[test]
    fn collector_at_exact_cap_is_not_truncated() {
        let mut collector = RowCollector::new(2);
        assert!(collector.push(vec![json!(1)]));
        assert!(collector.push(vec![json!(2)]));

        let result = collector.finish();
        assert_eq!(result.rows.len(), 2);
        assert!(!result.truncated);
    }

    #[test]
    fn collector_keeps_columns_without_rows() {
        let mut collector = RowCollector::new(5);
        assert!(!collector.has_columns());
        collector.set_columns(vec!["id".to_string(), "total".to_string()]);

        let result = collector.finish();
        assert_eq!(result.columns, vec!["id".to_string(), "total".to_string()]);
        assert!(result.rows.is_empty());
        assert!(!result.truncated);
    }

    #[test]
    fn sqlstates_map_to_outcome_kinds() {
        assert_eq!(classify_sqlstate("57014"), SqlStateClass::Failure(ExecutionErrorKind::Timeout));
        assert_eq!(
            classify_sqlstate("42501"),
            SqlStateClass::Failure(ExecutionErrorKind::Permission)
        );
        assert_eq!(
            classify_sqlstate("25006"),
            SqlStateClass::Failure(ExecutionErrorKind::Permission)
        );
        for code in ["42601", "42P01", "22P02"] {
            assert_eq!(
                classify_sqlstate(code),
                SqlStateClass::Failure(ExecutionErrorKind::Malformed),
                "{code}"
            );
        }
        assert_eq!(classify_sqlstate("08006"), SqlStateClass::Connection);
        assert_eq!(classify_sqlstate("57P01"), SqlStateClass::Connection);
        assert_eq!(
            classify_sqlstate("40001"),
            SqlStateClass::Failure(ExecutionErrorKind::Database)
        );
    }

    #[test]
    fn transport_errors_become_connection_errors() {
        let pool_error = classify_error(sqlx::Error::PoolTimedOut);
        assert!(pool_error.is_err());

        let decode_error = classify_error(sqlx::Error::ColumnNotFound("missing".to_string()));
        assert!(matches!(
            decode_error,
            Ok(pgchat_core::ExecutionOutcome::Failed { kind: ExecutionErrorKind::Database, .. })
        ));
    }
}
