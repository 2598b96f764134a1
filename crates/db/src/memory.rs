//! Database-free doubles for the schema source and statement runner.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use pgchat_core::domain::execution::ExecutionOutcome;
use pgchat_core::domain::schema::SchemaSnapshot;
use pgchat_core::errors::{ConnectionError, ExecutionErrorKind};
use pgchat_core::guardrails::ValidatedStatement;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::executor::{RowCollector, StatementRunner};
use crate::introspection::SchemaSource;

pub struct InMemorySchemaSource {
    snapshot: RwLock<Result<SchemaSnapshot, ConnectionError>>,
    fetches: AtomicUsize,
}

impl InMemorySchemaSource {
    pub fn new(snapshot: SchemaSnapshot) -> Self {
        Self { snapshot: RwLock::new(Ok(snapshot)), fetches: AtomicUsize::new(0) }
    }

    pub fn unreachable(message: &str) -> Self {
        Self {
            snapshot: RwLock::new(Err(ConnectionError::new(message))),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Simulates a migration applied behind the session's back.
    pub async fn replace(&self, snapshot: SchemaSnapshot) {
        *self.snapshot.write().await = Ok(snapshot);
    }

    /// Number of catalog queries issued so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SchemaSource for InMemorySchemaSource {
    async fn fetch_snapshot(&self) -> Result<SchemaSnapshot, ConnectionError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.snapshot.read().await.clone()
    }
}

#[derive(Clone, Debug)]
enum Scripted {
    Rows { columns: Vec<String>, rows: Vec<Vec<Value>> },
    Failure { kind: ExecutionErrorKind, message: String },
}

/// Answers statements from a script keyed by normalized SQL text and records
/// everything it was asked to run. Applies the same row cap as the real
/// executor.
pub struct InMemoryStatementRunner {
    max_rows: usize,
    scripts: RwLock<HashMap<String, Scripted>>,
    executed: RwLock<Vec<String>>,
    unreachable: Option<String>,
}

impl InMemoryStatementRunner {
    pub fn new(max_rows: usize) -> Self {
        Self {
            max_rows: max_rows.max(1),
            scripts: RwLock::new(HashMap::new()),
            executed: RwLock::new(Vec::new()),
            unreachable: None,
        }
    }

    pub fn unreachable(message: &str) -> Self {
        Self { unreachable: Some(message.to_string()), ..Self::new(1) }
    }

    pub fn with_rows(mut self, sql: &str, columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        let columns = columns.iter().map(|column| column.to_string()).collect();
        self.scripts.get_mut().insert(normalize(sql), Scripted::Rows { columns, rows });
        self
    }

    pub fn with_failure(mut self, sql: &str, kind: ExecutionErrorKind, message: &str) -> Self {
        self.scripts
            .get_mut()
            .insert(normalize(sql), Scripted::Failure { kind, message: message.to_string() });
        self
    }

    pub async fn executed(&self) -> Vec<String> {
        self.executed.read().await.clone()
    }
}

#[async_trait]
impl StatementRunner for InMemoryStatementRunner {
    async fn execute(
        &self,
        statement: &ValidatedStatement,
    ) -> Result<ExecutionOutcome, ConnectionError> {
        if let Some(message) = &self.unreachable {
            return Err(ConnectionError::new(message.as_str()));
        }
        self.executed.write().await.push(statement.sql().to_string());

        let scripts = self.scripts.read().await;
        let outcome = match scripts.get(&normalize(statement.sql())) {
            Some(Scripted::Rows { columns, rows }) => {
                let mut collector = RowCollector::new(self.max_rows);
                collector.set_columns(columns.clone());
                for row in rows {
                    if !collector.push(row.clone()) {
                        break;
                    }
                }
                ExecutionOutcome::Rows(collector.finish())
            }
            Some(Scripted::Failure { kind, message }) => {
                ExecutionOutcome::failed(*kind, message.as_str())
            }
            None => ExecutionOutcome::failed(
                ExecutionErrorKind::Malformed,
                format!("no scripted result for `{}`", statement.sql()),
            ),
        };
        Ok(outcome)
    }
}

fn normalize(sql: &str) -> String {
    sql.trim()
        .trim_end_matches(';')
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use pgchat_core::domain::statement::SqlCandidate;
    use pgchat_core::errors::ExecutionErrorKind;
    use pgchat_core::guardrails::{StatementValidator, ValidatedStatement};
    use pgchat_core::ExecutionOutcome;
    use serde_json::json;

    use super::InMemoryStatementRunner;
    use crate::executor::StatementRunner;

    fn validated(sql: &str) -> ValidatedStatement {
        StatementValidator::new()
            .validate(&SqlCandidate::query(sql))
            .into_result()
            .expect("test statement should validate")
    }

    #[tokio::test]
    async fn result_over_cap_returns_exactly_cap_rows() {
        let rows = (0..25).map(|n| vec![json!(n)]).collect();
        let runner =
            InMemoryStatementRunner::new(10).with_rows("SELECT n FROM numbers", &["n"], rows);

        let outcome =
            runner.execute(&validated("select n  from numbers;")).await.expect("reachable");
        let result = match outcome {
            ExecutionOutcome::Rows(result) => result,
            other => panic!("expected rows, got {other:?}"),
        };
        assert_eq!(result.rows.len(), 10);
        assert!(result.truncated);
        assert_eq!(result.columns, vec!["n".to_string()]);
    }

    #[tokio::test]
    async fn result_under_cap_is_not_truncated() {
        let runner = InMemoryStatementRunner::new(10).with_rows(
            "SELECT COUNT(*) FROM orders",
            &["count"],
            vec![vec![json!(42)]],
        );

        let outcome =
            runner.execute(&validated("SELECT COUNT(*) FROM orders")).await.expect("reachable");
        let result = match outcome {
            ExecutionOutcome::Rows(result) => result,
            other => panic!("expected rows, got {other:?}"),
        };
        assert!(!result.truncated);
        assert_eq!(result.scalar(), Some(&json!(42)));
        assert_eq!(runner.executed().await, vec!["SELECT COUNT(*) FROM orders".to_string()]);
    }

    #[tokio::test]
    async fn empty_result_keeps_its_columns() {
        let runner = InMemoryStatementRunner::new(10).with_rows(
            "SELECT id, total FROM orders WHERE total < 0",
            &["id", "total"],
            Vec::new(),
        );

        let outcome = runner
            .execute(&validated("SELECT id, total FROM orders WHERE total < 0"))
            .await
            .expect("reachable");
        assert_eq!(outcome.summary(), "The query returned no rows (columns: id, total).");
    }

    #[tokio::test]
    async fn scripted_failures_and_unreachable_database() {
        let runner = InMemoryStatementRunner::new(5).with_failure(
            "SELECT pg_size_pretty(1)",
            ExecutionErrorKind::Permission,
            "permission denied",
        );
        let outcome =
            runner.execute(&validated("SELECT pg_size_pretty(1)")).await.expect("reachable");
        assert_eq!(
            outcome,
            ExecutionOutcome::failed(ExecutionErrorKind::Permission, "permission denied")
        );

        let down = InMemoryStatementRunner::unreachable("connection reset");
        let error = down.execute(&validated("SELECT 1")).await.expect_err("unreachable");
        assert_eq!(error.message, "connection reset");
        assert!(down.executed().await.is_empty());
    }
}
