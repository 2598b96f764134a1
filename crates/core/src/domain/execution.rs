use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ExecutionErrorKind;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// Set when the database had more rows than the configured cap.
    pub truncated: bool,
}

impl ResultSet {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Single-cell results (`SELECT COUNT(*) ...`) are common enough that the
    /// fallback rendering treats them specially.
    pub fn scalar(&self) -> Option<&Value> {
        match (self.columns.len(), self.rows.as_slice()) {
            (1, [row]) => row.first(),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Rows(ResultSet),
    Failed { kind: ExecutionErrorKind, message: String },
}

impl ExecutionOutcome {
    pub fn failed(kind: ExecutionErrorKind, message: impl Into<String>) -> Self {
        Self::Failed { kind, message: message.into() }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Rows(_))
    }

    /// Plain-text rendering used when the phrasing pass yields nothing usable.
    pub fn summary(&self) -> String {
        match self {
            Self::Rows(result) => summarize_rows(result),
            Self::Failed { kind, message } => {
                format!("The query failed ({}): {message}", kind.as_str())
            }
        }
    }
}

fn summarize_rows(result: &ResultSet) -> String {
    if let Some(value) = result.scalar() {
        return format!("The result is {}.", render_cell(value));
    }
    if result.rows.is_empty() {
        if result.columns.is_empty() {
            return "The query returned no rows.".to_string();
        }
        return format!("The query returned no rows (columns: {}).", result.columns.join(", "));
    }

    let mut lines = vec![result.columns.join(" | ")];
    lines.extend(
        result
            .rows
            .iter()
            .map(|row| row.iter().map(render_cell).collect::<Vec<_>>().join(" | ")),
    );
    if result.truncated {
        lines.push(format!("(showing the first {} rows)", result.rows.len()));
    }
    lines.join("\n")
}

pub fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
