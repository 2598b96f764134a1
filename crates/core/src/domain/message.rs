use serde::{Deserialize, Serialize};

use crate::domain::execution::ResultSet;
use crate::errors::{ExecutionErrorKind, RejectReason};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Structured record attached to an assistant reply that involved SQL.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePayload {
    Table { sql: String, result: ResultSet },
    ExecutionFailed { sql: String, kind: ExecutionErrorKind, message: String },
    Refused { sql: String, reason: RejectReason },
}

impl MessagePayload {
    pub fn sql(&self) -> &str {
        match self {
            Self::Table { sql, .. }
            | Self::ExecutionFailed { sql, .. }
            | Self::Refused { sql, .. } => sql,
        }
    }

    /// One-line note replayed to the model on later turns so follow-up
    /// questions can refer to earlier queries without resending their rows.
    pub fn context_note(&self) -> String {
        match self {
            Self::Table { sql, result } => {
                let truncated = if result.truncated { ", truncated" } else { "" };
                format!("[ran SQL: {sql} -> {} row(s){truncated}]", result.row_count())
            }
            Self::ExecutionFailed { sql, kind, .. } => {
                format!("[ran SQL: {sql} -> failed ({})]", kind.as_str())
            }
            Self::Refused { sql, reason } => {
                format!("[refused SQL: {sql} -> {}]", reason.code())
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    role: Role,
    content: String,
    payload: Option<MessagePayload>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into(), payload: None }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into(), payload: None }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into(), payload: None }
    }

    pub fn with_payload(mut self, payload: MessagePayload) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn payload(&self) -> Option<&MessagePayload> {
        self.payload.as_ref()
    }

    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }
}

#[cfg(test)]
mod tests {
    use super::{Message, MessagePayload, Role};
    use crate::domain::execution::ResultSet;
    use crate::errors::RejectReason;

    #[test]
    fn context_note_summarizes_without_rows() {
        let payload = MessagePayload::Table {
            sql: "SELECT id FROM orders".to_string(),
            result: ResultSet {
                columns: vec!["id".to_string()],
                rows: vec![vec![1.into()], vec![2.into()]],
                truncated: true,
            },
        };
        assert_eq!(
            payload.context_note(),
            "[ran SQL: SELECT id FROM orders -> 2 row(s), truncated]"
        );
    }

    #[test]
    fn refused_payload_keeps_reason_code() {
        let message = Message::assistant("I can't run that.").with_payload(MessagePayload::Refused {
            sql: "DELETE FROM orders".to_string(),
            reason: RejectReason::DisallowedOperation { keyword: "delete".to_string() },
        });

        assert_eq!(message.role(), Role::Assistant);
        assert_eq!(message.payload().map(MessagePayload::sql), Some("DELETE FROM orders"));
        assert!(message
            .payload()
            .map(MessagePayload::context_note)
            .is_some_and(|note| note.contains("disallowed_operation")));
    }
}
