use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why the statement validator refused a candidate.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum RejectReason {
    #[error("`{keyword}` is not allowed; only read-only queries can be run")]
    DisallowedOperation { keyword: String },
    #[error("multiple statements in one request are not allowed")]
    MultiStatementRejected,
    #[error("statement could not be recognized as a read-only query: {detail}")]
    UnrecognizedStatement { detail: String },
    #[error("statement is empty")]
    EmptyStatement,
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::DisallowedOperation { .. } => "disallowed_operation",
            Self::MultiStatementRejected => "multi_statement_rejected",
            Self::UnrecognizedStatement { .. } => "unrecognized_statement",
            Self::EmptyStatement => "empty_statement",
        }
    }

    pub(crate) fn disallowed(keyword: impl Into<String>) -> Self {
        Self::DisallowedOperation { keyword: keyword.into() }
    }

    pub(crate) fn unrecognized(detail: impl Into<String>) -> Self {
        Self::UnrecognizedStatement { detail: detail.into() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    Timeout,
    Malformed,
    Permission,
    Database,
}

impl ExecutionErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Malformed => "malformed",
            Self::Permission => "permission",
            Self::Database => "database",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("database connection failed: {message}")]
pub struct ConnectionError {
    pub message: String,
}

impl ConnectionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Failures that abort a turn without touching conversation history.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TurnError {
    #[error("language model did not respond within {0:?}")]
    ResolutionTimeout(Duration),
    #[error("language model request failed: {0}")]
    Resolution(String),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

impl TurnError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::ResolutionTimeout(_) => {
                "The language model took too long to respond. Please try again."
            }
            Self::Resolution(_) => {
                "I couldn't get a response from the language model. Please try again."
            }
            Self::Connection(_) => {
                "The database is unreachable right now. Check the connection and try again."
            }
        }
    }
}
