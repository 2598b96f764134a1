pub mod config;
pub mod domain;
pub mod errors;
pub mod guardrails;

pub use domain::execution::{ExecutionOutcome, ResultSet};
pub use domain::message::{Message, MessagePayload, Role};
pub use domain::schema::{ColumnInfo, SchemaSnapshot};
pub use domain::statement::{SqlCandidate, StatementKind};
pub use errors::{ConnectionError, ExecutionErrorKind, RejectReason, TurnError};
pub use guardrails::{StatementValidator, ValidatedStatement, Verdict};
