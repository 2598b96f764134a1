//! Tool catalog offered to the model and decoding of its replies.

use pgchat_core::domain::statement::{SqlCandidate, StatementKind};
use serde_json::{json, Map, Value};

use crate::llm::{ModelResponse, ToolCall, ToolSpec};

pub const FETCH_SCHEMA: &str = "fetch_schema";
pub const RUN_SQL: &str = "run_sql";

pub fn fetch_schema_spec() -> ToolSpec {
    ToolSpec {
        name: FETCH_SCHEMA,
        description: "Look up the database structure: tables, columns and their types. \
                      Pass `table` to describe a single table.",
        parameters: json!({
            "type": "object",
            "properties": {
                "table": {
                    "type": "string",
                    "description": "Optional table name; omit to describe every table."
                }
            },
            "additionalProperties": false
        }),
    }
}

pub fn run_sql_spec() -> ToolSpec {
    ToolSpec {
        name: RUN_SQL,
        description: "Run exactly one read-only PostgreSQL statement and return its rows.",
        parameters: json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "A single SELECT, WITH, VALUES or TABLE statement."
                },
                "kind": {
                    "type": "string",
                    "enum": ["query", "mutation", "ddl"],
                    "description": "What the statement does."
                }
            },
            "required": ["query"],
            "additionalProperties": false
        }),
    }
}

/// A model reply, decoded at the boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelReply {
    DirectAnswer(String),
    SchemaRequest { table: Option<String> },
    SqlCandidate(SqlCandidate),
    Unclear { detail: String },
}

impl ModelReply {
    pub fn decode(response: &ModelResponse) -> Self {
        match response.tool_calls.as_slice() {
            [] => match response.content.as_deref().map(str::trim) {
                Some(text) if !text.is_empty() => Self::DirectAnswer(text.to_string()),
                _ => Self::unclear("empty reply"),
            },
            [call] => Self::decode_tool_call(call),
            calls => Self::unclear(format!("{} tool calls in one reply", calls.len())),
        }
    }

    fn decode_tool_call(call: &ToolCall) -> Self {
        let arguments = match &call.arguments {
            Value::Object(arguments) => arguments.clone(),
            Value::Null => Map::new(),
            other => {
                return Self::unclear(format!(
                    "`{}` arguments are not an object: {other}",
                    call.name
                ));
            }
        };

        match call.name.as_str() {
            FETCH_SCHEMA => match arguments.get("table") {
                None | Some(Value::Null) => Self::SchemaRequest { table: None },
                Some(Value::String(table)) if table.trim().is_empty() => {
                    Self::SchemaRequest { table: None }
                }
                Some(Value::String(table)) => {
                    Self::SchemaRequest { table: Some(table.trim().to_string()) }
                }
                Some(other) => Self::unclear(format!("`table` must be a string, got {other}")),
            },
            RUN_SQL => {
                let Some(Value::String(query)) = arguments.get("query") else {
                    return Self::unclear("`run_sql` called without a `query` string");
                };
                let declared_kind = match arguments.get("kind") {
                    None | Some(Value::Null) => StatementKind::Query,
                    Some(Value::String(kind)) => match kind.parse::<StatementKind>() {
                        Ok(kind) => kind,
                        Err(detail) => return Self::unclear(detail),
                    },
                    Some(other) => {
                        return Self::unclear(format!("`kind` must be a string, got {other}"));
                    }
                };
                Self::SqlCandidate(SqlCandidate::new(query.clone(), declared_kind))
            }
            other => Self::unclear(format!("unknown tool `{other}`")),
        }
    }

    fn unclear(detail: impl Into<String>) -> Self {
        Self::Unclear { detail: detail.into() }
    }
}
