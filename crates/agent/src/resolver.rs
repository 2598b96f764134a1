use std::time::Duration;

use pgchat_core::domain::execution::ExecutionOutcome;
use pgchat_core::domain::message::{Message, MessagePayload, Role};
use pgchat_core::domain::schema::render_table;
use pgchat_core::domain::statement::SqlCandidate;
use pgchat_core::errors::TurnError;
use pgchat_db::introspection::{SchemaError, SchemaIntrospector, SchemaSource};
use tracing::{debug, warn};

use crate::llm::{ChatMessage, ChatRequest, LlmClient, LlmError, ModelResponse};
use crate::tools::{fetch_schema_spec, run_sql_spec, ModelReply};

pub const CLARIFY_REPLY: &str =
    "I'm not sure what you'd like me to do. Could you rephrase the question?";

/// What the resolver decided to do with an utterance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    DirectAnswer(String),
    Candidate(SqlCandidate),
}

pub struct IntentResolver<L> {
    llm: L,
    call_timeout: Duration,
}

impl<L> IntentResolver<L>
where
    L: LlmClient,
{
    pub fn new(llm: L, call_timeout: Duration) -> Self {
        Self { llm, call_timeout }
    }

    /// Makes at most two model calls and at most one schema lookup.
    pub async fn resolve<S>(
        &self,
        history: &[Message],
        utterance: &str,
        introspector: &mut SchemaIntrospector<S>,
    ) -> Result<Resolution, TurnError>
    where
        S: SchemaSource,
    {
        let mut messages = conversation_messages(history, utterance);
        let request = ChatRequest {
            messages: messages.clone(),
            tools: vec![fetch_schema_spec(), run_sql_spec()],
        };

        let table = match ModelReply::decode(&self.call(&request).await?) {
            ModelReply::SchemaRequest { table } => table,
            other => return Ok(settle(other)),
        };

        debug!(
            event_name = "agent.resolve.schema_requested",
            table = ?table,
            "model asked for schema"
        );
        let context = schema_context(introspector, table.as_deref()).await?;
        messages.push(ChatMessage::new(Role::System, context));
        let request = ChatRequest { messages, tools: vec![run_sql_spec()] };

        match ModelReply::decode(&self.call(&request).await?) {
            ModelReply::SchemaRequest { .. } => {
                Ok(settle(ModelReply::Unclear { detail: "second schema request".to_string() }))
            }
            other => Ok(settle(other)),
        }
    }

    /// Turns an execution result or refusal into a reply for the operator.
    pub async fn phrase(
        &self,
        history: &[Message],
        utterance: &str,
        payload: &MessagePayload,
    ) -> Result<String, TurnError> {
        let mut messages = conversation_messages(history, utterance);
        let rendered = serde_json::to_string(payload).unwrap_or_else(|_| payload.context_note());
        messages.push(ChatMessage::new(
            Role::System,
            format!(
                "Result of the SQL proposed for the last question:\n{rendered}\n\
                 Answer the question in plain language using only this result. \
                 If the statement was refused or failed, explain why briefly. \
                 If `truncated` is true, say that only part of the rows is shown."
            ),
        ));

        let response = self.call(&ChatRequest { messages, tools: Vec::new() }).await?;
        match response.content.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => Ok(text.to_string()),
            _ => {
                debug!(
                    event_name = "agent.phrase.fallback",
                    "empty phrasing reply, rendering result"
                );
                Ok(fallback_reply(payload))
            }
        }
    }

    async fn call(&self, request: &ChatRequest) -> Result<ModelResponse, TurnError> {
        match tokio::time::timeout(self.call_timeout, self.llm.complete(request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(LlmError::Timeout)) | Err(_) => {
                warn!(
                    event_name = "agent.llm.timeout",
                    timeout_ms = self.call_timeout.as_millis() as u64,
                    "model call timed out"
                );
                Err(TurnError::ResolutionTimeout(self.call_timeout))
            }
            Ok(Err(error)) => {
                warn!(event_name = "agent.llm.failed", error = %error, "model call failed");
                Err(TurnError::Resolution(error.to_string()))
            }
        }
    }
}

fn settle(reply: ModelReply) -> Resolution {
    match reply {
        ModelReply::DirectAnswer(text) => Resolution::DirectAnswer(text),
        ModelReply::SqlCandidate(candidate) => Resolution::Candidate(candidate),
        ModelReply::SchemaRequest { .. } => Resolution::DirectAnswer(CLARIFY_REPLY.to_string()),
        ModelReply::Unclear { detail } => {
            debug!(event_name = "agent.resolve.unclear", %detail, "model reply was unclear");
            Resolution::DirectAnswer(CLARIFY_REPLY.to_string())
        }
    }
}

/// History replayed to the model. Structured payloads travel as one-line
/// notes rather than full result sets.
fn conversation_messages(history: &[Message], utterance: &str) -> Vec<ChatMessage> {
    let mut messages: Vec<ChatMessage> = history
        .iter()
        .map(|message| match message.payload() {
            Some(payload) => ChatMessage::new(
                message.role(),
                format!("{}\n{}", message.content(), payload.context_note()),
            ),
            None => ChatMessage::new(message.role(), message.content()),
        })
        .collect();
    messages.push(ChatMessage::new(Role::User, utterance));
    messages
}

async fn schema_context<S>(
    introspector: &mut SchemaIntrospector<S>,
    table: Option<&str>,
) -> Result<String, TurnError>
where
    S: SchemaSource,
{
    let Some(table) = table else {
        let snapshot = introspector.describe().await?;
        return Ok(format!("Database schema:\n{}", snapshot.render()));
    };

    match introspector.describe_table(table).await {
        Ok((name, columns)) => Ok(format!("Database schema:\n{}", render_table(&name, &columns))),
        Err(SchemaError::TableNotFound { table }) => {
            let snapshot = introspector.describe().await?;
            Ok(format!(
                "There is no table named `{table}`. Database schema:\n{}",
                snapshot.render()
            ))
        }
        Err(SchemaError::Connection(error)) => Err(error.into()),
    }
}

pub(crate) fn fallback_reply(payload: &MessagePayload) -> String {
    match payload {
        MessagePayload::Table { result, .. } => ExecutionOutcome::Rows(result.clone()).summary(),
        MessagePayload::ExecutionFailed { kind, message, .. } => {
            ExecutionOutcome::failed(*kind, message.as_str()).summary()
        }
        MessagePayload::Refused { reason, .. } => format!("I can't run that statement: {reason}."),
    }
}
