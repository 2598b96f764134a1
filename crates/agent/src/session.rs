use std::time::Duration;

use pgchat_core::config::AppConfig;
use pgchat_core::domain::execution::ExecutionOutcome;
use pgchat_core::domain::message::{Message, MessagePayload};
use pgchat_core::domain::schema::SchemaSnapshot;
use pgchat_core::errors::{ConnectionError, TurnError};
use pgchat_core::guardrails::{StatementValidator, Verdict};
use pgchat_db::executor::StatementRunner;
use pgchat_db::introspection::{SchemaIntrospector, SchemaSource};
use tracing::{debug, info};

use crate::conversation::{ConversationState, SYSTEM_PREAMBLE};
use crate::llm::LlmClient;
use crate::resolver::{IntentResolver, Resolution};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSettings {
    pub max_history_messages: usize,
    pub model_timeout: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_history_messages: config.agent.max_history_messages,
            model_timeout: Duration::from_secs(config.llm.timeout_secs),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    ResolvingIntent,
    Answering,
    Validating,
    Executing,
    Phrasing,
}

impl TurnPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::ResolvingIntent => "resolving_intent",
            Self::Answering => "answering",
            Self::Validating => "validating",
            Self::Executing => "executing",
            Self::Phrasing => "phrasing",
        }
    }
}

/// One operator's conversation with the database.
pub struct ConversationSession<L, S, R> {
    resolver: IntentResolver<L>,
    introspector: SchemaIntrospector<S>,
    runner: R,
    validator: StatementValidator,
    state: ConversationState,
    phase: TurnPhase,
}

impl<L, S, R> ConversationSession<L, S, R>
where
    L: LlmClient,
    S: SchemaSource,
    R: StatementRunner,
{
    pub fn new(llm: L, schema_source: S, runner: R, settings: SessionSettings) -> Self {
        Self {
            resolver: IntentResolver::new(llm, settings.model_timeout),
            introspector: SchemaIntrospector::new(schema_source),
            runner,
            validator: StatementValidator::new(),
            state: ConversationState::new(SYSTEM_PREAMBLE, settings.max_history_messages),
            phase: TurnPhase::Idle,
        }
    }

    /// Runs one turn. On `Err` the history is exactly as it was before the
    /// call; the user/assistant pair is committed only once a reply exists.
    pub async fn turn(&mut self, utterance: &str) -> Result<String, TurnError> {
        let utterance = utterance.trim();
        let result = self.run_turn(utterance).await;
        self.enter(TurnPhase::Idle);

        let (reply, payload) = result?;
        let assistant = match payload {
            Some(payload) => Message::assistant(reply.clone()).with_payload(payload),
            None => Message::assistant(reply.clone()),
        };
        self.state.commit_turn(Message::user(utterance), assistant);
        info!(
            event_name = "agent.turn.completed",
            history_len = self.state.len(),
            "turn completed"
        );
        Ok(reply)
    }

    async fn run_turn(
        &mut self,
        utterance: &str,
    ) -> Result<(String, Option<MessagePayload>), TurnError> {
        self.enter(TurnPhase::ResolvingIntent);
        let resolution =
            self.resolver.resolve(self.state.messages(), utterance, &mut self.introspector).await?;

        let candidate = match resolution {
            Resolution::DirectAnswer(text) => {
                self.enter(TurnPhase::Answering);
                return Ok((text, None));
            }
            Resolution::Candidate(candidate) => candidate,
        };

        self.enter(TurnPhase::Validating);
        let payload = match self.validator.validate(&candidate) {
            Verdict::Reject(reason) => {
                info!(
                    event_name = "agent.statement.refused",
                    reason = reason.code(),
                    "statement refused before execution"
                );
                MessagePayload::Refused { sql: candidate.sql, reason }
            }
            Verdict::Accept(statement) => {
                self.enter(TurnPhase::Executing);
                let sql = statement.sql().to_string();
                match self.runner.execute(&statement).await? {
                    ExecutionOutcome::Rows(result) => MessagePayload::Table { sql, result },
                    ExecutionOutcome::Failed { kind, message } => {
                        MessagePayload::ExecutionFailed { sql, kind, message }
                    }
                }
            }
        };

        self.enter(TurnPhase::Phrasing);
        let reply = self.resolver.phrase(self.state.messages(), utterance, &payload).await?;
        Ok((reply, Some(payload)))
    }

    fn enter(&mut self, next: TurnPhase) {
        debug!(
            event_name = "agent.turn.phase",
            from = self.phase.as_str(),
            to = next.as_str(),
            "turn phase transition"
        );
        self.phase = next;
    }

    pub fn clear(&mut self) {
        self.state.clear();
        info!(event_name = "agent.session.cleared", "conversation cleared");
    }

    pub fn history(&self) -> &[Message] {
        self.state.messages()
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    pub async fn refresh_schema(&mut self) -> Result<&SchemaSnapshot, ConnectionError> {
        self.introspector.refresh().await
    }
}
