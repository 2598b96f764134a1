//! Conversational layer of pgchat.
//!
//! A turn moves through `resolver` (the model decides between a direct answer
//! and a SQL candidate, optionally after one schema lookup), the statement
//! validator, the executor and a phrasing pass, and is committed to the
//! bounded history in `conversation` by `session`.
//!
//! The model only ever proposes SQL. Whether a statement runs is decided by
//! `pgchat_core::guardrails`, and it always runs in a read-only transaction.

pub mod conversation;
pub mod llm;
pub mod openai;
pub mod resolver;
pub mod scripted;
pub mod session;
pub mod tools;

pub use conversation::ConversationState;
pub use llm::{ChatMessage, ChatRequest, LlmClient, LlmError, ModelResponse, ToolCall, ToolSpec};
pub use openai::OpenAiClient;
pub use resolver::{IntentResolver, Resolution};
pub use scripted::ScriptedLlmClient;
pub use session::{ConversationSession, SessionSettings, TurnPhase};
pub use tools::ModelReply;
