//! Deterministic stand-in for a language model.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::llm::{ChatRequest, LlmClient, LlmError, ModelResponse};

/// Replays queued responses in order and records every request it receives.
#[derive(Default)]
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<Result<ModelResponse, LlmError>>>,
    requests: Mutex<Vec<ChatRequest>>,
    delay: Option<Duration>,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(self, text: &str) -> Self {
        self.reply(Ok(ModelResponse::text(text)))
    }

    pub fn tool_call(self, name: &str, arguments: Value) -> Self {
        self.reply(Ok(ModelResponse::tool_call(name, arguments)))
    }

    pub fn error(self, error: LlmError) -> Self {
        self.reply(Err(error))
    }

    pub fn reply(mut self, reply: Result<ModelResponse, LlmError>) -> Self {
        self.replies.get_mut().push_back(reply);
        self
    }

    /// Sleeps before every reply, for exercising call timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub async fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn remaining(&self) -> usize {
        self.replies.lock().await.len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ModelResponse, LlmError> {
        self.requests.lock().await.push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.replies
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Transport("no scripted reply left".to_string())))
    }
}
