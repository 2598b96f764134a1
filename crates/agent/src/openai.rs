//! OpenAI-compatible chat completions client. Ollama exposes the same
//! endpoint under `/v1`, so one client serves both providers.

use std::time::Duration;

use async_trait::async_trait;
use pgchat_core::config::LlmConfig;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::llm::{ChatRequest, LlmClient, LlmError, ModelResponse, ToolCall};

pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
}

impl OpenAiClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| LlmError::Transport(error.to_string()))?;

        Ok(Self {
            http,
            base_url: config.effective_base_url().to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn body(&self, request: &ChatRequest) -> Value {
        let mut body = json!({
            "model": &self.model,
            "messages": &request.messages,
            "temperature": 0.0,
        });

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": tool.name,
                            "description": tool.description,
                            "parameters": &tool.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
            body["tool_choice"] = json!("auto");
        }
        body
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ApiMessage,
}

#[derive(Deserialize)]
struct ApiMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ApiToolCall>,
}

#[derive(Deserialize)]
struct ApiToolCall {
    function: ApiFunction,
}

#[derive(Deserialize)]
struct ApiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn into_model_response(response: ApiResponse) -> Result<ModelResponse, LlmError> {
    let message = response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message)
        .ok_or_else(|| LlmError::Decode("response contained no choices".to_string()))?;

    let tool_calls = message
        .tool_calls
        .into_iter()
        .map(|call| {
            // Arguments arrive as a JSON-encoded string; keep the raw text when
            // it does not parse so the reply decoder can flag it.
            let arguments = if call.function.arguments.trim().is_empty() {
                json!({})
            } else {
                serde_json::from_str(&call.function.arguments)
                    .unwrap_or(Value::String(call.function.arguments))
            };
            ToolCall { name: call.function.name, arguments }
        })
        .collect();

    Ok(ModelResponse { content: message.content, tool_calls })
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ModelResponse, LlmError> {
        let mut http_request = self.http.post(self.endpoint()).json(&self.body(request));
        if let Some(api_key) = &self.api_key {
            http_request = http_request.bearer_auth(api_key.expose_secret());
        }

        let response = http_request.send().await.map_err(|error| {
            if error.is_timeout() {
                LlmError::Timeout
            } else {
                LlmError::Transport(error.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api { status: status.as_u16(), body });
        }

        let decoded: ApiResponse =
            response.json().await.map_err(|error| LlmError::Decode(error.to_string()))?;
        let reply = into_model_response(decoded)?;
        debug!(
            event_name = "agent.llm.completed",
            model = %self.model,
            tool_calls = reply.tool_calls.len(),
            "model call completed"
        );
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use pgchat_core::config::{LlmConfig, LlmProvider};
    use pgchat_core::domain::message::Role;
    use serde_json::json;

    use super::{into_model_response, ApiResponse, OpenAiClient};
    use crate::llm::{ChatMessage, ChatRequest};
    use crate::tools::{run_sql_spec, RUN_SQL};

    fn ollama_config() -> LlmConfig {
        LlmConfig {
            provider: LlmProvider::Ollama,
            api_key: None,
            base_url: None,
            model: "llama3.1".to_string(),
            timeout_secs: 30,
        }
    }

    #[test]
    fn endpoint_uses_provider_default_base_url() {
        let client = OpenAiClient::from_config(&ollama_config()).expect("client");
        assert_eq!(client.endpoint(), "http://localhost:11434/v1/chat/completions");
    }

    #[test]
    fn body_includes_tools_only_when_offered() {
        let client = OpenAiClient::from_config(&ollama_config()).expect("client");
        let mut request = ChatRequest {
            messages: vec![ChatMessage::new(Role::User, "how many orders?")],
            tools: Vec::new(),
        };

        let body = client.body(&request);
        assert_eq!(body["messages"][0]["role"], "user");
        assert!(body.get("tools").is_none());

        request.tools.push(run_sql_spec());
        let body = client.body(&request);
        assert_eq!(body["tools"][0]["function"]["name"], RUN_SQL);
        assert_eq!(body["tool_choice"], "auto");
    }

    #[test]
    fn tool_call_arguments_are_parsed_from_json_text() {
        let raw = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "run_sql",
                            "arguments": "{\"query\": \"SELECT 1\"}"
                        }
                    }]
                }
            }]
        });
        let response: ApiResponse = serde_json::from_value(raw).expect("decode");

        let reply = into_model_response(response).expect("reply");
        assert_eq!(reply.content, None);
        assert_eq!(reply.tool_calls[0].arguments, json!({"query": "SELECT 1"}));
    }

    #[test]
    fn unparseable_arguments_are_kept_as_text() {
        let raw = json!({
            "choices": [{
                "message": {
                    "content": "",
                    "tool_calls": [{"function": {"name": "run_sql", "arguments": "SELECT 1"}}]
                }
            }]
        });
        let response: ApiResponse = serde_json::from_value(raw).expect("decode");

        let reply = into_model_response(response).expect("reply");
        assert_eq!(reply.tool_calls[0].arguments, json!("SELECT 1"));
    }

    #[test]
    fn empty_choices_is_a_decode_error() {
        let response: ApiResponse = serde_json::from_value(json!({"choices": []})).expect("decode");
        assert!(into_model_response(response).is_err());
    }
}
