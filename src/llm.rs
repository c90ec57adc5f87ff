//! Chat completion backend speaking the OpenAI-compatible wire format
//! (OpenAI, Ollama's `/v1`, LiteLLM proxies, vLLM, ...).

use crate::config::LlmConfig;
use crate::error::BackendError;
use crate::models::{AssistantReply, ChatMessage, Role, ToolCall, ToolDefinition};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, trace};

/// A model that takes the whole conversation and answers with text or tool calls.
pub trait ChatBackend {
    fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<AssistantReply, BackendError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
}

#[derive(Serialize, Deserialize, Debug)]
struct WireMessage {
    role: Role,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: WireFunction,
}

#[derive(Serialize, Deserialize, Debug)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
}

fn function_type() -> String {
    "function".to_string()
}

impl From<&ChatMessage> for WireMessage {
    fn from(msg: &ChatMessage) -> Self {
        let tool_calls = (!msg.tool_calls.is_empty()).then(|| {
            msg.tool_calls
                .iter()
                .map(|call| WireToolCall {
                    id: call.id.clone(),
                    call_type: function_type(),
                    function: WireFunction {
                        name: call.name.clone(),
                        arguments: call.arguments.to_string(),
                    },
                })
                .collect()
        });
        WireMessage {
            role: msg.role,
            content: Some(msg.content.clone()),
            tool_calls,
            tool_call_id: msg.tool_call_id.clone(),
            name: msg.name.clone(),
        }
    }
}

/// Arguments arrive as a JSON string. Anything that is not a JSON object is kept
/// under `_raw` so the tool reports an argument error instead of the call vanishing.
fn decode_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return json!({});
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ Value::Object(_)) => v,
        _ => json!({ "_raw": raw }),
    }
}

pub struct OpenAiClient {
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    api_key: Option<String>,
    client: reqwest::blocking::Client,
}

impl OpenAiClient {
    pub fn new(config: &LlmConfig, api_key: Option<String>) -> Result<Self, BackendError> {
        let base_url = config.endpoint.trim_end_matches('/').to_string();
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|source| BackendError::Transport {
                url: base_url.clone(),
                source,
            })?;
        Ok(Self {
            base_url,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn is_available(&self) -> bool {
        let url = format!("{}/models", self.base_url);
        self.authorized(self.client.get(&url)).send().is_ok()
    }

    fn authorized(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> reqwest::blocking::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

impl ChatBackend for OpenAiClient {
    fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<AssistantReply, BackendError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: messages.iter().map(WireMessage::from).collect(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            tools: tools
                .iter()
                .map(|t| json!({ "type": "function", "function": t }))
                .collect(),
            tool_choice: (!tools.is_empty()).then_some("auto"),
        };

        debug!(model = %self.model, messages = messages.len(), tools = tools.len(), "requesting completion");
        let transport = |source| BackendError::Transport {
            url: url.clone(),
            source,
        };
        let resp = self
            .authorized(self.client.post(&url))
            .json(&body)
            .send()
            .map_err(transport)?;

        let status = resp.status();
        let text = resp.text().map_err(transport)?;
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: text.chars().take(500).collect(),
            });
        }
        trace!(body = %text, "completion response");

        let parsed: ChatResponse =
            serde_json::from_str(&text).map_err(|e| BackendError::Malformed(e.to_string()))?;
        let message = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::Malformed("response has no choices".to_string()))?
            .message;

        Ok(AssistantReply {
            content: message.content.filter(|c| !c.trim().is_empty()),
            tool_calls: message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|call| ToolCall {
                    arguments: decode_arguments(&call.function.arguments),
                    id: call.id,
                    name: call.function.name,
                })
                .collect(),
        })
    }
}
