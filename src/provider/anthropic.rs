//! Anthropic Messages API client
//!
//! Conversation mapping:
//! - `user` text → `user` message
//! - `assistant` blocks → `assistant` message with `text` / `tool_use` blocks
//! - `tool-result` → `user` message with `tool_result` blocks
//!
//! The API rejects two consecutive messages with the same role, so adjacent
//! messages that map to the same wire role are merged.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{ChatProvider, ProviderError, ProviderRequest, ProviderResponse, StopReason};
use crate::conversation::{value_to_text, ContentBlock, Message, Role};

const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;
const TEMPERATURE: f64 = 0.1;

/// Wire content block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not", default)]
        is_error: bool,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize)]
struct WireMessage {
    role: &'static str,
    content: Vec<WireBlock>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<WireBlock>,
    stop_reason: Option<String>,
}

/// Client for `POST /v1/messages`
#[derive(Clone)]
pub struct AnthropicProvider {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }

    fn build_body(&self, request: &ProviderRequest<'_>) -> Value {
        let mut body = json!({
            "model": self.model,
            "system": request.system_prompt,
            "messages": to_wire_messages(request.messages),
            "max_tokens": MAX_TOKENS,
            "temperature": TEMPERATURE,
        });

        if !request.tools.is_empty() {
            let tools: Vec<Value> = request
                .tools
                .iter()
                .map(|schema| {
                    json!({
                        "name": schema.name,
                        "description": schema.description,
                        "input_schema": schema.to_json_schema(),
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
            body["tool_choice"] = json!({ "type": "auto" });
        }
        body
    }
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, request: ProviderRequest<'_>) -> Result<ProviderResponse, ProviderError> {
        let endpoint = format!("{}/v1/messages", self.base_url);
        let body = self.build_body(&request);

        let response = self
            .client
            .post(&endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body: text,
            });
        }
        if text.is_empty() {
            return Err(ProviderError::EmptyResponse);
        }

        let parsed: MessagesResponse = serde_json::from_str(&text)?;
        let content: Vec<ContentBlock> = parsed
            .content
            .into_iter()
            .filter_map(|block| match block {
                WireBlock::Text { text } => Some(ContentBlock::text(text)),
                WireBlock::ToolUse { id, name, input } => Some(ContentBlock::request(id, name, input)),
                WireBlock::ToolResult { .. } | WireBlock::Other => None,
            })
            .collect();

        if content.is_empty() {
            return Err(ProviderError::EmptyResponse);
        }

        Ok(ProviderResponse::new(
            content,
            StopReason::from_wire(parsed.stop_reason.as_deref()),
        ))
    }
}

fn wire_role(role: Role) -> &'static str {
    match role {
        Role::Assistant => "assistant",
        Role::User | Role::ToolResult => "user",
    }
}

fn to_wire_blocks(message: &Message) -> Vec<WireBlock> {
    message
        .blocks()
        .into_iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } if text.trim().is_empty() => None,
            ContentBlock::Text { text } => Some(WireBlock::Text { text }),
            ContentBlock::ToolInvocationRequest {
                correlation_id,
                name,
                arguments,
            } => Some(WireBlock::ToolUse {
                id: correlation_id,
                name,
                input: if arguments.is_null() { json!({}) } else { arguments },
            }),
            ContentBlock::ToolInvocationResult {
                correlation_id,
                content,
                is_error,
            } => Some(WireBlock::ToolResult {
                tool_use_id: correlation_id,
                content: value_to_text(&content),
                is_error,
            }),
        })
        .collect()
}

fn to_wire_messages(messages: &[Message]) -> Vec<WireMessage> {
    let mut wire: Vec<WireMessage> = Vec::new();
    for message in messages {
        let role = wire_role(message.role);
        let blocks = to_wire_blocks(message);
        if blocks.is_empty() {
            continue;
        }
        match wire.last_mut() {
            Some(last) if last.role == role => last.content.extend(blocks),
            _ => wire.push(WireMessage {
                role,
                content: blocks,
            }),
        }
    }
    wire
}
