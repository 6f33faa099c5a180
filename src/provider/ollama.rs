//! Ollama Chat API with tool calling support
//!
//! Talks to `/api/chat` with `stream: false`. Native `tool_calls` become
//! tool invocation request blocks with synthesized correlation ids (Ollama
//! does not assign any). Many local models ignore the native field and write
//! the call into the message text instead; when that happens the text is run
//! through [`parse_tool_calls_from_text`].
//!
//! With native tools disabled the provider reports
//! `supports_tool_blocks() == false`, sends no tool definitions, and leaves
//! call recovery to the loop's degraded mode.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::text_calls::parse_tool_calls_from_text;
use super::{
    synthesize_call_id, ChatProvider, ProviderError, ProviderRequest, ProviderResponse, StopReason,
};
use crate::conversation::{value_to_text, ContentBlock, Message, Role};
use crate::tools::ToolSchema;

/// A message in a chat conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String, // "system", "user", "assistant", "tool"
    #[serde(default)]
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ChatMessage {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            tool_calls: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self::new("tool", content)
    }
}

/// A tool call from the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub function: FunctionCall,
}

/// Function call details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: Value,
}

/// Tool definition for the model
#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub tool_type: String, // Always "function"
    pub function: ToolFunction,
}

/// Function specification for a tool
#[derive(Debug, Clone, Serialize)]
pub struct ToolFunction {
    pub name: String,
    pub description: String,
    pub parameters: Value, // JSON Schema
}

impl From<&ToolSchema> for Tool {
    fn from(schema: &ToolSchema) -> Self {
        Tool {
            tool_type: "function".to_string(),
            function: ToolFunction {
                name: schema.name.clone(),
                description: schema.description.clone(),
                parameters: schema.to_json_schema(),
            },
        }
    }
}

/// Response from /api/chat
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub message: ChatMessage,
    pub done: bool,
    #[serde(default)]
    pub done_reason: Option<String>,
    #[serde(default)]
    pub eval_count: u32,
    #[serde(default)]
    pub eval_duration: u64,
}

/// Client for Ollama's /api/chat endpoint
#[derive(Clone)]
pub struct OllamaProvider {
    base_url: String,
    model: String,
    native_tools: bool,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            native_tools: true,
            client: reqwest::Client::new(),
        }
    }

    /// Disable native tool definitions (for models without tool support)
    pub fn with_native_tools(mut self, enabled: bool) -> Self {
        self.native_tools = enabled;
        self
    }

    fn build_body(&self, request: &ProviderRequest<'_>) -> Result<Value, ProviderError> {
        let mut body = json!({
            "model": self.model,
            "messages": to_chat_messages(request.system_prompt, request.messages),
            "stream": false,
            "options": {
                "temperature": 0.0
            }
        });

        if self.native_tools && !request.tools.is_empty() {
            let tools: Vec<Tool> = request.tools.iter().map(Tool::from).collect();
            body["tools"] = serde_json::to_value(tools)?;
        }
        Ok(body)
    }
}

#[async_trait]
impl ChatProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    fn supports_tool_blocks(&self) -> bool {
        self.native_tools
    }

    async fn complete(&self, request: ProviderRequest<'_>) -> Result<ProviderResponse, ProviderError> {
        let endpoint = format!("{}/api/chat", self.base_url);
        let body = self.build_body(&request)?;

        let response = self.client.post(&endpoint).json(&body).send().await?;
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

        let chat_response: ChatResponse = serde_json::from_str(&text)?;
        let known: Vec<&str> = request.tools.iter().map(|t| t.name.as_str()).collect();
        let content = self.message_blocks(chat_response.message, &known);
        if content.is_empty() {
            return Err(ProviderError::EmptyResponse);
        }

        let has_calls = content
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolInvocationRequest { .. }));
        let stop_reason = if has_calls {
            StopReason::ToolUse
        } else {
            StopReason::from_wire(chat_response.done_reason.as_deref())
        };
        Ok(ProviderResponse::new(content, stop_reason))
    }
}

impl OllamaProvider {
    fn message_blocks(&self, message: ChatMessage, known_tools: &[&str]) -> Vec<ContentBlock> {
        let mut blocks = Vec::new();
        if !message.content.trim().is_empty() {
            blocks.push(ContentBlock::text(message.content.clone()));
        }

        let native = message.tool_calls.unwrap_or_default();
        if !native.is_empty() {
            for (i, call) in native.into_iter().enumerate() {
                blocks.push(ContentBlock::request(
                    synthesize_call_id(i),
                    call.function.name,
                    call.function.arguments,
                ));
            }
        } else if self.native_tools {
            // Model wrote the call as text instead of using tool_calls
            let parsed = parse_tool_calls_from_text(&message.content, known_tools);
            if !parsed.is_empty() {
                tracing::debug!(count = parsed.len(), "recovered tool calls from message text");
            }
            for (i, call) in parsed.into_iter().enumerate() {
                blocks.push(ContentBlock::request(synthesize_call_id(i), call.name, call.arguments));
            }
        }
        blocks
    }
}

/// Convert the conversation into Ollama chat messages
fn to_chat_messages(system_prompt: &str, messages: &[Message]) -> Vec<ChatMessage> {
    let mut out = Vec::with_capacity(messages.len() + 1);
    if !system_prompt.is_empty() {
        out.push(ChatMessage::system(system_prompt));
    }

    for message in messages {
        match message.role {
            Role::User => out.push(ChatMessage::user(message.text())),
            Role::Assistant => {
                let calls: Vec<ToolCall> = message
                    .tool_invocations()
                    .into_iter()
                    .map(|inv| ToolCall {
                        function: FunctionCall {
                            name: inv.name,
                            arguments: inv.arguments,
                        },
                    })
                    .collect();
                let mut chat = ChatMessage::assistant(message.text());
                if !calls.is_empty() {
                    chat.tool_calls = Some(calls);
                }
                out.push(chat);
            }
            Role::ToolResult => {
                for block in message.blocks() {
                    if let ContentBlock::ToolInvocationResult { content, .. } = block {
                        out.push(ChatMessage::tool(value_to_text(&content)));
                    }
                }
            }
        }
    }
    out
}
