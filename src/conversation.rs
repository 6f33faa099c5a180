//! Conversation model shared by the loop, the tools and the providers
//!
//! A conversation is an ordered list of [`Message`]s. Each message has a
//! [`Role`] and either plain text or an ordered list of typed
//! [`ContentBlock`]s. Tool invocation requests and their results are linked by
//! a correlation id: every `ToolInvocationResult` answers exactly one earlier
//! `ToolInvocationRequest`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    User,
    Assistant,
    ToolResult,
}

/// One typed piece of message content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ContentBlock {
    /// Free text
    Text { text: String },
    /// The model asks the host to run a tool
    ToolInvocationRequest {
        correlation_id: String,
        name: String,
        arguments: Value,
    },
    /// The host's answer to an earlier request
    ToolInvocationResult {
        correlation_id: String,
        content: Value,
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn request(
        correlation_id: impl Into<String>,
        name: impl Into<String>,
        arguments: Value,
    ) -> Self {
        ContentBlock::ToolInvocationRequest {
            correlation_id: correlation_id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Message body: plain text or typed blocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// A tool invocation extracted from an assistant message
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub correlation_id: String,
    pub name: String,
    pub arguments: Value,
}

/// One entry in the conversation log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Blocks(blocks),
        }
    }

    /// A tool result message answering `correlation_id`
    pub fn tool_result(correlation_id: impl Into<String>, content: Value, is_error: bool) -> Self {
        Self {
            role: Role::ToolResult,
            content: MessageContent::Blocks(vec![ContentBlock::ToolInvocationResult {
                correlation_id: correlation_id.into(),
                content,
                is_error,
            }]),
        }
    }

    /// The blocks of this message (plain text becomes a single text block)
    pub fn blocks(&self) -> Vec<ContentBlock> {
        match &self.content {
            MessageContent::Text(text) => vec![ContentBlock::text(text.clone())],
            MessageContent::Blocks(blocks) => blocks.clone(),
        }
    }

    /// Concatenated text of all text content
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    /// Tool invocation requests in the order the model emitted them
    pub fn tool_invocations(&self) -> Vec<ToolInvocation> {
        match &self.content {
            MessageContent::Text(_) => Vec::new(),
            MessageContent::Blocks(blocks) => tool_invocations(blocks),
        }
    }
}

/// Collect the tool invocation requests in `blocks`, preserving order
pub fn tool_invocations(blocks: &[ContentBlock]) -> Vec<ToolInvocation> {
    blocks
        .iter()
        .filter_map(|b| match b {
            ContentBlock::ToolInvocationRequest {
                correlation_id,
                name,
                arguments,
            } => Some(ToolInvocation {
                correlation_id: correlation_id.clone(),
                name: name.clone(),
                arguments: arguments.clone(),
            }),
            _ => None,
        })
        .collect()
}

/// Render a tool result value as text for providers that only accept strings
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
