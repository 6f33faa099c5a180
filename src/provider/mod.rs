//! LLM provider clients
//!
//! The loop only sees [`ChatProvider`]: it hands over the conversation, the
//! system prompt and the tool schemas, and gets back ordered content blocks
//! plus a stop reason. Each implementation translates to and from its wire
//! format.
//!
//! - [`anthropic::AnthropicProvider`]: Messages API with `tool_use` blocks
//! - [`ollama::OllamaProvider`]: `/api/chat` with native `tool_calls`, falling
//!   back to [`text_calls::parse_tool_calls_from_text`] when the model writes
//!   calls as plain text

pub mod anthropic;
pub mod ollama;
pub mod text_calls;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{AgentConfig, ProviderKind};
use crate::conversation::{ContentBlock, Message};
use crate::tools::ToolSchema;

pub use anthropic::AnthropicProvider;
pub use ollama::OllamaProvider;
pub use text_calls::{parse_tool_calls_from_text, TextToolCall};

/// Everything a provider needs for one completion
#[derive(Debug, Clone, Copy)]
pub struct ProviderRequest<'a> {
    pub messages: &'a [Message],
    pub system_prompt: &'a str,
    pub tools: &'a [ToolSchema],
}

/// Why the model stopped producing output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    Other(String),
}

impl StopReason {
    /// Map a wire-level stop reason string
    pub fn from_wire(reason: Option<&str>) -> Self {
        match reason {
            None | Some("end_turn") | Some("stop") | Some("stop_sequence") => StopReason::EndTurn,
            Some("tool_use") | Some("tool_calls") => StopReason::ToolUse,
            Some("max_tokens") | Some("length") => StopReason::MaxTokens,
            Some(other) => StopReason::Other(other.to_string()),
        }
    }
}

/// One completion: ordered content blocks and a stop reason
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    pub content: Vec<ContentBlock>,
    pub stop_reason: StopReason,
}

impl ProviderResponse {
    pub fn new(content: Vec<ContentBlock>, stop_reason: StopReason) -> Self {
        Self {
            content,
            stop_reason,
        }
    }

    /// A response made of a single text block
    pub fn text(text: impl Into<String>) -> Self {
        Self::new(vec![ContentBlock::text(text)], StopReason::EndTurn)
    }
}

/// Error type for provider calls
///
/// Every variant is terminal for the task; the loop does not retry.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("empty response from provider")]
    EmptyResponse,
    #[error("provider is not configured: {0}")]
    Config(String),
}

/// A chat model that can be asked for the next assistant turn
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Short provider name used in logs and metrics
    fn name(&self) -> &str;

    /// Whether responses carry structured tool invocation blocks
    ///
    /// Providers returning `false` are driven in degraded mode: tool calls
    /// are recovered from the response text.
    fn supports_tool_blocks(&self) -> bool {
        true
    }

    async fn complete(&self, request: ProviderRequest<'_>) -> Result<ProviderResponse, ProviderError>;
}

/// Build the provider selected by `config`
pub fn build_provider(config: &AgentConfig) -> Result<Arc<dyn ChatProvider>, ProviderError> {
    match config.provider {
        ProviderKind::Anthropic => {
            let api_key = config
                .api_key
                .clone()
                .ok_or_else(|| ProviderError::Config("ANTHROPIC_API_KEY is not set".to_string()))?;
            Ok(Arc::new(AnthropicProvider::new(
                config.anthropic_base_url.clone(),
                api_key,
                config.model.clone(),
            )))
        }
        ProviderKind::Ollama => Ok(Arc::new(OllamaProvider::new(
            config.ollama_url.clone(),
            config.model.clone(),
        ))),
    }
}

/// Synthesized correlation id for calls that arrive without one
pub(crate) fn synthesize_call_id(index: usize) -> String {
    format!("call_{}_{}", uuid::Uuid::now_v7().simple(), index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_reason_mapping() {
        assert_eq!(StopReason::from_wire(Some("tool_use")), StopReason::ToolUse);
        assert_eq!(StopReason::from_wire(Some("stop")), StopReason::EndTurn);
        assert_eq!(StopReason::from_wire(None), StopReason::EndTurn);
        assert_eq!(
            StopReason::from_wire(Some("refusal")),
            StopReason::Other("refusal".to_string())
        );
    }

    #[test]
    fn test_build_provider_requires_key_for_anthropic() {
        let config = AgentConfig::default();
        assert!(matches!(build_provider(&config), Err(ProviderError::Config(_))));

        let config = AgentConfig {
            provider: ProviderKind::Ollama,
            ..AgentConfig::default()
        };
        let provider = build_provider(&config).unwrap();
        assert_eq!(provider.name(), "ollama");
    }

    #[test]
    fn test_synthesized_ids_are_unique() {
        assert_ne!(synthesize_call_id(0), synthesize_call_id(0));
    }
}
