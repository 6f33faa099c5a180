//! Process-wide configuration
//!
//! Everything the agent needs to know about its environment is loaded once at
//! startup into an [`AgentConfig`] and then passed by reference (or `Arc`)
//! into the components that need it. Nothing reads the environment after that.
//!
//! # Environment variables
//!
//! | Variable                  | Field                     | Default                          |
//! |---------------------------|---------------------------|----------------------------------|
//! | `TASKLOOP_PROVIDER`       | `provider`                | `anthropic`                      |
//! | `MODEL_ID`                | `model`                   | `claude-3-7-sonnet-latest`       |
//! | `ANTHROPIC_API_KEY`       | `api_key`                 | none                             |
//! | `ANTHROPIC_BASE_URL`      | `anthropic_base_url`      | `https://api.anthropic.com`      |
//! | `OLLAMA_URL`              | `ollama_url`              | `http://localhost:11434`         |
//! | `AUTHORIZED_IMPORTS`      | `authorized_imports`      | `math,random,datetime,json,re`   |
//! | `MAX_ITERATIONS`          | `max_iterations`          | `10`                             |
//! | `EXECUTION_TIMEOUT_SECS`  | `execution_timeout_secs`  | `30`                             |
//! | `TASKLOOP_ROOT`           | `workspace_root`          | current directory                |
//! | `REQUIRE_FINAL_ANSWER`    | `require_final_answer`    | `false`                          |
//! | `OTLP_ENDPOINT`           | `otlp_endpoint`           | none                             |

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Default model when `MODEL_ID` is not set
pub const DEFAULT_MODEL: &str = "claude-3-7-sonnet-latest";

/// Default authorized sandbox imports
pub const DEFAULT_AUTHORIZED_IMPORTS: &str = "math,random,datetime,json,re";

/// Which LLM backend the agent talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Anthropic Messages API (structured tool_use blocks)
    Anthropic,
    /// Ollama /api/chat (structured tool calls with a free-text fallback)
    Ollama,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Anthropic => write!(f, "anthropic"),
            ProviderKind::Ollama => write!(f, "ollama"),
        }
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Ok(ProviderKind::Anthropic),
            "ollama" => Ok(ProviderKind::Ollama),
            other => Err(ConfigError::Invalid {
                key: "TASKLOOP_PROVIDER",
                value: other.to_string(),
                reason: "expected 'anthropic' or 'ollama'".to_string(),
            }),
        }
    }
}

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("failed to determine working directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Immutable configuration shared by every component of a run
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// LLM backend
    pub provider: ProviderKind,
    /// Model identifier passed to the provider
    pub model: String,
    /// Credential for the provider (required for Anthropic)
    pub api_key: Option<String>,
    /// Base URL for the Anthropic API
    pub anthropic_base_url: String,
    /// Base URL for the Ollama server
    pub ollama_url: String,
    /// Module names the code sandbox may import
    pub authorized_imports: Vec<String>,
    /// Iteration ceiling for the orchestration loop
    pub max_iterations: usize,
    /// Wall-clock ceiling for one sandboxed code execution
    pub execution_timeout_secs: u64,
    /// Root directory that confines shell and editor paths
    pub workspace_root: PathBuf,
    /// Keep looping (with a warning) when the model stops calling tools
    /// before `final_answer` has been invoked
    pub require_final_answer: bool,
    /// Custom system prompt (uses default if None)
    pub system_prompt: Option<String>,
    /// OTLP collector endpoint for trace export
    pub otlp_endpoint: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Anthropic,
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            anthropic_base_url: "https://api.anthropic.com".to_string(),
            ollama_url: "http://localhost:11434".to_string(),
            authorized_imports: parse_import_list(DEFAULT_AUTHORIZED_IMPORTS),
            max_iterations: 10,
            execution_timeout_secs: 30,
            workspace_root: PathBuf::from("."),
            require_final_answer: false,
            system_prompt: None,
            otlp_endpoint: None,
        }
    }
}

impl AgentConfig {
    /// Build a configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup
    ///
    /// `from_env` delegates here; tests pass a closure over a map instead of
    /// mutating the real environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let provider = match get("TASKLOOP_PROVIDER") {
            Some(v) => v.parse()?,
            None => defaults.provider,
        };

        let workspace_root = match get("TASKLOOP_ROOT") {
            Some(v) => PathBuf::from(v),
            None => std::env::current_dir()?,
        };

        Ok(Self {
            provider,
            model: get("MODEL_ID").unwrap_or(defaults.model),
            api_key: get("ANTHROPIC_API_KEY"),
            anthropic_base_url: get("ANTHROPIC_BASE_URL").unwrap_or(defaults.anthropic_base_url),
            ollama_url: get("OLLAMA_URL").unwrap_or(defaults.ollama_url),
            authorized_imports: get("AUTHORIZED_IMPORTS")
                .map(|v| parse_import_list(&v))
                .unwrap_or(defaults.authorized_imports),
            max_iterations: parse_number("MAX_ITERATIONS", get("MAX_ITERATIONS"))?
                .unwrap_or(defaults.max_iterations),
            execution_timeout_secs: parse_number(
                "EXECUTION_TIMEOUT_SECS",
                get("EXECUTION_TIMEOUT_SECS"),
            )?
            .unwrap_or(defaults.execution_timeout_secs),
            workspace_root,
            require_final_answer: parse_bool("REQUIRE_FINAL_ANSWER", get("REQUIRE_FINAL_ANSWER"))?
                .unwrap_or(defaults.require_final_answer),
            system_prompt: None,
            otlp_endpoint: get("OTLP_ENDPOINT"),
        })
    }

    /// Check cross-field requirements before the config is handed out
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider == ProviderKind::Anthropic && self.api_key.is_none() {
            return Err(ConfigError::Missing("ANTHROPIC_API_KEY"));
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::Invalid {
                key: "MAX_ITERATIONS",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Split a comma-separated import list, dropping blanks
pub fn parse_import_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_number<T: FromStr>(key: &'static str, raw: Option<String>) -> Result<Option<T>, ConfigError>
where
    T::Err: fmt::Display,
{
    raw.map(|v| {
        v.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            key,
            value: v.clone(),
            reason: e.to_string(),
        })
    })
    .transpose()
}

fn parse_bool(key: &'static str, raw: Option<String>) -> Result<Option<bool>, ConfigError> {
    raw.map(|v| match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: v.clone(),
            reason: "expected a boolean".to_string(),
        }),
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.provider, ProviderKind::Anthropic);
        assert_eq!(config.max_iterations, 10);
        assert_eq!(
            config.authorized_imports,
            vec!["math", "random", "datetime", "json", "re"]
        );
        assert!(!config.require_final_answer);
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = AgentConfig::from_lookup(lookup(&[
            ("TASKLOOP_PROVIDER", "ollama"),
            ("MODEL_ID", "qwen3"),
            ("AUTHORIZED_IMPORTS", " math , json,, "),
            ("MAX_ITERATIONS", "4"),
            ("TASKLOOP_ROOT", "/tmp"),
            ("REQUIRE_FINAL_ANSWER", "yes"),
        ]))
        .unwrap();

        assert_eq!(config.provider, ProviderKind::Ollama);
        assert_eq!(config.model, "qwen3");
        assert_eq!(config.authorized_imports, vec!["math", "json"]);
        assert_eq!(config.max_iterations, 4);
        assert_eq!(config.workspace_root, PathBuf::from("/tmp"));
        assert!(config.require_final_answer);
    }

    #[test]
    fn test_invalid_number_is_reported() {
        let err = AgentConfig::from_lookup(lookup(&[
            ("MAX_ITERATIONS", "lots"),
            ("TASKLOOP_ROOT", "/tmp"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("MAX_ITERATIONS"));
    }

    #[test]
    fn test_validate_requires_api_key_for_anthropic() {
        let config = AgentConfig::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("ANTHROPIC_API_KEY"))
        ));

        let config = AgentConfig {
            provider: ProviderKind::Ollama,
            ..AgentConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_provider() {
        assert!("gpt".parse::<ProviderKind>().is_err());
        assert_eq!("Claude".parse::<ProviderKind>().unwrap(), ProviderKind::Anthropic);
    }
}
