//! taskloop - an agent host that drives a chat model through multi-step tasks
//!
//! The model proposes tool invocations; the host runs them and feeds the
//! results back until the task is answered or a limit is hit.
//!
//! # Modules
//!
//! - `agent` - orchestration loop, run state, prompts, events and run store
//! - `provider` - chat model clients (Anthropic, Ollama) and text call recovery
//! - `tools` - tool registry, schemas and the bundled tools
//! - `sandbox` - persistent Rhai code sandbox with scope diffing
//! - `shell` - concurrent multi-session shell process manager
//! - `workspace` - path confinement for shell and editor
//! - `conversation` - messages and typed content blocks
//! - `config` - process-wide configuration
//! - `metrics` - Prometheus metrics for observability
//! - `tracing` - structured logging and OpenTelemetry export
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use taskloop::{AgentConfig, AgentController, CodeSandbox, ShellSessionManager, WorkspaceRoot};
//!
//! let config = Arc::new(AgentConfig::from_env()?);
//! let root = WorkspaceRoot::new(&config.workspace_root)?;
//! let registry = taskloop::tools::default_registry(
//!     Arc::new(CodeSandbox::new(&config)),
//!     Arc::new(ShellSessionManager::new(root.clone())),
//!     root,
//! );
//! let provider = taskloop::provider::build_provider(&config)?;
//! let result = AgentController::new(provider, registry, config).run("compute 2+2").await?;
//! ```

pub mod agent;
pub mod config;
pub mod conversation;
pub mod metrics;
pub mod provider;
pub mod sandbox;
pub mod shell;
pub mod tools;
pub mod tracing;
pub mod workspace;

// Re-export commonly used types at crate root for convenience
pub use agent::{AgentController, AgentResult, LoopStatus};
pub use config::AgentConfig;
pub use sandbox::CodeSandbox;
pub use shell::ShellSessionManager;
pub use tools::ToolRegistry;
pub use workspace::WorkspaceRoot;
