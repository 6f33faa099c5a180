//! Shell session tools
//!
//! Thin typed wrappers over [`ShellSessionManager`]. A response with status
//! `error` becomes a tool error; `success` and `timeout` are returned as data.

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use super::registry::{ToolError, ToolRegistry, TypedTool};
use crate::shell::{ShellResponse, ShellSessionManager};

fn into_result(response: ShellResponse) -> Result<Value, ToolError> {
    if response.is_error() {
        let message = response.message.unwrap_or_else(|| "shell operation failed".to_string());
        return Err(ToolError::failed("ShellError", message));
    }
    Ok(serde_json::to_value(response)?)
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ShellExecArgs {
    /// Unique identifier of the target shell session
    pub id: String,
    /// Working directory for command execution (must use absolute path)
    pub exec_dir: String,
    /// Shell command to execute
    pub command: String,
}

/// Starts a command in a named session
pub struct ShellExecTool(pub Arc<ShellSessionManager>);

#[async_trait]
impl TypedTool for ShellExecTool {
    type Args = ShellExecArgs;

    fn name(&self) -> &str {
        "shell_exec"
    }

    fn description(&self) -> &str {
        "Execute a command in a specified shell session. Any process already running \
         in that session is stopped first. Use shell_view or shell_wait to read output."
    }

    async fn call(&self, args: ShellExecArgs) -> Result<Value, ToolError> {
        into_result(self.0.exec(&args.id, &args.exec_dir, &args.command).await)
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ShellIdArgs {
    /// Unique identifier of the target shell session
    pub id: String,
}

/// Shows a session's output and process state
pub struct ShellViewTool(pub Arc<ShellSessionManager>);

#[async_trait]
impl TypedTool for ShellViewTool {
    type Args = ShellIdArgs;

    fn name(&self) -> &str {
        "shell_view"
    }

    fn description(&self) -> &str {
        "View the content of a specified shell session. Use for checking command \
         execution results or monitoring output."
    }

    async fn call(&self, args: ShellIdArgs) -> Result<Value, ToolError> {
        into_result(self.0.view(&args.id).await)
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ShellWaitArgs {
    /// Unique identifier of the target shell session
    pub id: String,
    /// Wait duration in seconds (defaults to 60)
    pub seconds: Option<u64>,
}

/// Waits for a session's process to finish
pub struct ShellWaitTool(pub Arc<ShellSessionManager>);

#[async_trait]
impl TypedTool for ShellWaitTool {
    type Args = ShellWaitArgs;

    fn name(&self) -> &str {
        "shell_wait"
    }

    fn description(&self) -> &str {
        "Wait for the running process in a specified shell session to return. Use \
         after running commands that require longer runtime."
    }

    async fn call(&self, args: ShellWaitArgs) -> Result<Value, ToolError> {
        into_result(self.0.wait(&args.id, args.seconds).await)
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ShellWriteArgs {
    /// Unique identifier of the target shell session
    pub id: String,
    /// Input content to write to the process
    pub input: String,
    /// Whether to press Enter key after input
    pub press_enter: bool,
}

/// Writes to the stdin of a session's process
pub struct ShellWriteTool(pub Arc<ShellSessionManager>);

#[async_trait]
impl TypedTool for ShellWriteTool {
    type Args = ShellWriteArgs;

    fn name(&self) -> &str {
        "shell_write_to_process"
    }

    fn description(&self) -> &str {
        "Write input to a running process in a specified shell session. Use for \
         responding to interactive command prompts."
    }

    async fn call(&self, args: ShellWriteArgs) -> Result<Value, ToolError> {
        into_result(self.0.write(&args.id, &args.input, args.press_enter).await)
    }
}

/// Terminates a session's process
pub struct ShellKillTool(pub Arc<ShellSessionManager>);

#[async_trait]
impl TypedTool for ShellKillTool {
    type Args = ShellIdArgs;

    fn name(&self) -> &str {
        "shell_kill_process"
    }

    fn description(&self) -> &str {
        "Terminate a running process in a specified shell session. Use for stopping \
         long-running processes or handling frozen commands."
    }

    async fn call(&self, args: ShellIdArgs) -> Result<Value, ToolError> {
        into_result(self.0.kill(&args.id).await)
    }
}

/// Register all five shell tools against one manager
pub fn register_shell_tools(registry: &mut ToolRegistry, manager: Arc<ShellSessionManager>) {
    registry.register_typed(ShellExecTool(manager.clone()));
    registry.register_typed(ShellViewTool(manager.clone()));
    registry.register_typed(ShellWaitTool(manager.clone()));
    registry.register_typed(ShellWriteTool(manager.clone()));
    registry.register_typed(ShellKillTool(manager));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::state::{ExecutionState, Task};
    use crate::tools::registry::ToolOutcome;
    use crate::workspace::WorkspaceRoot;
    use serde_json::json;

    #[tokio::test]
    async fn test_shell_tools_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(ShellSessionManager::new(WorkspaceRoot::new(dir.path()).unwrap()));
        let mut registry = ToolRegistry::new();
        register_shell_tools(&mut registry, manager.clone());
        let mut state = ExecutionState::new(Task::new("t"));

        let root = dir.path().canonicalize().unwrap();
        let exec = registry
            .execute(
                "shell_exec",
                json!({"id": "s1", "exec_dir": root.to_str().unwrap(), "command": "echo hello"}),
                &mut state,
            )
            .await;
        assert!(!exec.is_error(), "{exec:?}");

        let waited = registry
            .execute("shell_wait", json!({"id": "s1", "seconds": 5}), &mut state)
            .await;
        match waited {
            ToolOutcome::Success(value) => {
                assert_eq!(value["status"], "success");
                assert_eq!(value["output"], json!(["hello"]));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_view_unknown_session_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(ShellSessionManager::new(WorkspaceRoot::new(dir.path()).unwrap()));
        let mut registry = ToolRegistry::new();
        register_shell_tools(&mut registry, manager);
        let mut state = ExecutionState::new(Task::new("t"));

        let outcome = registry
            .execute("shell_view", json!({"id": "missing"}), &mut state)
            .await;
        match outcome {
            ToolOutcome::Error(message) => assert!(message.starts_with("ShellError")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_wait_seconds_is_optional() {
        let mut registry = ToolRegistry::new();
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(ShellSessionManager::new(WorkspaceRoot::new(dir.path()).unwrap()));
        register_shell_tools(&mut registry, manager);
        let wait = registry
            .get_schemas()
            .into_iter()
            .find(|s| s.name == "shell_wait")
            .unwrap();
        assert!(wait.parameters["id"].required);
        assert!(!wait.parameters["seconds"].required);
    }
}
