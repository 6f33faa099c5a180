//! Tool dispatch engine and the bundled tools
//!
//! # Architecture
//!
//! ```text
//! invocation {name, arguments}
//!        ↓
//!   ToolRegistry::execute
//!        ├── unknown name          → Error("Tool '<name>' not found ...")
//!        ├── missing required arg  → Error("InvalidArguments: ...")
//!        ├── Builtin(&mut ExecutionState)  execute_code, update_plan, ...
//!        └── User(declared args only)      shell_*, str_replace_editor, ...
//!        ↓
//!   ToolOutcome::Success(value) | ToolOutcome::Error("<Kind>: <message>")
//! ```

pub mod builtin;
pub mod editor;
pub mod registry;
pub mod schema;
pub mod shell;
pub mod utility;

use std::sync::Arc;

pub use builtin::{
    ExecuteCodeTool, FinalAnswerTool, RecordFindingsTool, UpdatePlanTool, EXECUTE_CODE_TOOL,
    FINAL_ANSWER_TOOL,
};
pub use editor::{EditorError, EditorTool, FileEditor};
pub use registry::{BuiltinTool, ToolError, ToolHandler, ToolOutcome, ToolRegistry, TypedTool};
pub use schema::{ParamType, ParameterSpec, ToolSchema};
pub use shell::register_shell_tools;
pub use utility::register_utility_tools;

use crate::sandbox::CodeSandbox;
use crate::shell::ShellSessionManager;
use crate::workspace::WorkspaceRoot;

/// Register the four built-in tools
pub fn register_builtin_tools(registry: &mut ToolRegistry, sandbox: Arc<CodeSandbox>) {
    registry.register_builtin(ExecuteCodeTool::new(sandbox));
    registry.register_builtin(UpdatePlanTool);
    registry.register_builtin(RecordFindingsTool);
    registry.register_builtin(FinalAnswerTool);
}

/// A registry with every bundled tool
pub fn default_registry(
    sandbox: Arc<CodeSandbox>,
    shell: Arc<ShellSessionManager>,
    root: WorkspaceRoot,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    register_builtin_tools(&mut registry, sandbox);
    register_shell_tools(&mut registry, shell);
    registry.register_typed(EditorTool::new(root));
    register_utility_tools(&mut registry);
    registry
}
