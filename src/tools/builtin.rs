//! Built-in tools that operate on the run's execution state

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::info;

use super::registry::{BuiltinTool, ToolError};
use super::schema::{ParamType, ParameterSpec, ToolSchema};
use crate::agent::state::ExecutionState;
use crate::sandbox::CodeSandbox;

/// Name of the tool that ends a run
pub const FINAL_ANSWER_TOOL: &str = "final_answer";

/// Name of the sandboxed code execution tool
pub const EXECUTE_CODE_TOOL: &str = "execute_code";

fn string_arg<'a>(args: &'a Map<String, Value>, name: &str) -> Result<&'a str, ToolError> {
    args.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArguments(format!("'{name}' must be a string")))
}

/// Runs code in the persistent sandbox and merges the resulting scope delta
pub struct ExecuteCodeTool {
    sandbox: Arc<CodeSandbox>,
}

impl ExecuteCodeTool {
    pub fn new(sandbox: Arc<CodeSandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl BuiltinTool for ExecuteCodeTool {
    fn schema(&self) -> ToolSchema {
        let modules = self.sandbox.authorized_modules().join(", ");
        ToolSchema::new(
            EXECUTE_CODE_TOOL,
            format!(
                "Execute a Rhai script. Variables, functions and imports persist between calls. \
                 Use print() to produce output. Pre-imported modules: {modules}."
            ),
        )
        .param(
            "code",
            ParameterSpec::required(ParamType::String, "The Rhai source code to execute"),
        )
    }

    fn prepare(&self, state: &mut ExecutionState) {
        state.scope = self.sandbox.initial_scope();
    }

    async fn call(
        &self,
        args: Map<String, Value>,
        state: &mut ExecutionState,
    ) -> Result<Value, ToolError> {
        let code = string_arg(&args, "code")?;
        let outcome = self.sandbox.execute(code, &state.scope).await;
        let rendered = outcome.to_json();
        let error = outcome.error.clone();
        state.scope.merge(outcome.delta);

        match error {
            None => Ok(rendered),
            Some(fault) => {
                let mut message = fault.message;
                if !outcome.output.is_empty() {
                    message.push_str("\nOutput before the error:\n");
                    message.push_str(outcome.output.trim_end());
                }
                Err(ToolError::failed(fault.kind, message))
            }
        }
    }
}

/// Records the model's current plan
pub struct UpdatePlanTool;

#[async_trait]
impl BuiltinTool for UpdatePlanTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "update_plan",
            "Record or replace the current step-by-step plan for the task.",
        )
        .param(
            "plan",
            ParameterSpec::required(ParamType::String, "The full updated plan"),
        )
    }

    async fn call(
        &self,
        args: Map<String, Value>,
        state: &mut ExecutionState,
    ) -> Result<Value, ToolError> {
        let plan = string_arg(&args, "plan")?;
        state.plan = Some(plan.to_string());
        Ok(json!({ "plan": plan }))
    }
}

/// Appends a finding to the run's notes
pub struct RecordFindingsTool;

#[async_trait]
impl BuiltinTool for RecordFindingsTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            "record_findings",
            "Record an intermediate finding so it is kept in the final result.",
        )
        .param(
            "findings",
            ParameterSpec::required(ParamType::String, "What was found"),
        )
    }

    async fn call(
        &self,
        args: Map<String, Value>,
        state: &mut ExecutionState,
    ) -> Result<Value, ToolError> {
        let findings = string_arg(&args, "findings")?;
        state.findings.push(findings.to_string());
        Ok(json!({ "findings_recorded": state.findings.len() }))
    }
}

/// Ends the run with an answer
pub struct FinalAnswerTool;

#[async_trait]
impl BuiltinTool for FinalAnswerTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::new(
            FINAL_ANSWER_TOOL,
            "Provide the final answer to the task. Call this exactly once, when the task is complete.",
        )
        .param(
            "answer",
            ParameterSpec::required(ParamType::String, "The final answer"),
        )
    }

    async fn call(
        &self,
        mut args: Map<String, Value>,
        state: &mut ExecutionState,
    ) -> Result<Value, ToolError> {
        let answer = args.remove("answer").unwrap_or(Value::Null);
        info!(answer = %answer, "final answer received");
        state.task.finish(answer.clone());
        Ok(json!({ "final_answer": answer }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::state::Task;
    use crate::tools::registry::{ToolOutcome, ToolRegistry};
    use std::time::Duration;

    fn registry() -> ToolRegistry {
        let sandbox = Arc::new(CodeSandbox::with_limits(&["math"], Duration::from_secs(5)));
        let mut registry = ToolRegistry::new();
        registry.register_builtin(ExecuteCodeTool::new(sandbox));
        registry.register_builtin(UpdatePlanTool);
        registry.register_builtin(RecordFindingsTool);
        registry.register_builtin(FinalAnswerTool);
        registry
    }

    fn prepared(registry: &ToolRegistry) -> ExecutionState {
        let mut state = ExecutionState::new(Task::new("t"));
        registry.prepare_state(&mut state);
        state
    }

    #[tokio::test]
    async fn test_variables_persist_across_calls() {
        let registry = registry();
        let mut state = prepared(&registry);

        let first = registry
            .execute(EXECUTE_CODE_TOOL, json!({"code": "let x = 40;"}), &mut state)
            .await;
        assert!(!first.is_error());

        let second = registry
            .execute(EXECUTE_CODE_TOOL, json!({"code": "print(x + 2);"}), &mut state)
            .await;
        match second {
            ToolOutcome::Success(value) => assert_eq!(value["output"], "42\n"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_functions_persist_across_calls() {
        let registry = registry();
        let mut state = prepared(&registry);

        registry
            .execute(EXECUTE_CODE_TOOL, json!({"code": "fn double(n) { n * 2 }"}), &mut state)
            .await;
        let outcome = registry
            .execute(EXECUTE_CODE_TOOL, json!({"code": "print(double(21));"}), &mut state)
            .await;
        assert_eq!(outcome.content()["output"], "42\n");
    }

    #[tokio::test]
    async fn test_sandbox_fault_is_an_error_outcome() {
        let registry = registry();
        let mut state = prepared(&registry);
        let outcome = registry
            .execute(EXECUTE_CODE_TOOL, json!({"code": "print(\"hi\"); 1 / 0"}), &mut state)
            .await;
        match outcome {
            ToolOutcome::Error(message) => {
                assert!(message.starts_with("ArithmeticError"), "{message}");
                assert!(message.contains("hi"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_final_answer_finishes_task() {
        let registry = registry();
        let mut state = prepared(&registry);
        let outcome = registry
            .execute(FINAL_ANSWER_TOOL, json!({"answer": "4"}), &mut state)
            .await;
        assert!(!outcome.is_error());
        assert!(state.task.is_finished());
        assert_eq!(state.task.result(), Some(&json!("4")));
    }

    #[tokio::test]
    async fn test_plan_and_findings() {
        let registry = registry();
        let mut state = prepared(&registry);
        registry
            .execute("update_plan", json!({"plan": "1. add"}), &mut state)
            .await;
        registry
            .execute("record_findings", json!({"findings": "2+2=4"}), &mut state)
            .await;
        assert_eq!(state.plan.as_deref(), Some("1. add"));
        assert_eq!(state.findings, vec!["2+2=4"]);
    }
}
