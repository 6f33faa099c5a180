//! System prompt templates

use std::fmt::Write as _;

use crate::tools::ToolSchema;

/// Default system prompt for the agent
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a helpful assistant that completes tasks step by step using tools.

Guidelines:
- Use execute_code to calculate or verify results rather than guessing. Code is Rhai script:
  `let` bindings and `fn` definitions persist between calls, `print(...)` writes output,
  and authorized modules are available as namespaces (e.g. `math::sqrt(2.0)`).
- Use update_plan to keep a short plan and record_findings to note intermediate results.
- If a tool fails, read the error message and fix the call.
- When the task is complete, call final_answer with your answer."#;

/// Sent as a user message when the model stops calling tools before
/// `final_answer` and the run requires one
pub const FINAL_ANSWER_NUDGE: &str = "You have not called final_answer yet. Continue working on \
the task with the available tools, and call final_answer with your answer when you are done.";

/// Tool-using system prompt
///
/// Structured providers get the tool list on the wire; `structured == false`
/// adds a description of every tool and the text formats the parser accepts.
pub fn tool_system_prompt(base: &str, schemas: &[ToolSchema], structured: bool) -> String {
    if structured || schemas.is_empty() {
        return base.to_string();
    }

    let mut prompt = format!("{base}\n\nYou have access to the following tools:\n\n");
    for schema in schemas {
        let _ = writeln!(prompt, "Tool name: {}", schema.name);
        let _ = writeln!(prompt, "Description: {}", schema.description);
        if !schema.parameters.is_empty() {
            prompt.push_str("Parameters:\n");
            for (name, spec) in &schema.parameters {
                let _ = writeln!(
                    prompt,
                    "  - {name} ({}): {}{}",
                    spec.param_type.as_str(),
                    spec.description,
                    if spec.required { " (required)" } else { "" }
                );
            }
        }
        prompt.push('\n');
    }
    prompt.push_str(TEXT_CALL_INSTRUCTIONS);
    prompt
}

const TEXT_CALL_INSTRUCTIONS: &str = r#"
When you need to use a tool, format your response in one of these ways:

Format 1:
I need to [explain reasoning]
tool_name({"param1": "value1", "param2": "value2"})

Format 2:
Function to call: tool_name
Arguments: {"param1": "value1", "param2": "value2"}

For example:
I need to compute a value.
execute_code({"code": "print(2 + 2);"})

Wait for the tool's response before continuing.
"#;

/// System prompt for the forced summary turn
pub fn summary_system_prompt(base: &str) -> String {
    format!(
        "{base}\n\n\
         You have collected information using various tools. Now, STOP using any more tools and \
         provide a comprehensive final response to the user's original request. Summarize what you \
         found using the tools and answer their questions directly.\n\n\
         DO NOT suggest using more tools. DO NOT call any more tools.\n\
         JUST provide a final, helpful response using the information you've already gathered.\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ParamType, ParameterSpec};

    fn schemas() -> Vec<ToolSchema> {
        vec![ToolSchema::new("execute_code", "Run code")
            .param("code", ParameterSpec::required(ParamType::String, "Script to run"))]
    }

    #[test]
    fn test_structured_prompt_is_base() {
        assert_eq!(tool_system_prompt("base", &schemas(), true), "base");
    }

    #[test]
    fn test_text_prompt_lists_tools_and_formats() {
        let prompt = tool_system_prompt("base", &schemas(), false);
        assert!(prompt.starts_with("base\n\n"));
        assert!(prompt.contains("Tool name: execute_code"));
        assert!(prompt.contains("  - code (string): Script to run (required)"));
        assert!(prompt.contains("Function to call: tool_name"));
    }

    #[test]
    fn test_summary_prompt() {
        let prompt = summary_system_prompt("base");
        assert!(prompt.starts_with("base"));
        assert!(prompt.contains("DO NOT call any more tools."));
    }
}
