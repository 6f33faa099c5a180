//! Stateless helper tools: think, get_current_time, calculator, transform_text

use async_trait::async_trait;
use chrono::format::{Item, StrftimeItems};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use super::registry::{ToolError, ToolRegistry, TypedTool};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ThinkArgs {
    /// A thought to think about and analyze
    pub thought: String,
}

/// Scratchpad tool; echoes the thought back without side effects
pub struct ThinkTool;

#[async_trait]
impl TypedTool for ThinkTool {
    type Args = ThinkArgs;

    fn name(&self) -> &str {
        "think"
    }

    fn description(&self) -> &str {
        "Use this tool to think through a problem or explain your reasoning. It will not \
         obtain new information or take any actions, but just serve as a scratchpad."
    }

    async fn call(&self, args: ThinkArgs) -> Result<Value, ToolError> {
        Ok(Value::String(format!("Thought:\n- {}", args.thought.trim())))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CurrentTimeArgs {
    /// Format string for the datetime (e.g. %Y-%m-%d %H:%M:%S)
    pub format: Option<String>,
    /// Timezone label: UTC uses UTC, anything else uses the host's local time
    pub timezone: Option<String>,
}

pub struct CurrentTimeTool;

#[async_trait]
impl TypedTool for CurrentTimeTool {
    type Args = CurrentTimeArgs;

    fn name(&self) -> &str {
        "get_current_time"
    }

    fn description(&self) -> &str {
        "Get the current date and time"
    }

    async fn call(&self, args: CurrentTimeArgs) -> Result<Value, ToolError> {
        let format = args.format.as_deref().unwrap_or("%Y-%m-%d %H:%M:%S");
        let timezone = args.timezone.as_deref().unwrap_or("UTC");
        if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
            return Err(ToolError::failed(
                "FormatError",
                format!("invalid format string '{format}'"),
            ));
        }
        let formatted = if timezone.eq_ignore_ascii_case("utc") {
            chrono::Utc::now().format(format).to_string()
        } else {
            chrono::Local::now().format(format).to_string()
        };
        Ok(json!({ "result": format!("Current time ({timezone}): {formatted}") }))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CalculatorArgs {
    /// The mathematical expression to evaluate (e.g. 2 + 2)
    pub expression: String,
}

/// Evaluates a single arithmetic expression
///
/// Uses a raw script engine in expression-only mode, so statements,
/// assignments and function definitions are rejected.
pub struct CalculatorTool;

#[async_trait]
impl TypedTool for CalculatorTool {
    type Args = CalculatorArgs;

    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Perform a simple calculation"
    }

    async fn call(&self, args: CalculatorArgs) -> Result<Value, ToolError> {
        let expression = args.expression.trim();
        if expression.is_empty() {
            return Err(ToolError::InvalidArguments("No expression provided".to_string()));
        }
        let mut engine = rhai::Engine::new_raw();
        engine.set_max_operations(10_000);
        let result = engine
            .eval_expression::<rhai::Dynamic>(expression)
            .map_err(|e| ToolError::failed("CalculationError", e.to_string()))?;
        Ok(json!({ "result": format!("Result: {expression} = {result}") }))
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TextOperation {
    #[default]
    Uppercase,
    Lowercase,
    Capitalize,
    Reverse,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TransformTextArgs {
    /// The text to transform
    pub text: String,
    /// The operation to perform (uppercase, lowercase, capitalize, reverse)
    #[serde(default)]
    pub operation: TextOperation,
}

pub struct TransformTextTool;

#[async_trait]
impl TypedTool for TransformTextTool {
    type Args = TransformTextArgs;

    fn name(&self) -> &str {
        "transform_text"
    }

    fn description(&self) -> &str {
        "Transform text using various operations"
    }

    async fn call(&self, args: TransformTextArgs) -> Result<Value, ToolError> {
        if args.text.is_empty() {
            return Err(ToolError::InvalidArguments("No text provided".to_string()));
        }
        let (label, result) = match args.operation {
            TextOperation::Uppercase => ("uppercase", args.text.to_uppercase()),
            TextOperation::Lowercase => ("lowercase", args.text.to_lowercase()),
            TextOperation::Capitalize => ("capitalize", capitalize(&args.text)),
            TextOperation::Reverse => ("reverse", args.text.chars().rev().collect()),
        };
        Ok(json!({ "result": format!("Transformed text ({label}): {result}") }))
    }
}

/// First character upper-cased, the rest lower-cased
fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Register think, get_current_time, calculator and transform_text
pub fn register_utility_tools(registry: &mut ToolRegistry) {
    registry.register_typed(ThinkTool);
    registry.register_typed(CurrentTimeTool);
    registry.register_typed(CalculatorTool);
    registry.register_typed(TransformTextTool);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_calculator() {
        let out = CalculatorTool
            .call(CalculatorArgs { expression: "2 + 2 * 3".into() })
            .await
            .unwrap();
        assert_eq!(out["result"], "Result: 2 + 2 * 3 = 8");
    }

    #[tokio::test]
    async fn test_calculator_rejects_statements() {
        let err = CalculatorTool
            .call(CalculatorArgs { expression: "let x = 1".into() })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "CalculationError");
    }

    #[tokio::test]
    async fn test_transform_text() {
        let out = TransformTextTool
            .call(TransformTextArgs {
                text: "hELLO".into(),
                operation: TextOperation::Capitalize,
            })
            .await
            .unwrap();
        assert_eq!(out["result"], "Transformed text (capitalize): Hello");

        let args: TransformTextArgs = serde_json::from_value(json!({"text": "abc"})).unwrap();
        let out = TransformTextTool.call(args).await.unwrap();
        assert_eq!(out["result"], "Transformed text (uppercase): ABC");
    }

    #[tokio::test]
    async fn test_think_echoes() {
        let out = ThinkTool
            .call(ThinkArgs { thought: "check inputs".into() })
            .await
            .unwrap();
        assert_eq!(out, json!("Thought:\n- check inputs"));
    }

    #[tokio::test]
    async fn test_current_time_rejects_bad_format() {
        let err = CurrentTimeTool
            .call(CurrentTimeArgs {
                format: Some("%Y %".into()),
                timezone: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "FormatError");
    }

    #[test]
    fn test_operation_is_optional_in_schema() {
        let mut registry = ToolRegistry::new();
        register_utility_tools(&mut registry);
        let schema = registry
            .get_schemas()
            .into_iter()
            .find(|s| s.name == "transform_text")
            .unwrap();
        assert!(schema.parameters["text"].required);
        assert!(!schema.parameters["operation"].required);
    }
}
