//! Tool registry and dispatch
//!
//! Tools come in two flavours. Built-in tools receive the run's mutable
//! [`ExecutionState`]; user tools only ever see their declared arguments.
//! Dispatch never fails: every invocation produces a [`ToolOutcome`], and the
//! outcome's tag alone decides whether the model sees an error.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::FutureExt;
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::schema::ToolSchema;
use crate::agent::state::ExecutionState;
use crate::metrics::TOOL_CALLS;

/// Error type for tool handlers
///
/// Rendered to the model as `"<Kind>: <message>"`.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("InvalidArguments: {0}")]
    InvalidArguments(String),
    #[error("{kind}: {message}")]
    Failed { kind: String, message: String },
}

impl ToolError {
    pub fn failed(kind: impl Into<String>, message: impl Into<String>) -> Self {
        ToolError::Failed {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &str {
        match self {
            ToolError::InvalidArguments(_) => "InvalidArguments",
            ToolError::Failed { kind, .. } => kind,
        }
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(e: serde_json::Error) -> Self {
        ToolError::InvalidArguments(e.to_string())
    }
}

/// The result of one dispatch
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Success(Value),
    Error(String),
}

impl ToolOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, ToolOutcome::Error(_))
    }

    /// Content for the tool result message
    pub fn content(&self) -> Value {
        match self {
            ToolOutcome::Success(value) => value.clone(),
            ToolOutcome::Error(message) => json!({ "error": message }),
        }
    }
}

/// A tool that only sees its own arguments
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: Map<String, Value>) -> Result<Value, ToolError>;
}

/// A tool that may read and mutate the run's execution state
#[async_trait]
pub trait BuiltinTool: Send + Sync {
    fn schema(&self) -> ToolSchema;

    async fn call(
        &self,
        args: Map<String, Value>,
        state: &mut ExecutionState,
    ) -> Result<Value, ToolError>;

    /// Seed a fresh execution state before the first iteration
    fn prepare(&self, _state: &mut ExecutionState) {}
}

/// A user tool with a typed argument struct
///
/// The schema is derived from `Args`; arguments are deserialized before the
/// call, so a type mismatch surfaces as `InvalidArguments`.
#[async_trait]
pub trait TypedTool: Send + Sync + 'static {
    type Args: DeserializeOwned + JsonSchema + Send;

    fn name(&self) -> &str;

    fn description(&self) -> &str;

    async fn call(&self, args: Self::Args) -> Result<Value, ToolError>;
}

struct TypedAdapter<T>(T);

#[async_trait]
impl<T: TypedTool> ToolHandler for TypedAdapter<T> {
    async fn call(&self, args: Map<String, Value>) -> Result<Value, ToolError> {
        let args: T::Args = serde_json::from_value(Value::Object(args))?;
        self.0.call(args).await
    }
}

enum Handler {
    Builtin(Arc<dyn BuiltinTool>),
    User(Arc<dyn ToolHandler>),
}

struct RegisteredTool {
    schema: ToolSchema,
    handler: Handler,
}

/// Name → tool mapping, in registration order
#[derive(Default)]
pub struct ToolRegistry {
    tools: IndexMap<String, RegisteredTool>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, schema: ToolSchema, handler: Handler) {
        if self.tools.contains_key(&schema.name) {
            warn!(tool = %schema.name, "replacing previously registered tool");
        }
        debug!(tool = %schema.name, params = schema.parameters.len(), "tool registered");
        self.tools
            .insert(schema.name.clone(), RegisteredTool { schema, handler });
    }

    /// Register a built-in tool
    pub fn register_builtin(&mut self, tool: impl BuiltinTool + 'static) {
        let tool: Arc<dyn BuiltinTool> = Arc::new(tool);
        self.insert(tool.schema(), Handler::Builtin(tool));
    }

    /// Register a user tool with an explicit schema
    pub fn register(&mut self, schema: ToolSchema, handler: impl ToolHandler + 'static) {
        self.insert(schema, Handler::User(Arc::new(handler)));
    }

    /// Register a user tool whose schema is derived from its argument type
    pub fn register_typed<T: TypedTool>(&mut self, tool: T) {
        let schema = ToolSchema::derive::<T::Args>(tool.name(), tool.description());
        self.insert(schema, Handler::User(Arc::new(TypedAdapter(tool))));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Schemas of every registered tool, in registration order
    pub fn get_schemas(&self) -> Vec<ToolSchema> {
        self.tools.values().map(|t| t.schema.clone()).collect()
    }

    /// Let built-in tools seed a fresh state
    pub fn prepare_state(&self, state: &mut ExecutionState) {
        for tool in self.tools.values() {
            if let Handler::Builtin(builtin) = &tool.handler {
                builtin.prepare(state);
            }
        }
    }

    /// Dispatch one invocation
    pub async fn execute(&self, name: &str, arguments: Value, state: &mut ExecutionState) -> ToolOutcome {
        let outcome = self.dispatch(name, arguments, state).await;
        let label = if self.contains(name) { name } else { "unknown" };
        let status = if outcome.is_error() { "error" } else { "success" };
        TOOL_CALLS.with_label_values(&[label, status]).inc();
        outcome
    }

    async fn dispatch(&self, name: &str, arguments: Value, state: &mut ExecutionState) -> ToolOutcome {
        let Some(tool) = self.tools.get(name) else {
            return ToolOutcome::Error(format!("Tool '{name}' not found in registry"));
        };

        let mut args = match arguments {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return ToolOutcome::Error(
                    ToolError::InvalidArguments(format!(
                        "arguments for '{name}' must be a JSON object, got {other}"
                    ))
                    .to_string(),
                )
            }
        };

        let missing: Vec<&str> = tool
            .schema
            .required_params()
            .filter(|param| args.get(*param).map_or(true, Value::is_null))
            .collect();
        if !missing.is_empty() {
            return ToolOutcome::Error(
                ToolError::InvalidArguments(format!(
                    "missing required parameter(s) {} for tool '{name}'",
                    missing.join(", ")
                ))
                .to_string(),
            );
        }

        let result = match &tool.handler {
            Handler::Builtin(builtin) => {
                AssertUnwindSafe(builtin.call(args, state)).catch_unwind().await
            }
            Handler::User(handler) => {
                args.retain(|key, _| tool.schema.parameters.contains_key(key));
                AssertUnwindSafe(handler.call(args)).catch_unwind().await
            }
        };

        match result {
            Ok(Ok(value)) => ToolOutcome::Success(value),
            Ok(Err(e)) => {
                debug!(tool = name, error = %e, "tool returned an error");
                ToolOutcome::Error(e.to_string())
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                warn!(tool = name, panic = %message, "tool panicked");
                ToolOutcome::Error(format!("Panic: {message}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::state::Task;
    use crate::tools::schema::{ParamType, ParameterSpec};
    use serde::Deserialize;

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        async fn call(&self, args: Map<String, Value>) -> Result<Value, ToolError> {
            Ok(Value::Object(args))
        }
    }

    struct Boom;

    #[async_trait]
    impl ToolHandler for Boom {
        async fn call(&self, _args: Map<String, Value>) -> Result<Value, ToolError> {
            panic!("kaboom");
        }
    }

    #[derive(Deserialize, JsonSchema)]
    struct AddArgs {
        /// First operand
        a: i64,
        /// Second operand
        b: i64,
    }

    struct Add;

    #[async_trait]
    impl TypedTool for Add {
        type Args = AddArgs;

        fn name(&self) -> &str {
            "add"
        }

        fn description(&self) -> &str {
            "Add two integers"
        }

        async fn call(&self, args: AddArgs) -> Result<Value, ToolError> {
            Ok(json!(args.a + args.b))
        }
    }

    fn state() -> ExecutionState {
        ExecutionState::new(Task::new("test"))
    }

    fn echo_schema() -> ToolSchema {
        ToolSchema::new("echo", "Echo arguments back")
            .param("text", ParameterSpec::required(ParamType::String, "Text"))
    }

    #[tokio::test]
    async fn test_unknown_tool_names_the_tool() {
        let registry = ToolRegistry::new();
        let outcome = registry.execute("nonexistent", json!({}), &mut state()).await;
        match outcome {
            ToolOutcome::Error(message) => assert!(message.contains("nonexistent")),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_required_argument() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_schema(), Echo);
        let outcome = registry.execute("echo", json!({}), &mut state()).await;
        match outcome {
            ToolOutcome::Error(message) => {
                assert!(message.starts_with("InvalidArguments"));
                assert!(message.contains("text"));
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_user_tool_sees_only_declared_arguments() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_schema(), Echo);
        let outcome = registry
            .execute("echo", json!({"text": "hi", "extra": 1}), &mut state())
            .await;
        assert_eq!(outcome, ToolOutcome::Success(json!({"text": "hi"})));
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let mut registry = ToolRegistry::new();
        registry.register(ToolSchema::new("boom", "Always panics"), Boom);
        let outcome = registry.execute("boom", json!({}), &mut state()).await;
        assert_eq!(outcome, ToolOutcome::Error("Panic: kaboom".to_string()));
    }

    #[tokio::test]
    async fn test_typed_tool_schema_and_call() {
        let mut registry = ToolRegistry::new();
        registry.register_typed(Add);

        let schemas = registry.get_schemas();
        assert_eq!(schemas[0].parameters["a"].param_type, ParamType::Integer);
        assert!(schemas[0].parameters["b"].required);

        let outcome = registry.execute("add", json!({"a": 2, "b": 2}), &mut state()).await;
        assert_eq!(outcome, ToolOutcome::Success(json!(4)));

        let outcome = registry.execute("add", json!({"a": "x", "b": 2}), &mut state()).await;
        assert!(outcome.is_error());
    }

    #[tokio::test]
    async fn test_registration_order_is_kept() {
        let mut registry = ToolRegistry::new();
        registry.register(ToolSchema::new("zeta", "z"), Echo);
        registry.register(ToolSchema::new("alpha", "a"), Echo);
        assert_eq!(registry.names(), vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_error_content_shape() {
        let outcome = ToolOutcome::Error("IOError: nope".into());
        assert_eq!(outcome.content(), json!({"error": "IOError: nope"}));
    }
}
