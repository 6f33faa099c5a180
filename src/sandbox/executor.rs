//! Sandboxed script execution against a persistent scope
//!
//! Each call builds a fresh [`rhai::Engine`], seeds a script scope from a
//! snapshot of the [`ExecutionScope`], runs the code on a blocking thread and
//! diffs the resulting script scope against the snapshot. Faults are reported
//! inside [`ExecutionOutcome`]; `execute` itself never fails.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rhai::{Dynamic, Engine, EvalAltResult, Expr, Position, Scope, Stmt, AST};
use serde_json::{json, Value};
use tracing::{debug, info_span, warn, Instrument};

use super::modules::ModuleCatalogue;
use super::scope::{fingerprint, ExecutionScope, ScopeDelta};
use crate::config::AgentConfig;
use crate::metrics::{CODE_EXECUTIONS, CODE_EXECUTION_DURATION};

/// Default operation budget for one execution
pub const DEFAULT_MAX_OPERATIONS: u64 = 50_000_000;

/// A script fault classified by kind
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct SandboxError {
    pub kind: &'static str,
    pub message: String,
}

impl SandboxError {
    fn new(kind: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == "TimeoutError"
    }
}

/// Result of one execution
#[derive(Debug, Clone, Default)]
pub struct ExecutionOutcome {
    /// Everything the script printed, one line per print call
    pub output: String,
    pub error: Option<SandboxError>,
    /// Scope entries the execution created or changed
    pub delta: ScopeDelta,
    pub duration: Duration,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn to_json(&self) -> Value {
        json!({
            "output": self.output,
            "error": self.error.as_ref().map(ToString::to_string),
            "scope_delta": self.delta.to_json(),
        })
    }
}

/// Runs scripts with a restricted module set and wall-clock limit
#[derive(Debug, Clone)]
pub struct CodeSandbox {
    modules: Arc<ModuleCatalogue>,
    timeout: Duration,
    max_operations: u64,
}

impl CodeSandbox {
    pub fn new(config: &AgentConfig) -> Self {
        Self::with_limits(
            &config.authorized_imports,
            Duration::from_secs(config.execution_timeout_secs),
        )
    }

    pub fn with_limits<S: AsRef<str>>(authorized_imports: &[S], timeout: Duration) -> Self {
        Self {
            modules: Arc::new(ModuleCatalogue::authorized(authorized_imports)),
            timeout,
            max_operations: DEFAULT_MAX_OPERATIONS,
        }
    }

    pub fn max_operations(mut self, max_operations: u64) -> Self {
        self.max_operations = max_operations;
        self
    }

    /// Names of the modules scripts may import
    pub fn authorized_modules(&self) -> Vec<&str> {
        self.modules.names()
    }

    /// A scope with every authorized module already imported under its own name
    pub fn initial_scope(&self) -> ExecutionScope {
        ExecutionScope::with_imports(self.modules.names())
    }

    /// Run `code` against a snapshot of `scope`
    ///
    /// `scope` is not modified; merge `outcome.delta` to persist the changes.
    pub async fn execute(&self, code: &str, scope: &ExecutionScope) -> ExecutionOutcome {
        let span = info_span!("code_execution", code_len = code.len());
        let started = Instant::now();
        let job = ExecutionJob {
            code: code.to_string(),
            snapshot: scope.clone(),
            modules: self.modules.clone(),
            timeout: self.timeout,
            max_operations: self.max_operations,
        };

        let mut outcome = async move {
            match tokio::task::spawn_blocking(move || job.run()).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(error = %e, "sandbox worker failed");
                    ExecutionOutcome {
                        error: Some(SandboxError::new("InternalError", e.to_string())),
                        ..Default::default()
                    }
                }
            }
        }
        .instrument(span)
        .await;

        outcome.duration = started.elapsed();
        let status = match &outcome.error {
            None => "success",
            Some(e) if e.is_timeout() => "timeout",
            Some(_) => "error",
        };
        CODE_EXECUTIONS.with_label_values(&[status]).inc();
        CODE_EXECUTION_DURATION.observe(outcome.duration.as_secs_f64());
        debug!(
            status,
            duration_ms = outcome.duration.as_millis() as u64,
            changed = outcome.delta.vars.len(),
            "code execution finished"
        );
        outcome
    }
}

struct ExecutionJob {
    code: String,
    snapshot: ExecutionScope,
    modules: Arc<ModuleCatalogue>,
    timeout: Duration,
    max_operations: u64,
}

impl ExecutionJob {
    fn run(self) -> ExecutionOutcome {
        let output = Arc::new(Mutex::new(String::new()));
        let engine = self.build_engine(&output);

        let mut script_scope = Scope::new();
        for (name, value) in self.snapshot.vars() {
            script_scope.push_dynamic(name.clone(), value.clone());
        }

        let ast = match engine.compile(&self.code) {
            Ok(ast) => ast,
            Err(e) => {
                return ExecutionOutcome {
                    output: take_output(&output),
                    error: Some(SandboxError::new("SyntaxError", e.to_string())),
                    ..Default::default()
                }
            }
        };

        let runnable = self.snapshot.functions().merge(&ast);
        let result = engine.run_ast_with_scope(&mut script_scope, &runnable);

        let mut delta = ScopeDelta {
            vars: self.changed_vars(&script_scope),
            ..Default::default()
        };
        let defined = ast.clone_functions_only();
        if defined.iter_functions().next().is_some() {
            delta.functions = Some(defined);
        }

        let error = match result {
            Ok(()) => {
                delta.imports = self.executed_imports(&ast, None);
                None
            }
            Err(e) => {
                delta.imports = self.executed_imports(&ast, Some(e.position()));
                Some(self.classify(*e))
            }
        };

        ExecutionOutcome {
            output: take_output(&output),
            error,
            delta,
            duration: Duration::ZERO,
        }
    }

    fn build_engine(&self, output: &Arc<Mutex<String>>) -> Engine {
        let mut engine = Engine::new();
        engine.set_max_operations(self.max_operations);

        let deadline = Instant::now().checked_add(self.timeout);
        engine.on_progress(move |_| {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                Some(Dynamic::from("wall-clock limit exceeded".to_string()))
            } else {
                None
            }
        });

        let sink = output.clone();
        engine.on_print(move |text| append_line(&sink, text));
        let sink = output.clone();
        engine.on_debug(move |text, _source, _pos| append_line(&sink, text));

        for (alias, module) in self.snapshot.imports() {
            if let Some(module) = self.modules.get(module) {
                engine.register_static_module(alias.as_str(), module.clone());
            }
        }
        engine.set_module_resolver(self.modules.resolver());
        engine
    }

    /// Top-level bindings whose value is new or changed since the snapshot
    fn changed_vars(&self, script_scope: &Scope) -> BTreeMap<String, Dynamic> {
        // later entries shadow earlier ones with the same name
        let mut finals: BTreeMap<String, Dynamic> = BTreeMap::new();
        for (name, _constant, value) in script_scope.iter() {
            finals.insert(name.to_string(), value);
        }
        finals
            .into_iter()
            .filter(|(name, value)| {
                self.snapshot.get(name).map(fingerprint) != Some(fingerprint(value))
            })
            .collect()
    }

    /// Top-level `import "module" as alias` statements that ran
    ///
    /// Imports inside blocks or functions are scoped to them and never
    /// persist. After a fault only statements that start before the fault
    /// position count; a fault without a position keeps every import, since
    /// binding an authorized module has no side effects.
    fn executed_imports(&self, ast: &AST, fault: Option<Position>) -> BTreeMap<String, String> {
        ast.statements()
            .iter()
            .filter_map(|stmt| match stmt {
                Stmt::Import(import, pos) => match import.as_ref() {
                    (Expr::StringConstant(module, _), alias) if !alias.name.is_empty() => {
                        Some((*pos, alias.name.to_string(), module.to_string()))
                    }
                    _ => None,
                },
                _ => None,
            })
            .filter(|(pos, _, _)| fault.map_or(true, |fault| starts_before(*pos, fault)))
            .filter(|(_, _, module)| self.modules.contains(module))
            .filter(|(_, alias, module)| self.snapshot.import(alias) != Some(module.as_str()))
            .map(|(_, alias, module)| (alias, module))
            .collect()
    }

    fn classify(&self, error: EvalAltResult) -> SandboxError {
        let message = error.to_string();
        match error {
            EvalAltResult::ErrorParsing(..) => SandboxError::new("SyntaxError", message),
            EvalAltResult::ErrorVariableNotFound(..)
            | EvalAltResult::ErrorFunctionNotFound(..)
            | EvalAltResult::ErrorPropertyNotFound(..) => SandboxError::new("NameError", message),
            EvalAltResult::ErrorMismatchDataType(..)
            | EvalAltResult::ErrorMismatchOutputType(..)
            | EvalAltResult::ErrorIndexingType(..)
            | EvalAltResult::ErrorFor(..) => SandboxError::new("TypeError", message),
            EvalAltResult::ErrorArithmetic(..) => SandboxError::new("ArithmeticError", message),
            EvalAltResult::ErrorArrayBounds(..)
            | EvalAltResult::ErrorStringBounds(..)
            | EvalAltResult::ErrorBitFieldBounds(..) => SandboxError::new("IndexError", message),
            EvalAltResult::ErrorModuleNotFound(name, _) => SandboxError::new(
                "ImportError",
                format!(
                    "module '{name}' is not authorized (authorized: {})",
                    self.modules.names().join(", ")
                ),
            ),
            EvalAltResult::ErrorTerminated(..) => SandboxError::new(
                "TimeoutError",
                format!("execution exceeded {} seconds", self.timeout.as_secs_f64()),
            ),
            EvalAltResult::ErrorTooManyOperations(..) => {
                SandboxError::new("TimeoutError", "execution exceeded its operation budget")
            }
            EvalAltResult::ErrorRuntime(..) => SandboxError::new("RuntimeError", message),
            EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => self.classify(*inner),
            _ => SandboxError::new("EvalError", message),
        }
    }
}

fn starts_before(stmt: Position, fault: Position) -> bool {
    fault.is_none() || (stmt.line(), stmt.position()) < (fault.line(), fault.position())
}

fn append_line(sink: &Arc<Mutex<String>>, text: &str) {
    if let Ok(mut buffer) = sink.lock() {
        buffer.push_str(text);
        buffer.push('\n');
    }
}

fn take_output(sink: &Arc<Mutex<String>>) -> String {
    sink.lock().map(|mut buffer| std::mem::take(&mut *buffer)).unwrap_or_default()
}
