//! Persistent execution scope for the code sandbox
//!
//! The scope outlives individual executions: variables, imported module
//! aliases and script-defined functions from one `execute_code` call are
//! visible to the next. Executions never mutate the scope directly. They run
//! against a snapshot and report a [`ScopeDelta`] which the caller merges.

use std::collections::BTreeMap;

use rhai::{Dynamic, AST};
use serde_json::{Map, Value};

/// Variables, module aliases and functions that persist across executions
#[derive(Debug, Clone, Default)]
pub struct ExecutionScope {
    vars: BTreeMap<String, Dynamic>,
    /// alias -> module name
    imports: BTreeMap<String, String>,
    functions: AST,
}

/// Entries created or changed by one execution
#[derive(Debug, Clone, Default)]
pub struct ScopeDelta {
    pub vars: BTreeMap<String, Dynamic>,
    pub imports: BTreeMap<String, String>,
    /// Functions-only AST of everything the execution defined
    pub functions: Option<AST>,
}

impl ExecutionScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// A scope with every module in `modules` already bound under its own name
    pub fn with_imports<I, S>(modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut scope = Self::new();
        for module in modules {
            let module = module.into();
            scope.imports.insert(module.clone(), module);
        }
        scope
    }

    pub fn get(&self, name: &str) -> Option<&Dynamic> {
        self.vars.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: Dynamic) {
        self.vars.insert(name.into(), value);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name) || self.imports.contains_key(name)
    }

    pub fn vars(&self) -> impl Iterator<Item = (&String, &Dynamic)> {
        self.vars.iter()
    }

    pub fn imports(&self) -> impl Iterator<Item = (&String, &String)> {
        self.imports.iter()
    }

    /// Module bound to `alias`, if any
    pub fn import(&self, alias: &str) -> Option<&str> {
        self.imports.get(alias).map(String::as_str)
    }

    pub fn functions(&self) -> &AST {
        &self.functions
    }

    /// Names of the script-defined functions in scope
    pub fn function_names(&self) -> Vec<String> {
        function_names(&self.functions)
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty() && self.imports.is_empty() && self.function_names().is_empty()
    }

    /// Apply a delta: its entries overwrite existing ones of the same name
    pub fn merge(&mut self, delta: ScopeDelta) {
        self.vars.extend(delta.vars);
        self.imports.extend(delta.imports);
        if let Some(functions) = delta.functions {
            self.functions = self.functions.merge(&functions);
        }
    }

    /// Render the whole scope as a JSON object
    pub fn to_json(&self) -> Value {
        render(&self.vars, &self.imports, &self.function_names())
    }
}

impl ScopeDelta {
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
            && self.imports.is_empty()
            && self.functions.as_ref().map_or(true, |f| function_names(f).is_empty())
    }

    /// Render the delta as a JSON object
    ///
    /// Values become JSON where possible; modules render as `<module NAME>`
    /// and functions as `<fn NAME>`.
    pub fn to_json(&self) -> Value {
        let names = self.functions.as_ref().map(function_names).unwrap_or_default();
        render(&self.vars, &self.imports, &names)
    }
}

/// Identity of a value used to decide whether a binding changed
pub(crate) fn fingerprint(value: &Dynamic) -> String {
    format!("{}:{:?}", value.type_name(), value)
}

/// Convert a script value to JSON, falling back to its display form
pub fn dynamic_to_json(value: &Dynamic) -> Value {
    if value.is_unit() {
        return Value::Null;
    }
    rhai::serde::from_dynamic::<Value>(value).unwrap_or_else(|_| Value::String(value.to_string()))
}

fn function_names(ast: &AST) -> Vec<String> {
    ast.iter_functions().map(|f| f.name.to_string()).collect()
}

fn render(
    vars: &BTreeMap<String, Dynamic>,
    imports: &BTreeMap<String, String>,
    functions: &[String],
) -> Value {
    let mut out = Map::new();
    for (alias, module) in imports {
        out.insert(alias.clone(), Value::String(format!("<module {module}>")));
    }
    for name in functions {
        out.insert(name.clone(), Value::String(format!("<fn {name}>")));
    }
    for (name, value) in vars {
        out.insert(name.clone(), dynamic_to_json(value));
    }
    Value::Object(out)
}
