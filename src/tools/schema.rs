//! Tool schemas and their derivation from argument types
//!
//! A tool schema is deliberately flat: every parameter has one primitive type,
//! a description and a required flag. Typed tools derive theirs from the
//! `schemars` JSON schema of their argument struct.

use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Primitive parameter types understood by every provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    /// Map a JSON schema type name; anything unrecognised is a string
    pub fn from_json_type(name: &str) -> Self {
        match name {
            "integer" => ParamType::Integer,
            "number" => ParamType::Number,
            "boolean" => ParamType::Boolean,
            "array" => ParamType::Array,
            "object" => ParamType::Object,
            _ => ParamType::String,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }
}

/// One declared parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub description: String,
    pub required: bool,
}

impl ParameterSpec {
    pub fn required(param_type: ParamType, description: impl Into<String>) -> Self {
        Self {
            param_type,
            description: description.into(),
            required: true,
        }
    }

    pub fn optional(param_type: ParamType, description: impl Into<String>) -> Self {
        Self {
            param_type,
            description: description.into(),
            required: false,
        }
    }
}

/// Name, description and parameters of a tool as shown to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: IndexMap<String, ParameterSpec>,
}

impl ToolSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: IndexMap::new(),
        }
    }

    /// Builder-style parameter declaration
    pub fn param(mut self, name: impl Into<String>, spec: ParameterSpec) -> Self {
        self.parameters.insert(name.into(), spec);
        self
    }

    pub fn required_params(&self) -> impl Iterator<Item = &str> {
        self.parameters
            .iter()
            .filter(|(_, spec)| spec.required)
            .map(|(name, _)| name.as_str())
    }

    /// JSON schema object for providers with native tool support
    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .parameters
            .iter()
            .map(|(name, spec)| {
                (
                    name.clone(),
                    json!({"type": spec.param_type, "description": spec.description}),
                )
            })
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": self.required_params().collect::<Vec<_>>(),
        })
    }

    /// Derive a schema from the JSON schema of `T`
    pub fn derive<T: JsonSchema>(name: impl Into<String>, description: impl Into<String>) -> Self {
        let root = schemars::schema_for!(T);
        let value = serde_json::to_value(&root).unwrap_or(Value::Null);
        Self {
            name: name.into(),
            description: description.into(),
            parameters: parameters_from_json_schema(&value),
        }
    }
}

/// Flatten a JSON schema object into parameter specs
///
/// Required means listed in `required`. When `type` is an array the first
/// non-"null" entry is used. `$ref` (directly or as the single `allOf` entry
/// schemars emits for documented enum fields) is followed one level into
/// `definitions`.
pub fn parameters_from_json_schema(schema: &Value) -> IndexMap<String, ParameterSpec> {
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let definitions = schema.get("definitions");

    let mut params = IndexMap::new();
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return params;
    };

    for (name, property) in properties {
        let resolved = resolve_ref(property, definitions);
        let description = property
            .get("description")
            .or_else(|| resolved.get("description"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        params.insert(
            name.clone(),
            ParameterSpec {
                param_type: json_type(resolved),
                description,
                required: required.contains(&name.as_str()),
            },
        );
    }
    params
}

fn resolve_ref<'a>(property: &'a Value, definitions: Option<&'a Value>) -> &'a Value {
    let reference = property.get("$ref").or_else(|| {
        property
            .get("allOf")
            .and_then(Value::as_array)
            .and_then(|all| all.first())
            .and_then(|first| first.get("$ref"))
    });
    reference
        .and_then(Value::as_str)
        .and_then(|r| r.rsplit('/').next())
        .and_then(|name| definitions.and_then(|defs| defs.get(name)))
        .unwrap_or(property)
}

fn json_type(property: &Value) -> ParamType {
    match property.get("type") {
        Some(Value::String(name)) => ParamType::from_json_type(name),
        Some(Value::Array(names)) => names
            .iter()
            .filter_map(Value::as_str)
            .find(|name| *name != "null")
            .map(ParamType::from_json_type)
            .unwrap_or(ParamType::String),
        _ => ParamType::String,
    }
}
