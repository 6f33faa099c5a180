//! Tool-call recovery from free text
//!
//! Used only in degraded mode, for models that write tool calls into their
//! text instead of emitting structured tool blocks. Recognised forms:
//!
//! - a JSON object `{"name": "...", "arguments": {...}}` (or `"parameters"`)
//! - `tool_name({...})` for a known tool name
//! - `Function to call: tool_name` followed by `Arguments: {...}`
//!
//! Calls are returned in the order they appear in the text.

use serde_json::Value;

/// A tool call recovered from text
#[derive(Debug, Clone, PartialEq)]
pub struct TextToolCall {
    pub name: String,
    pub arguments: Value,
}

/// Recover tool calls from `content`
///
/// `known_tools` limits the call-syntax and "Function to call" forms to
/// registered names; bare JSON objects are accepted for any name so that
/// dispatch can report unknown tools.
pub fn parse_tool_calls_from_text(content: &str, known_tools: &[&str]) -> Vec<TextToolCall> {
    let content = content.trim();

    // Try parsing the entire content as a tool call
    if let Some(call) = try_parse_tool_call(content) {
        return vec![call];
    }

    let mut found: Vec<(usize, TextToolCall)> = Vec::new();

    // JSON objects within the text
    for (start, end) in top_level_objects(content) {
        if let Some(call) = try_parse_tool_call(&content[start..end]) {
            found.push((start, call));
        }
    }

    for name in known_tools {
        found.extend(find_call_syntax(content, name));
        found.extend(find_function_to_call(content, name));
    }

    found.sort_by_key(|(pos, _)| *pos);
    found.dedup_by(|a, b| a.0 == b.0);
    found.into_iter().map(|(_, call)| call).collect()
}

/// `name({...})` occurrences, keyed by the position of the name
fn find_call_syntax(content: &str, name: &str) -> Vec<(usize, TextToolCall)> {
    let mut calls = Vec::new();
    let mut from = 0;
    while let Some(offset) = content[from..].find(name) {
        let at = from + offset;
        from = at + name.len();

        let preceded_by_ident = content[..at]
            .chars()
            .next_back()
            .map_or(false, |c| c.is_alphanumeric() || c == '_');
        if preceded_by_ident {
            continue;
        }

        let rest = &content[from..];
        let trimmed = rest.trim_start();
        let Some(after_paren) = trimmed.strip_prefix('(') else {
            continue;
        };
        let inner = after_paren.trim_start();
        if !inner.starts_with('{') {
            continue;
        }
        let object_start = content.len() - inner.len();
        if let Some(end) = object_end(content, object_start) {
            if let Some(arguments) = parse_object(&content[object_start..end]) {
                calls.push((
                    at,
                    TextToolCall {
                        name: name.to_string(),
                        arguments,
                    },
                ));
            }
        }
    }
    calls
}

/// `Function to call: name ... Arguments: {...}` occurrences
fn find_function_to_call(content: &str, name: &str) -> Vec<(usize, TextToolCall)> {
    const MARKER: &str = "Function to call:";
    let mut calls = Vec::new();
    let mut from = 0;
    while let Some(offset) = content[from..].find(MARKER) {
        let at = from + offset;
        from = at + MARKER.len();

        let rest = content[from..].trim_start();
        let names_tool = rest
            .strip_prefix(name)
            .map_or(false, |tail| !tail.starts_with(|c: char| c.is_alphanumeric() || c == '_'));
        if !names_tool {
            continue;
        }
        let Some(args_at) = rest.find("Arguments:") else {
            continue;
        };
        let args = rest[args_at + "Arguments:".len()..].trim_start();
        if !args.starts_with('{') {
            continue;
        }
        let object_start = content.len() - args.len();
        if let Some(end) = object_end(content, object_start) {
            if let Some(arguments) = parse_object(&content[object_start..end]) {
                calls.push((
                    at,
                    TextToolCall {
                        name: name.to_string(),
                        arguments,
                    },
                ));
            }
        }
    }
    calls
}

/// Byte ranges of top-level `{...}` objects, ignoring braces inside strings
fn top_level_objects(content: &str) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut from = 0;
    while let Some(offset) = content[from..].find('{') {
        let start = from + offset;
        match object_end(content, start) {
            Some(end) => {
                ranges.push((start, end));
                from = end;
            }
            None => break,
        }
    }
    ranges
}

/// End (exclusive) of the object whose `{` is at `start`
fn object_end(content: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in content[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_object(text: &str) -> Option<Value> {
    serde_json::from_str::<Value>(text)
        .ok()
        .or_else(|| try_fix_malformed_json(text).and_then(|fixed| serde_json::from_str(&fixed).ok()))
        .filter(Value::is_object)
}

/// Try to parse a single tool call from a JSON string
fn try_parse_tool_call(json_str: &str) -> Option<TextToolCall> {
    if let Ok(value) = serde_json::from_str::<Value>(json_str) {
        return parse_tool_call_from_value(&value);
    }

    // Fallback: unescaped quotes inside a "code" string
    let fixed = try_fix_malformed_json(json_str)?;
    let value = serde_json::from_str::<Value>(&fixed).ok()?;
    parse_tool_call_from_value(&value)
}

/// Escape stray double quotes inside a `"code": "..."` value
///
/// Models often emit `{"name": "execute_code", "arguments": {"code": "print("hi")"}}`.
fn try_fix_malformed_json(json_str: &str) -> Option<String> {
    let code_marker = "\"code\": \"";
    let code_start = json_str.find(code_marker)?;
    let code_value_start = code_start + code_marker.len();

    let remaining = &json_str[code_value_start..];
    let end_pattern = remaining.rfind("\"}")?;
    let code_content = &remaining[..end_pattern];

    let escaped_code = code_content
        .replace("\\\"", "\u{FFFF}")
        .replace('"', "\\\"")
        .replace('\u{FFFF}', "\\\"");

    let prefix = &json_str[..code_value_start];
    let suffix = &json_str[code_value_start + end_pattern..];

    Some(format!("{prefix}{escaped_code}{suffix}"))
}

/// `{"name": ..., "arguments"|"parameters": {...}}`
fn parse_tool_call_from_value(value: &Value) -> Option<TextToolCall> {
    let name = value.get("name").and_then(Value::as_str)?;
    let arguments = value
        .get("arguments")
        .or_else(|| value.get("parameters"))?
        .clone();

    // Some models JSON-encode the arguments object as a string
    let arguments = match arguments {
        Value::String(s) => serde_json::from_str::<Value>(&s).unwrap_or(Value::String(s)),
        other => other,
    };

    Some(TextToolCall {
        name: name.to_string(),
        arguments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TOOLS: &[&str] = &["execute_code", "final_answer"];

    #[test]
    fn test_parse_whole_content_json() {
        let calls = parse_tool_calls_from_text(
            r#"{"name": "execute_code", "arguments": {"code": "print(1)"}}"#,
            TOOLS,
        );
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "execute_code");
        assert_eq!(calls[0].arguments, json!({"code": "print(1)"}));
    }

    #[test]
    fn test_parse_embedded_json_objects_in_order() {
        let text = r#"First {"name": "execute_code", "arguments": {"code": "let x = {a: 1};"}}
then {"name": "final_answer", "parameters": {"answer": "4"}}"#;
        let calls = parse_tool_calls_from_text(text, TOOLS);
        let names: Vec<&str> = calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["execute_code", "final_answer"]);
        assert_eq!(calls[0].arguments["code"], "let x = {a: 1};");
    }

    #[test]
    fn test_parse_call_syntax() {
        let text = "I need to compute.\nexecute_code({\"code\": \"print(2 + 2)\"})";
        let calls = parse_tool_calls_from_text(text, TOOLS);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments, json!({"code": "print(2 + 2)"}));
    }

    #[test]
    fn test_parse_function_to_call_format() {
        let text = "Function to call: final_answer\nArguments: {\"answer\": \"4\"}";
        let calls = parse_tool_calls_from_text(text, TOOLS);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "final_answer");
        assert_eq!(calls[0].arguments, json!({"answer": "4"}));
    }

    #[test]
    fn test_call_syntax_ignores_longer_identifiers() {
        let text = "my_execute_code({\"code\": \"1\"})";
        assert!(parse_tool_calls_from_text(text, TOOLS).is_empty());
    }

    #[test]
    fn test_fix_unescaped_quotes_in_code() {
        let text = r#"{"name": "execute_code", "arguments": {"code": "print("hi")"}}"#;
        let calls = parse_tool_calls_from_text(text, TOOLS);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments["code"], "print(\"hi\")");
    }

    #[test]
    fn test_stringified_arguments_are_decoded() {
        let text = r#"{"name": "final_answer", "arguments": "{\"answer\": \"ok\"}"}"#;
        let calls = parse_tool_calls_from_text(text, TOOLS);
        assert_eq!(calls[0].arguments, json!({"answer": "ok"}));
    }

    #[test]
    fn test_plain_text_has_no_calls() {
        assert!(parse_tool_calls_from_text("The answer is 4.", TOOLS).is_empty());
    }
}
