//! Textual tool-call extraction for providers without native function calling.
//!
//! The model writes calls as `Action: tool_name(arg='value')`, one per
//! statement. Every well-formed call is extracted, registered or not, so an
//! unknown name still gets an error result. Reserved names (device actions
//! when an operator is attached) that are not registered tools stay in the
//! content for the action parser.

use serde_json::{Map, Value};

use super::types::{ToolCallRequest, ToolSpec};
use crate::action::grammar::{CallExpr, parse_call};
use crate::id::generate_call_id;
use crate::tools::coerce_argument;

const ACTION_MARKER: &str = "Action:";

/// Result of scanning assistant text for tool calls
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedCalls {
    /// Text with the extracted call statements removed
    pub content: String,
    pub calls: Vec<ToolCallRequest>,
}

/// Split text into lines, grouping each `Action:` line with any
/// continuation lines up to the next blank line or marker.
fn statements(text: &str) -> Vec<(bool, String)> {
    let mut out: Vec<(bool, String)> = Vec::new();
    let mut in_action = false;
    for line in text.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with(ACTION_MARKER) {
            out.push((true, trimmed[ACTION_MARKER.len()..].trim().to_string()));
            in_action = true;
        } else if line.trim().is_empty() {
            out.push((false, String::new()));
            in_action = false;
        } else if in_action {
            if let Some((_, expr)) = out.last_mut() {
                expr.push('\n');
                expr.push_str(line);
            }
        } else {
            out.push((false, line.to_string()));
        }
    }
    out
}

fn arguments_for(call: &CallExpr, spec: Option<&ToolSpec>) -> Value {
    let parameters = spec.map(|s| &s.parameters);
    let required: Vec<&str> = parameters
        .and_then(|p| p.get("required"))
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    let declared: Vec<&str> = parameters
        .and_then(|p| p.get("properties"))
        .and_then(Value::as_object)
        .map(|p| p.keys().map(String::as_str).collect())
        .unwrap_or_default();

    let mut map = Map::new();
    let mut positional = 0;
    for arg in &call.args {
        let key = match &arg.key {
            Some(k) => k.clone(),
            None => {
                let key = positional_key(positional, &required, &declared);
                positional += 1;
                key
            }
        };
        let ty = parameters
            .and_then(|p| p.get("properties"))
            .and_then(|p| p.get(&key))
            .and_then(|p| p.get("type"))
            .and_then(Value::as_str);
        map.insert(key, coerce_argument(&arg.value, ty));
    }
    Value::Object(map)
}

/// Positional values fill required parameters first, then the remaining
/// declared ones in name order, then fall back to `input`, `input_1`, ...
fn positional_key(index: usize, required: &[&str], declared: &[&str]) -> String {
    let optional = declared.iter().filter(|k| !required.contains(k));
    if let Some(k) = required.iter().chain(optional).nth(index) {
        return k.to_string();
    }
    if index == 0 {
        "input".to_string()
    } else {
        format!("input_{}", index)
    }
}

/// Extract tool calls from assistant text.
///
/// Calls named in `reserved` are left in the content unless a registered
/// tool has the same name.
pub fn extract_tool_calls(text: &str, tools: &[ToolSpec], reserved: &[&str]) -> ExtractedCalls {
    let mut kept: Vec<String> = Vec::new();
    let mut calls = Vec::new();

    for (is_action, body) in statements(text) {
        if !is_action {
            kept.push(body);
            continue;
        }
        let call = parse_call(&body).and_then(|call| {
            let spec = tools.iter().find(|t| t.name == call.name);
            if spec.is_none() && reserved.contains(&call.name.as_str()) {
                None
            } else {
                Some((call, spec))
            }
        });
        match call {
            Some((call, spec)) => {
                let arguments = arguments_for(&call, spec);
                calls.push(ToolCallRequest::new(generate_call_id(calls.len()), call.name, arguments));
            }
            None => kept.push(format!("{} {}", ACTION_MARKER, body)),
        }
    }

    ExtractedCalls {
        content: kept.join("\n").trim().to_string(),
        calls,
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{}'", s.replace('\'', "\\'")),
        other => other.to_string(),
    }
}

/// Render a call back into the textual grammar
pub fn format_tool_call(call: &ToolCallRequest) -> String {
    let args = match &call.arguments {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| format!("{}={}", k, format_value(v)))
            .collect::<Vec<_>>()
            .join(", "),
        Value::Null => String::new(),
        other => format!("input={}", format_value(other)),
    };
    format!("{} {}({})", ACTION_MARKER, call.tool_name, args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn specs() -> Vec<ToolSpec> {
        vec![
            ToolSpec::new(
                "read_file",
                "Read a file",
                json!({
                    "type": "object",
                    "properties": {"path": {"type": "string"}, "limit": {"type": "integer"}},
                    "required": ["path"]
                }),
            ),
            ToolSpec::new("current_time", "Time", json!({"type": "object", "properties": {}})),
        ]
    }

    #[test]
    fn test_extracts_single_call() {
        let out = extract_tool_calls("I need the file.\nAction: read_file(path='/tmp/a.txt', limit='10')", &specs(), &[]);
        assert_eq!(out.content, "I need the file.");
        assert_eq!(out.calls.len(), 1);
        assert_eq!(out.calls[0].tool_name, "read_file");
        assert_eq!(out.calls[0].arguments, json!({"path": "/tmp/a.txt", "limit": 10}));
        assert!(out.calls[0].call_id.starts_with("call_0_"));
    }

    #[test]
    fn test_extracts_multiple_calls_in_order() {
        let text = "Action: current_time()\n\nAction: read_file('/etc/hosts')";
        let out = extract_tool_calls(text, &specs(), &[]);
        assert_eq!(out.calls.len(), 2);
        assert_eq!(out.calls[0].tool_name, "current_time");
        assert_eq!(out.calls[1].arguments, json!({"path": "/etc/hosts"}));
        assert!(out.calls[1].call_id.starts_with("call_1_"));
        assert!(out.content.is_empty());
    }

    #[test]
    fn test_reserved_names_stay_in_content() {
        let text = "Thought: click the button\nAction: click(start_box='(100,200)')";
        let out = extract_tool_calls(text, &specs(), &["click", "type"]);
        assert!(out.calls.is_empty());
        assert!(out.content.contains("Action: click(start_box='(100,200)')"));
    }

    #[test]
    fn test_unregistered_names_are_extracted() {
        let text = "Action: search_web(q='rust')\n\nAction: read_file('/etc/hosts')";
        let out = extract_tool_calls(text, &specs(), &["click"]);
        assert_eq!(out.calls.len(), 2);
        assert_eq!(out.calls[0].tool_name, "search_web");
        assert_eq!(out.calls[0].arguments, json!({"q": "rust"}));
        assert_eq!(out.calls[1].tool_name, "read_file");
        assert!(out.content.is_empty());
    }

    #[test]
    fn test_registered_tool_wins_over_reserved_name() {
        let out = extract_tool_calls("Action: current_time()", &specs(), &["current_time"]);
        assert_eq!(out.calls.len(), 1);
        assert_eq!(out.calls[0].tool_name, "current_time");
    }

    #[test]
    fn test_malformed_call_stays_in_content() {
        let out = extract_tool_calls("Action: this is not a call", &specs(), &[]);
        assert!(out.calls.is_empty());
        assert_eq!(out.content, "Action: this is not a call");
    }

    #[test]
    fn test_plain_answer_has_no_calls() {
        let out = extract_tool_calls("The answer is 42.", &specs(), &[]);
        assert!(out.calls.is_empty());
        assert_eq!(out.content, "The answer is 42.");
    }

    #[test]
    fn test_positional_fallback_key() {
        assert_eq!(positional_key(0, &[], &[]), "input");
        assert_eq!(positional_key(1, &[], &[]), "input_1");
        assert_eq!(positional_key(0, &["path"], &["limit", "path"]), "path");
        assert_eq!(positional_key(1, &["path"], &["limit", "path"]), "limit");
        assert_eq!(positional_key(2, &["path"], &["limit", "path"]), "input_2");
        assert_eq!(positional_key(0, &[], &["q"]), "q");
    }

    #[test]
    fn test_positional_args_fill_required_then_declared() {
        let out = extract_tool_calls("Action: read_file('/etc/hosts', '3')", &specs(), &[]);
        assert_eq!(out.calls[0].arguments, json!({"path": "/etc/hosts", "limit": 3}));
    }

    #[test]
    fn test_format_round_trips_through_extractor() {
        let call = ToolCallRequest::new("c1", "read_file", json!({"path": "it's.txt", "limit": 5}));
        let text = format_tool_call(&call);
        assert_eq!(text, "Action: read_file(limit=5, path='it\\'s.txt')");
        let out = extract_tool_calls(&text, &specs(), &[]);
        assert_eq!(out.calls[0].arguments, json!({"path": "it's.txt", "limit": 5}));
    }
}
