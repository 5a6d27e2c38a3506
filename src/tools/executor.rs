//! Tool execution - look up, validate, invoke, capture

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use log::{debug, warn};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use super::ToolRegistry;
use crate::llm::{ToolCallRequest, ToolCallResult};

/// Result content for calls skipped after the session was cancelled
pub const CANCELLED_MESSAGE: &str = "cancelled before execution";

/// Coerce a raw string argument to the JSON type a schema declares.
///
/// Unknown or absent types, and strings that do not parse, stay strings.
pub fn coerce_argument(raw: &str, schema_type: Option<&str>) -> Value {
    let trimmed = raw.trim();
    let coerced = match schema_type {
        Some("integer") => trimmed.parse::<i64>().ok().map(Value::from),
        Some("number") => trimmed.parse::<f64>().ok().and_then(|n| serde_json::Number::from_f64(n).map(Value::Number)),
        Some("boolean") => match trimmed.to_lowercase().as_str() {
            "true" | "yes" | "1" => Some(Value::Bool(true)),
            "false" | "no" | "0" => Some(Value::Bool(false)),
            _ => None,
        },
        Some("object") => serde_json::from_str::<Value>(trimmed).ok().filter(Value::is_object),
        Some("array") => serde_json::from_str::<Value>(trimmed).ok().filter(Value::is_array),
        _ => None,
    };
    coerced.unwrap_or_else(|| Value::String(raw.to_string()))
}

fn property_type<'a>(schema: &'a Value, key: &str) -> Option<&'a str> {
    schema
        .get("properties")
        .and_then(|p| p.get(key))
        .and_then(|p| p.get("type"))
        .and_then(Value::as_str)
}

fn matches_type(value: &Value, ty: &str) -> bool {
    match ty {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

/// Check `args` against a tool's parameter schema.
///
/// Accepts an object, `null` (no arguments) or a string holding a JSON
/// object. String values of non-string properties are coerced first.
pub fn validate_arguments(args: Value, schema: &Value) -> Result<Value, String> {
    let mut object: Map<String, Value> = match args {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        Value::String(s) if s.trim().is_empty() => Map::new(),
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(Value::Object(map)) => map,
            _ => return Err("arguments must be a JSON object".to_string()),
        },
        _ => return Err("arguments must be a JSON object".to_string()),
    };

    for (key, value) in object.iter_mut() {
        let Some(ty) = property_type(schema, key) else {
            continue;
        };
        if ty != "string" {
            if let Some(coerced) = value.as_str().map(|raw| coerce_argument(raw, Some(ty))) {
                *value = coerced;
            }
        }
        if !matches_type(value, ty) {
            return Err(format!("argument '{}' must be of type {}", key, ty));
        }
    }

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for key in required.iter().filter_map(Value::as_str) {
            if !object.contains_key(key) {
                return Err(format!("missing required argument '{}'", key));
            }
        }
    }

    Ok(Value::Object(object))
}

fn render_output(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Execute one call. Never fails: every problem becomes an error result.
pub async fn execute_one(registry: &ToolRegistry, call: &ToolCallRequest) -> ToolCallResult {
    let Some(tool) = registry.get(&call.tool_name) else {
        warn!("Tool not found: {}", call.tool_name);
        return ToolCallResult::error(call, format!("Tool not found: {}", call.tool_name));
    };

    let args = match validate_arguments(call.arguments.clone(), &tool.parameter_schema) {
        Ok(args) => args,
        Err(msg) => {
            warn!("Invalid arguments for {}: {}", call.tool_name, msg);
            return ToolCallResult::error(call, format!("Invalid arguments: {}", msg));
        }
    };

    debug!("Executing tool {} ({})", call.tool_name, call.call_id);
    let function = tool.function.clone();
    match AssertUnwindSafe(function.call(args)).catch_unwind().await {
        Ok(Ok(value)) => ToolCallResult::success(call, render_output(value)),
        Ok(Err(e)) => {
            warn!("Tool {} failed: {}", call.tool_name, e);
            ToolCallResult::error(call, format!("Tool error: {}", e))
        }
        Err(panic) => {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            warn!("Tool {} panicked: {}", call.tool_name, msg);
            ToolCallResult::error(call, format!("Tool panicked: {}", msg))
        }
    }
}

/// Execute calls sequentially in request order, one result per call.
///
/// Once `cancel` is observed the remaining calls are not started and get a
/// [`CANCELLED_MESSAGE`] error result.
pub async fn execute_all(
    registry: &ToolRegistry,
    calls: &[ToolCallRequest],
    cancel: &CancellationToken,
) -> Vec<ToolCallResult> {
    let mut results = Vec::with_capacity(calls.len());
    for call in calls {
        if cancel.is_cancelled() {
            results.push(ToolCallResult::error(call, CANCELLED_MESSAGE));
            continue;
        }
        results.push(execute_one(registry, call).await);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolDefinition;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn echo_tool() -> ToolDefinition {
        ToolDefinition::from_fn(
            "echo",
            "Echo the message",
            json!({
                "type": "object",
                "properties": {"message": {"type": "string"}, "times": {"type": "integer"}},
                "required": ["message"]
            }),
            |args| async move {
                let times = args.get("times").and_then(Value::as_u64).unwrap_or(1) as usize;
                Ok(json!(args["message"].as_str().unwrap_or_default().repeat(times)))
            },
        )
    }

    fn call(id: &str, name: &str, args: Value) -> ToolCallRequest {
        ToolCallRequest::new(id, name, args)
    }

    #[test]
    fn test_coerce_argument() {
        assert_eq!(coerce_argument("42", Some("integer")), json!(42));
        assert_eq!(coerce_argument("2.5", Some("number")), json!(2.5));
        assert_eq!(coerce_argument("True", Some("boolean")), json!(true));
        assert_eq!(coerce_argument("[1,2]", Some("array")), json!([1, 2]));
        assert_eq!(coerce_argument("{\"a\":1}", Some("object")), json!({"a": 1}));
        assert_eq!(coerce_argument("forty", Some("integer")), json!("forty"));
        assert_eq!(coerce_argument("7", None), json!("7"));
    }

    #[test]
    fn test_validate_coerces_and_checks_required() {
        let schema = echo_tool().parameter_schema;
        let ok = validate_arguments(json!({"message": "hi", "times": "3"}), &schema).unwrap();
        assert_eq!(ok["times"], json!(3));

        let missing = validate_arguments(json!({"times": 1}), &schema).unwrap_err();
        assert!(missing.contains("message"));

        let wrong = validate_arguments(json!({"message": "hi", "times": "many"}), &schema).unwrap_err();
        assert!(wrong.contains("times"));
    }

    #[test]
    fn test_validate_accepts_json_string_and_null() {
        let schema = json!({"type": "object"});
        assert_eq!(validate_arguments(json!("{\"a\":1}"), &schema).unwrap(), json!({"a": 1}));
        assert_eq!(validate_arguments(Value::Null, &schema).unwrap(), json!({}));
        assert!(validate_arguments(json!([1]), &schema).is_err());
    }

    #[tokio::test]
    async fn test_execute_success() {
        let registry = ToolRegistry::new().with(echo_tool());
        let result = execute_one(&registry, &call("c1", "echo", json!({"message": "ab", "times": 2}))).await;
        assert!(!result.is_error);
        assert_eq!(result.content, "abab");
        assert_eq!(result.call_id, "c1");
    }

    #[tokio::test]
    async fn test_unknown_tool_does_not_stop_siblings() {
        let registry = ToolRegistry::new().with(echo_tool());
        let calls = vec![
            call("c1", "missing", json!({})),
            call("c2", "echo", json!({"message": "still runs"})),
        ];
        let results = execute_all(&registry, &calls, &CancellationToken::new()).await;
        assert_eq!(results.len(), 2);
        assert!(results[0].is_error);
        assert!(results[0].content.contains("Tool not found"));
        assert!(!results[1].is_error);
        assert_eq!(results[1].content, "still runs");
    }

    #[tokio::test]
    async fn test_tool_error_and_panic_are_captured() {
        let registry = ToolRegistry::new()
            .with(ToolDefinition::from_fn("fail", "Fails", json!({}), |_| async {
                Err::<Value, _>(eyre::eyre!("disk full"))
            }))
            .with(ToolDefinition::from_fn("boom", "Panics", json!({}), |_| async {
                if true {
                    panic!("kaboom");
                }
                Ok(Value::Null)
            }));

        let results = execute_all(
            &registry,
            &[call("c1", "fail", json!({})), call("c2", "boom", json!({}))],
            &CancellationToken::new(),
        )
        .await;
        assert!(results[0].is_error);
        assert!(results[0].content.contains("disk full"));
        assert!(results[1].is_error);
        assert!(results[1].content.contains("kaboom"));
    }

    #[tokio::test]
    async fn test_sequential_order() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let registry = ToolRegistry::new().with(ToolDefinition::from_fn("tick", "Tick", json!({}), move |_| {
            let c = c.clone();
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                Ok(json!(n))
            }
        }));
        let calls: Vec<_> = (0..3).map(|i| call(&format!("c{}", i), "tick", json!({}))).collect();
        let results = execute_all(&registry, &calls, &CancellationToken::new()).await;
        let order: Vec<_> = results.iter().map(|r| r.content.clone()).collect();
        assert_eq!(order, vec!["0", "1", "2"]);
    }

    #[tokio::test]
    async fn test_cancelled_calls_get_error_results() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let registry = ToolRegistry::new().with(ToolDefinition::from_fn("stop", "Cancels", json!({}), move |_| {
            let trigger = trigger.clone();
            async move {
                trigger.cancel();
                Ok(json!("stopped"))
            }
        }));
        let calls = vec![call("c1", "stop", json!({})), call("c2", "stop", json!({}))];
        let results = execute_all(&registry, &calls, &cancel).await;
        assert_eq!(results.len(), 2);
        assert!(!results[0].is_error);
        assert!(results[1].is_error);
        assert_eq!(results[1].content, CANCELLED_MESSAGE);
    }
}
