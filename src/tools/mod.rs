//! Tool system: definitions, the per-run registry and sequential execution.
//!
//! Tools are registered before a run starts and looked up by name when the
//! model requests them. Each call yields exactly one [`ToolCallResult`].
//!
//! [`ToolCallResult`]: crate::llm::ToolCallResult

mod builtin;
mod executor;
mod registry;

pub use builtin::{current_time_tool, list_directory_tool, read_file_tool};
pub use executor::{CANCELLED_MESSAGE, coerce_argument, execute_all, execute_one, validate_arguments};
pub use registry::ToolRegistry;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::llm::ToolSpec;

/// The callable part of a tool
#[async_trait]
pub trait ToolFunction: Send + Sync {
    /// Invoke with validated arguments; the result must be JSON-serializable
    async fn call(&self, args: Value) -> eyre::Result<Value>;
}

type BoxedFn = dyn Fn(Value) -> Pin<Box<dyn Future<Output = eyre::Result<Value>> + Send>> + Send + Sync;

struct FnTool(Box<BoxedFn>);

#[async_trait]
impl ToolFunction for FnTool {
    async fn call(&self, args: Value) -> eyre::Result<Value> {
        (self.0)(args).await
    }
}

/// A named tool the model may call
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object
    pub parameter_schema: Value,
    pub function: Arc<dyn ToolFunction>,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameter_schema: Value,
        function: Arc<dyn ToolFunction>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameter_schema,
            function,
        }
    }

    /// Build a tool from an async closure
    pub fn from_fn<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameter_schema: Value,
        f: F,
    ) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = eyre::Result<Value>> + Send + 'static,
    {
        let boxed: Box<BoxedFn> = Box::new(move |args| Box::pin(f(args)));
        Self::new(name, description, parameter_schema, Arc::new(FnTool(boxed)))
    }

    /// Schema advertised to the model
    pub fn spec(&self) -> ToolSpec {
        ToolSpec::new(&self.name, &self.description, self.parameter_schema.clone())
    }
}

impl std::fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameter_schema", &self.parameter_schema)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_from_fn_invokes_closure() {
        let tool = ToolDefinition::from_fn("add", "Add two numbers", json!({"type": "object"}), |args| async move {
            let a = args["a"].as_i64().unwrap_or(0);
            let b = args["b"].as_i64().unwrap_or(0);
            Ok(json!(a + b))
        });
        let out = tool.function.call(json!({"a": 2, "b": 3})).await.unwrap();
        assert_eq!(out, json!(5));
    }

    #[test]
    fn test_spec_copies_schema() {
        let schema = json!({"type": "object", "properties": {"q": {"type": "string"}}});
        let tool = ToolDefinition::from_fn("search", "Search", schema.clone(), |_| async { Ok(Value::Null) });
        let spec = tool.spec();
        assert_eq!(spec.name, "search");
        assert_eq!(spec.parameters, schema);
    }

    #[test]
    fn test_debug_omits_function() {
        let tool = ToolDefinition::from_fn("noop", "Nothing", json!({}), |_| async { Ok(Value::Null) });
        let dbg = format!("{:?}", tool);
        assert!(dbg.contains("noop"));
    }
}
