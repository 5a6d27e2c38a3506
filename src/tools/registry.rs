//! Tool registry - name to definition, in registration order

use log::debug;

use super::ToolDefinition;
use crate::llm::ToolSpec;

/// Tools available to one run.
///
/// Mutated only before the run starts; the loop holds it behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDefinition>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A later registration with the same name replaces the
    /// earlier one and keeps its position.
    pub fn register(&mut self, tool: ToolDefinition) {
        match self.tools.iter_mut().find(|t| t.name == tool.name) {
            Some(existing) => {
                debug!("Replacing tool registration: {}", tool.name);
                *existing = tool;
            }
            None => self.tools.push(tool),
        }
    }

    /// Builder-style register
    pub fn with(mut self, tool: ToolDefinition) -> Self {
        self.register(tool);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn list(&self) -> &[ToolDefinition] {
        &self.tools
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    /// Schemas for the tool call engine
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(ToolDefinition::spec).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
