//! Action parsing - model output text to coordinate-normalized actions.
//!
//! This module provides:
//! - ParsedAction, the structured form of one device action
//! - parse_action_text for `bc` and `o1` output formats
//! - Box helpers shared with the operator's denormalization
//! - The call-expression grammar reused by the textual tool-call extractor

pub mod boxes;
pub mod grammar;
mod parser;

pub use boxes::{box_center, format_box, normalize_box, parse_box, parse_canonical};
pub use parser::parse_action_text;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Output format the model was prompted with
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionFormat {
    #[default]
    Bc,
    O1,
}

impl std::str::FromStr for ActionFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bc" => Ok(ActionFormat::Bc),
            "o1" => Ok(ActionFormat::O1),
            other => Err(format!("unknown action format: {}", other)),
        }
    }
}

/// Parser options: coordinate grid factors and output format.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ParseOptions {
    /// `(width, height)` the model's coordinates are expressed on; None means a 1000x1000 grid
    pub factors: Option<(f64, f64)>,
    pub mode: ActionFormat,
}

/// One structured action parsed from a model turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedAction {
    pub reflection: Option<String>,
    pub thought: String,
    pub action_type: String,
    /// Raw string inputs; `*_box` values are canonical `[x1,y1,x2,y2]` fractions
    pub action_inputs: BTreeMap<String, String>,
}

impl ParsedAction {
    /// Convenience constructor, mostly for tests and scripted operators
    pub fn new(action_type: impl Into<String>) -> Self {
        Self {
            reflection: None,
            thought: String::new(),
            action_type: action_type.into(),
            action_inputs: BTreeMap::new(),
        }
    }

    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.action_inputs.insert(key.into(), value.into());
        self
    }

    pub fn input(&self, key: &str) -> Option<&str> {
        self.action_inputs.get(key).map(|s| s.as_str())
    }

    /// Parser could not recover an action from the text
    pub fn is_degraded(&self) -> bool {
        self.action_type.is_empty()
    }

    /// Normalized box for `key`, if present and well-formed
    pub fn box_input(&self, key: &str) -> Option<[f64; 4]> {
        self.input(key).and_then(parse_canonical)
    }
}
