//! Actloop - a model-driven action loop
//!
//! A language model is asked what to do next; its reply is turned into tool
//! calls or device actions, those are executed, and the results are fed back
//! until the model produces a final answer or the iteration limit is hit.

pub mod action;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod id;
pub mod llm;
pub mod operator;
pub mod runner;
pub mod tools;

pub use action::{ActionFormat, ParseOptions, ParsedAction, parse_action_text};
pub use config::Config;
pub use coordinator::{ResolvedModel, RunCoordinator, RunHandle, RunOptions, RunResult, RunStream};
pub use error::{ActloopError, OperatorError, ProviderError, Result};
pub use events::{Event, EventKind, EventLog};
pub use runner::{RunSession, SessionStatus};
pub use tools::{ToolDefinition, ToolRegistry};
