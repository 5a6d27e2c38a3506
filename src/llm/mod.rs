//! Model layer - provider capability, message types and tool call engines
//!
//! This module provides:
//! - Message, request and response types
//! - ModelProvider trait and a scripted implementation
//! - Streaming chunks and accumulation
//! - Native and prompt-engineering tool call engines

pub mod client;
pub mod engine;
pub mod streaming;
pub mod tool_parser;
pub mod types;

pub use client::{ModelProvider, ScriptStep, ScriptedProvider, ScriptedToolCall, ScriptedTurn};
pub use engine::{
    IMAGE_PLACEHOLDER, NativeEngine, PromptEngineeringEngine, RequestContext, ToolCallEngine, ToolCallEngineKind,
    window_images,
};
pub use streaming::{StreamAccumulator, StreamChunk, StreamHandle, create_stream_channel};
pub use tool_parser::{ExtractedCalls, extract_tool_calls, format_tool_call};
pub use types::{
    ContentPart, FinishReason, Message, MessageContent, ModelRequest, ModelResponse, ParsedResponse, Role,
    ToolCallRequest, ToolCallResult, ToolSpec, Usage,
};
