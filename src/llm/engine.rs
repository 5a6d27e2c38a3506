//! Tool call engines: canonical tool calls to and from a provider's format.
//!
//! [`NativeEngine`] relies on the provider's structured function-calling
//! field. [`PromptEngineeringEngine`] describes tools in the system prompt and
//! extracts calls from the assistant text. The loop only talks to the
//! [`ToolCallEngine`] trait, so conversation history looks the same either way.

use serde::{Deserialize, Serialize};

use super::tool_parser::{extract_tool_calls, format_tool_call};
use super::types::{
    ContentPart, FinishReason, Message, MessageContent, ModelRequest, ModelResponse, ParsedResponse, ToolCallResult,
    ToolSpec,
};
use crate::id::generate_call_id;

/// Text left in place of screenshots dropped from the context window
pub const IMAGE_PLACEHOLDER: &str = "[earlier screenshot omitted]";

/// Strategy selector, fixed for the lifetime of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallEngineKind {
    #[default]
    Native,
    PromptEngineering,
}

impl ToolCallEngineKind {
    /// Build the engine for a fixed set of tools. `reserved` names are left
    /// in the text for the action parser when no tool claims them.
    pub fn build(self, tools: Vec<ToolSpec>, reserved: &'static [&'static str]) -> Box<dyn ToolCallEngine> {
        match self {
            ToolCallEngineKind::Native => Box::new(NativeEngine::new(tools)),
            ToolCallEngineKind::PromptEngineering => {
                Box::new(PromptEngineeringEngine::new(tools).with_reserved(reserved))
            }
        }
    }
}

impl std::str::FromStr for ToolCallEngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "native" => Ok(ToolCallEngineKind::Native),
            "prompt_engineering" => Ok(ToolCallEngineKind::PromptEngineering),
            other => Err(format!("unknown tool call engine: {}", other)),
        }
    }
}

/// Everything an engine needs to build one model request
#[derive(Debug, Clone)]
pub struct RequestContext<'a> {
    pub model: &'a str,
    pub messages: &'a [Message],
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Newest images kept in the request; older ones become a placeholder
    pub max_images: usize,
}

pub trait ToolCallEngine: Send + Sync {
    fn kind(&self) -> ToolCallEngineKind;

    /// System prompt as sent to the model
    fn prepare_prompt(&self, system_prompt: &str) -> String;

    fn prepare_request(&self, ctx: &RequestContext<'_>) -> ModelRequest;

    fn parse_response(&self, response: &ModelResponse) -> ParsedResponse;

    fn build_historical_assistant_message(&self, parsed: &ParsedResponse) -> Message;

    fn build_historical_tool_call_result_messages(&self, results: &[ToolCallResult]) -> Vec<Message>;
}

/// Keep only the newest `max_images` images across `messages`.
pub fn window_images(messages: &[Message], max_images: usize) -> Vec<Message> {
    let total: usize = messages.iter().map(Message::image_count).sum();
    let mut to_drop = total.saturating_sub(max_images);
    if to_drop == 0 {
        return messages.to_vec();
    }

    messages
        .iter()
        .map(|msg| {
            let MessageContent::Parts(parts) = &msg.content else {
                return msg.clone();
            };
            let parts = parts
                .iter()
                .map(|part| match part {
                    ContentPart::Image { .. } if to_drop > 0 => {
                        to_drop -= 1;
                        ContentPart::Text {
                            text: IMAGE_PLACEHOLDER.to_string(),
                        }
                    }
                    other => other.clone(),
                })
                .collect();
            Message {
                content: MessageContent::Parts(parts),
                ..msg.clone()
            }
        })
        .collect()
}

/// Provider has a structured function-calling field
#[derive(Debug, Clone, Default)]
pub struct NativeEngine {
    tools: Vec<ToolSpec>,
}

impl NativeEngine {
    pub fn new(tools: Vec<ToolSpec>) -> Self {
        Self { tools }
    }
}

impl ToolCallEngine for NativeEngine {
    fn kind(&self) -> ToolCallEngineKind {
        ToolCallEngineKind::Native
    }

    fn prepare_prompt(&self, system_prompt: &str) -> String {
        system_prompt.to_string()
    }

    fn prepare_request(&self, ctx: &RequestContext<'_>) -> ModelRequest {
        let tools = if self.tools.is_empty() {
            None
        } else {
            Some(self.tools.iter().map(ToolSpec::to_function_schema).collect())
        };
        ModelRequest {
            model: ctx.model.to_string(),
            messages: window_images(ctx.messages, ctx.max_images),
            tools,
            temperature: ctx.temperature,
            max_tokens: ctx.max_tokens,
        }
    }

    fn parse_response(&self, response: &ModelResponse) -> ParsedResponse {
        let tool_calls = response
            .tool_calls
            .iter()
            .enumerate()
            .map(|(i, call)| {
                let mut call = call.clone();
                if call.call_id.is_empty() {
                    call.call_id = generate_call_id(i);
                }
                call
            })
            .collect();
        ParsedResponse {
            content: response.content.clone().unwrap_or_default(),
            tool_calls,
            finish_reason: response.finish_reason,
        }
    }

    /// Calls are kept only when they will be executed, so every call in
    /// the history has a matching result.
    fn build_historical_assistant_message(&self, parsed: &ParsedResponse) -> Message {
        let tool_calls = if parsed.needs_tool_execution() {
            parsed.tool_calls.clone()
        } else {
            Vec::new()
        };
        Message {
            tool_calls,
            ..Message::assistant(parsed.content.clone())
        }
    }

    fn build_historical_tool_call_result_messages(&self, results: &[ToolCallResult]) -> Vec<Message> {
        results
            .iter()
            .map(|r| {
                let content = if r.is_error {
                    format!("Error: {}", r.content)
                } else {
                    r.content.clone()
                };
                Message::tool_result(&r.call_id, content)
            })
            .collect()
    }
}

/// Provider has no function calling; tools travel inside the prompt text
#[derive(Debug, Clone, Default)]
pub struct PromptEngineeringEngine {
    tools: Vec<ToolSpec>,
    reserved: &'static [&'static str],
}

impl PromptEngineeringEngine {
    pub fn new(tools: Vec<ToolSpec>) -> Self {
        Self { tools, reserved: &[] }
    }

    pub fn with_reserved(mut self, reserved: &'static [&'static str]) -> Self {
        self.reserved = reserved;
        self
    }

    fn tool_section(&self) -> String {
        let mut out = String::from("## Tools\n\nYou can call the following tools:\n");
        for tool in &self.tools {
            out.push_str(&format!("\n### {}\n{}\nParameters (JSON Schema): {}\n", tool.name, tool.description, tool.parameters));
        }
        out.push_str(
            "\nTo call a tool, write a line of the form:\n\
             Action: tool_name(arg='value', other='value')\n\
             Write one call per line and separate multiple calls with a blank line. \
             When you have the final answer, reply without any Action line.\n",
        );
        out
    }
}

impl ToolCallEngine for PromptEngineeringEngine {
    fn kind(&self) -> ToolCallEngineKind {
        ToolCallEngineKind::PromptEngineering
    }

    fn prepare_prompt(&self, system_prompt: &str) -> String {
        if self.tools.is_empty() {
            return system_prompt.to_string();
        }
        if system_prompt.trim().is_empty() {
            return self.tool_section();
        }
        format!("{}\n\n{}", system_prompt.trim_end(), self.tool_section())
    }

    fn prepare_request(&self, ctx: &RequestContext<'_>) -> ModelRequest {
        ModelRequest {
            model: ctx.model.to_string(),
            messages: window_images(ctx.messages, ctx.max_images),
            tools: None,
            temperature: ctx.temperature,
            max_tokens: ctx.max_tokens,
        }
    }

    fn parse_response(&self, response: &ModelResponse) -> ParsedResponse {
        let text = response.content.as_deref().unwrap_or_default();
        let extracted = extract_tool_calls(text, &self.tools, self.reserved);
        let finish_reason = if extracted.calls.is_empty() {
            match response.finish_reason {
                FinishReason::ToolCalls => FinishReason::Stop,
                other => other,
            }
        } else {
            FinishReason::ToolCalls
        };
        ParsedResponse {
            content: extracted.content,
            tool_calls: extracted.calls,
            finish_reason,
        }
    }

    fn build_historical_assistant_message(&self, parsed: &ParsedResponse) -> Message {
        let mut text = parsed.content.clone();
        for call in &parsed.tool_calls {
            if !text.is_empty() {
                text.push_str("\n\n");
            }
            text.push_str(&format_tool_call(call));
        }
        Message::assistant(text)
    }

    fn build_historical_tool_call_result_messages(&self, results: &[ToolCallResult]) -> Vec<Message> {
        if results.is_empty() {
            return Vec::new();
        }
        let blocks: Vec<String> = results
            .iter()
            .map(|r| {
                let error = if r.is_error { " error=\"true\"" } else { "" };
                format!(
                    "<tool_result name=\"{}\" id=\"{}\"{}>\n{}\n</tool_result>",
                    r.tool_name, r.call_id, error, r.content
                )
            })
            .collect();
        vec![Message::user(blocks.join("\n"))]
    }
}
