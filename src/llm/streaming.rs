//! Streaming support for model responses.
//!
//! Providers push [`StreamChunk`]s into an mpsc channel while a response is
//! generated. [`StreamAccumulator`] folds those chunks back into a complete
//! [`ModelResponse`] for providers that only report content through deltas.

use std::collections::BTreeMap;

use serde_json::Value;
use tokio::sync::mpsc;

use super::types::{FinishReason, ModelResponse, ToolCallRequest};

/// Incremental piece of a streamed response
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// Text being generated
    TextDelta(String),
    /// Tool call fragment; `id`/`name` arrive on the first fragment only
    ToolCallDelta {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments_delta: String,
    },
    /// Response complete
    Done { finish_reason: FinishReason },
    /// Error during streaming
    Error(String),
}

/// Handle for receiving streaming chunks.
pub struct StreamHandle {
    pub receiver: mpsc::Receiver<StreamChunk>,
}

impl StreamHandle {
    pub fn new(receiver: mpsc::Receiver<StreamChunk>) -> Self {
        Self { receiver }
    }

    pub async fn recv(&mut self) -> Option<StreamChunk> {
        self.receiver.recv().await
    }

    /// Collect all text from the stream into a single string.
    pub async fn collect_text(&mut self) -> String {
        let mut text = String::new();
        while let Some(chunk) = self.recv().await {
            match chunk {
                StreamChunk::TextDelta(t) => text.push_str(&t),
                StreamChunk::Done { .. } | StreamChunk::Error(_) => break,
                _ => {}
            }
        }
        text
    }
}

/// Builder for stream handle pairs (sender and handle).
pub fn create_stream_channel(buffer_size: usize) -> (mpsc::Sender<StreamChunk>, StreamHandle) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (tx, StreamHandle::new(rx))
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Folds stream chunks into a complete response.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    text: String,
    tool_calls: BTreeMap<usize, PartialToolCall>,
    finish_reason: Option<FinishReason>,
    error: Option<String>,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &StreamChunk) {
        match chunk {
            StreamChunk::TextDelta(t) => self.text.push_str(t),
            StreamChunk::ToolCallDelta {
                index,
                id,
                name,
                arguments_delta,
            } => {
                let entry = self.tool_calls.entry(*index).or_default();
                if id.is_some() {
                    entry.id = id.clone();
                }
                if name.is_some() {
                    entry.name = name.clone();
                }
                entry.arguments.push_str(arguments_delta);
            }
            StreamChunk::Done { finish_reason } => self.finish_reason = Some(*finish_reason),
            StreamChunk::Error(e) => self.error = Some(e.clone()),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Assemble the response seen so far
    pub fn finish(self) -> ModelResponse {
        let tool_calls: Vec<ToolCallRequest> = self
            .tool_calls
            .into_iter()
            .filter_map(|(index, partial)| {
                let name = partial.name?;
                let arguments = if partial.arguments.trim().is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(&partial.arguments).unwrap_or(Value::String(partial.arguments))
                };
                let id = partial.id.unwrap_or_else(|| crate::id::generate_call_id(index));
                Some(ToolCallRequest::new(id, name, arguments))
            })
            .collect();

        let finish_reason = self.finish_reason.unwrap_or(if tool_calls.is_empty() {
            FinishReason::Stop
        } else {
            FinishReason::ToolCalls
        });

        ModelResponse {
            content: if self.text.is_empty() { None } else { Some(self.text) },
            tool_calls,
            finish_reason,
            usage: Default::default(),
        }
    }
}
