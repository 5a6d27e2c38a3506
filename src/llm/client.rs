//! Model provider capability and a scripted implementation.
//!
//! The HTTP transport of a real provider lives outside this crate; callers
//! plug it in by implementing [`ModelProvider`].

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::streaming::StreamChunk;
use super::types::{FinishReason, ModelRequest, ModelResponse, ToolCallRequest};
use crate::error::ProviderError;

/// Opaque model capability: accepts a request, returns or streams a response.
///
/// Implementations must observe `cancel` while waiting on the network.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Provider name used for logging and resolution
    fn name(&self) -> &str;

    /// Single request/response round
    async fn send(&self, request: ModelRequest, cancel: CancellationToken) -> Result<ModelResponse, ProviderError>;

    /// Streaming round. Chunks are pushed to `chunk_tx` as they arrive and the
    /// complete response is returned at the end.
    ///
    /// The default emits the whole content as one delta after `send` returns.
    async fn stream(
        &self,
        request: ModelRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
        cancel: CancellationToken,
    ) -> Result<ModelResponse, ProviderError> {
        let response = self.send(request, cancel).await?;
        if let Some(content) = response.content.as_ref().filter(|c| !c.is_empty()) {
            let _ = chunk_tx.send(StreamChunk::TextDelta(content.clone())).await;
        }
        let _ = chunk_tx
            .send(StreamChunk::Done {
                finish_reason: response.finish_reason,
            })
            .await;
        Ok(response)
    }
}

/// One canned step of a [`ScriptedProvider`]
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Respond(ModelResponse),
    Fail(ProviderError),
    /// Never answers; resolves only when the request is cancelled
    Hang,
}

/// Tool call as written in a YAML script
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptedToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// One model turn as written in a YAML script
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptedTurn {
    pub content: Option<String>,
    pub tool_calls: Vec<ScriptedToolCall>,
    /// Fail this turn with a network error carrying this message
    pub error: Option<String>,
    pub delay_ms: u64,
}

impl ScriptedTurn {
    fn into_step(self, index: usize) -> (ScriptStep, u64) {
        if let Some(message) = self.error {
            return (ScriptStep::Fail(ProviderError::Network(message)), self.delay_ms);
        }
        let response = if self.tool_calls.is_empty() {
            ModelResponse {
                content: self.content,
                ..Default::default()
            }
        } else {
            let calls = self
                .tool_calls
                .into_iter()
                .enumerate()
                .map(|(i, call)| {
                    let arguments = if call.arguments.is_null() {
                        Value::Object(Default::default())
                    } else {
                        call.arguments
                    };
                    ToolCallRequest::new(format!("call_{}_{}", index, i), call.name, arguments)
                })
                .collect();
            ModelResponse::with_tool_calls(self.content, calls)
        };
        (ScriptStep::Respond(response), self.delay_ms)
    }
}

/// Replays canned responses in order. Records every request it receives.
pub struct ScriptedProvider {
    name: String,
    steps: Mutex<VecDeque<(ScriptStep, u64)>>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn from_steps(name: impl Into<String>, steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        let provider = Self::new(name);
        for step in steps {
            provider.push(step);
        }
        provider
    }

    pub fn from_turns(name: impl Into<String>, turns: Vec<ScriptedTurn>) -> Self {
        let provider = Self::new(name);
        {
            let mut steps = provider.steps.lock().unwrap_or_else(PoisonError::into_inner);
            for (i, turn) in turns.into_iter().enumerate() {
                steps.push_back(turn.into_step(i));
            }
        }
        provider
    }

    /// Load turns from a YAML sequence
    pub fn from_yaml(name: impl Into<String>, yaml: &str) -> crate::error::Result<Self> {
        let turns: Vec<ScriptedTurn> = serde_yaml::from_str(yaml)?;
        Ok(Self::from_turns(name, turns))
    }

    pub fn push(&self, step: ScriptStep) {
        self.steps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back((step, 0));
    }

    pub fn push_text(&self, content: impl Into<String>) {
        self.push(ScriptStep::Respond(ModelResponse::text(content)));
    }

    pub fn push_tool_calls(&self, calls: Vec<ToolCallRequest>) {
        self.push(ScriptStep::Respond(ModelResponse::with_tool_calls(None, calls)));
    }

    pub fn remaining(&self) -> usize {
        self.steps.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Requests received so far, oldest first
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    async fn next_step(&self, request: ModelRequest, cancel: &CancellationToken) -> Result<ModelResponse, ProviderError> {
        if cancel.is_cancelled() {
            return Err(ProviderError::Cancelled);
        }
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);

        let next = self.steps.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        let Some((step, delay_ms)) = next else {
            return Err(ProviderError::Exhausted);
        };

        if delay_ms > 0 {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
            }
        }

        match step {
            ScriptStep::Respond(response) => Ok(response),
            ScriptStep::Fail(err) => Err(err),
            ScriptStep::Hang => {
                cancel.cancelled().await;
                Err(ProviderError::Cancelled)
            }
        }
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, request: ModelRequest, cancel: CancellationToken) -> Result<ModelResponse, ProviderError> {
        debug!("{}: send with {} messages", self.name, request.messages.len());
        self.next_step(request, &cancel).await
    }

    async fn stream(
        &self,
        request: ModelRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
        cancel: CancellationToken,
    ) -> Result<ModelResponse, ProviderError> {
        debug!("{}: stream with {} messages", self.name, request.messages.len());
        let response = self.next_step(request, &cancel).await?;

        if let Some(content) = &response.content {
            for word in content.split_inclusive(' ') {
                if cancel.is_cancelled() {
                    return Err(ProviderError::Cancelled);
                }
                let _ = chunk_tx.send(StreamChunk::TextDelta(word.to_string())).await;
            }
        }
        for (index, call) in response.tool_calls.iter().enumerate() {
            let _ = chunk_tx
                .send(StreamChunk::ToolCallDelta {
                    index,
                    id: Some(call.call_id.clone()),
                    name: Some(call.tool_name.clone()),
                    arguments_delta: call.arguments.to_string(),
                })
                .await;
        }
        let finish_reason = if response.tool_calls.is_empty() {
            response.finish_reason
        } else {
            FinishReason::ToolCalls
        };
        let _ = chunk_tx.send(StreamChunk::Done { finish_reason }).await;
        Ok(response)
    }
}
