//! Loop executor - drives one session from user input to a terminal state.
//!
//! Each iteration:
//! 1. Observes the cancellation signal
//! 2. Captures a screenshot when an operator is attached
//! 3. Requests the model (optionally streaming deltas into the event log)
//! 4. Executes requested tool calls, or the parsed device actions
//! 5. Otherwise takes the content as the final answer
//!
//! Hitting `max_iterations` without an answer ends the run with a canned
//! assistant message; that is a normal `done`, not an error.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::retry::{RetryClass, RetryError, RetryPolicy};
use super::session::{RunSession, SessionStatus};
use crate::action::{ParseOptions, ParsedAction, parse_action_text};
use crate::error::{OperatorError, ProviderError};
use crate::events::{EventKind, EventLog};
use crate::llm::{
    Message, ModelProvider, ModelRequest, ModelResponse, ParsedResponse, RequestContext, StreamAccumulator,
    StreamChunk, ToolCallEngine, ToolCallEngineKind, Usage,
};
use crate::operator::{ACTION_NAMES, ExecuteOutcome, Operator, SCREENSHOT_MIME, ScreenContext, StopSignal};
use crate::tools::{ToolRegistry, execute_all};

/// Assistant message appended when the iteration limit is reached
pub const MAX_ITERATIONS_MESSAGE: &str = "I could not complete the task: maximum iterations reached.";

/// Final answer of a run ended by `call_user`
pub const CALL_USER_MESSAGE: &str = "User input required.";

const NO_ACTION_FEEDBACK: &str =
    "No valid action was found in your last reply. Respond with a Thought and a single Action line.";

/// Static settings of one loop
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub model: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub max_iterations: u32,
    pub streaming: bool,
    pub loop_interval: Duration,
    pub retry: RetryPolicy,
    pub parse_options: ParseOptions,
    /// Replaces the scale factor reported by screenshots
    pub screenshot_scale_factor: Option<f64>,
    pub max_screenshots_in_context: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            system_prompt: String::new(),
            temperature: 0.0,
            max_tokens: None,
            max_iterations: 25,
            streaming: false,
            loop_interval: Duration::ZERO,
            retry: RetryPolicy::default(),
            parse_options: ParseOptions::default(),
            screenshot_scale_factor: None,
            max_screenshots_in_context: 5,
        }
    }
}

/// Result of one iteration, as a value rather than control flow
#[derive(Debug, Clone, PartialEq)]
pub enum IterationOutcome {
    /// Tools or device actions ran; request the model again
    Continue,
    FinalAnswer(String),
    Aborted,
    Error(String),
}

/// How a whole run ended
#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutcome {
    pub status: SessionStatus,
    pub final_answer: Option<String>,
    pub error: Option<String>,
    pub iterations: u32,
    pub usage: Usage,
}

/// Drives one session. Owns the operator for the lifetime of the run.
pub struct LoopExecutor {
    provider: Arc<dyn ModelProvider>,
    engine: Box<dyn ToolCallEngine>,
    tools: Arc<ToolRegistry>,
    operator: Option<Box<dyn Operator>>,
    events: EventLog,
    config: LoopConfig,
    history: Vec<Message>,
    usage: Usage,
}

impl LoopExecutor {
    pub fn new(
        provider: Arc<dyn ModelProvider>,
        tools: Arc<ToolRegistry>,
        engine: ToolCallEngineKind,
        events: EventLog,
        config: LoopConfig,
    ) -> Self {
        let engine = engine.build(tools.specs(), &[]);
        Self {
            provider,
            engine,
            tools,
            operator: None,
            events,
            config,
            history: Vec::new(),
            usage: Usage::default(),
        }
    }

    /// Attach an operator. Device action names stop counting as tool calls.
    pub fn with_operator(mut self, operator: Box<dyn Operator>) -> Self {
        self.engine = self.engine.kind().build(self.tools.specs(), ACTION_NAMES);
        self.operator = Some(operator);
        self
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Conversation history as last sent to the model
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Run until a final answer, abort, error, or the iteration limit.
    pub async fn run(&mut self, session: &mut RunSession, input: &str) -> LoopOutcome {
        if session.is_cancelled() {
            info!("{}: cancelled before start", session.session_id);
            self.events.append(EventKind::Aborted, json!({"reason": "cancelled", "iteration": 0}));
            session.transition(SessionStatus::Aborted);
            return self.outcome(session, None, None);
        }

        session.transition(SessionStatus::Executing);
        self.events.append(EventKind::UserInput, json!({"content": input}));

        self.history.clear();
        let system = self.engine.prepare_prompt(&self.config.system_prompt);
        if !system.trim().is_empty() {
            self.history.push(Message::system(system));
        }
        self.history.push(Message::user(input));

        loop {
            if session.is_cancelled() {
                return self.abort(session);
            }
            if session.current_iteration >= self.config.max_iterations {
                info!(
                    "{}: maximum iterations ({}) reached",
                    session.session_id, self.config.max_iterations
                );
                self.events.append(
                    EventKind::AssistantMessage,
                    json!({"content": MAX_ITERATIONS_MESSAGE, "final": true, "forced": true}),
                );
                session.transition(SessionStatus::Done);
                return self.outcome(session, Some(MAX_ITERATIONS_MESSAGE.to_string()), None);
            }

            session.current_iteration += 1;
            debug!("{}: iteration {}", session.session_id, session.current_iteration);

            match self.step(session).await {
                IterationOutcome::Continue => {
                    if !self.config.loop_interval.is_zero() {
                        tokio::select! {
                            _ = session.cancel.cancelled() => {}
                            _ = tokio::time::sleep(self.config.loop_interval) => {}
                        }
                    }
                }
                IterationOutcome::FinalAnswer(text) => {
                    self.events
                        .append(EventKind::AssistantMessage, json!({"content": text, "final": true}));
                    if let Some(operator) = &self.operator {
                        operator.final_answer(&text).await;
                    }
                    session.transition(SessionStatus::Done);
                    info!("{}: done after {} iteration(s)", session.session_id, session.current_iteration);
                    return self.outcome(session, Some(text), None);
                }
                IterationOutcome::Aborted => return self.abort(session),
                IterationOutcome::Error(message) => {
                    warn!("{}: {}", session.session_id, message);
                    self.events.append(EventKind::Error, json!({"message": message}));
                    session.transition(SessionStatus::Error);
                    return self.outcome(session, None, Some(message));
                }
            }
        }
    }

    fn abort(&self, session: &mut RunSession) -> LoopOutcome {
        info!("{}: aborted at iteration {}", session.session_id, session.current_iteration);
        self.events.append(
            EventKind::Aborted,
            json!({"reason": "cancelled", "iteration": session.current_iteration}),
        );
        session.transition(SessionStatus::Aborted);
        self.outcome(session, None, None)
    }

    fn outcome(&self, session: &RunSession, final_answer: Option<String>, error: Option<String>) -> LoopOutcome {
        LoopOutcome {
            status: session.status(),
            final_answer,
            error,
            iterations: session.current_iteration,
            usage: self.usage,
        }
    }

    async fn step(&mut self, session: &RunSession) -> IterationOutcome {
        let cancel = session.cancel.clone();

        let screen = match self.capture(session).await {
            Ok(screen) => screen,
            Err(outcome) => return outcome,
        };

        let request = self.engine.prepare_request(&RequestContext {
            model: &self.config.model,
            messages: &self.history,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            max_images: self.config.max_screenshots_in_context,
        });

        let provider = self.provider.clone();
        let events = self.events.clone();
        let streaming = self.config.streaming;
        let response = self
            .config
            .retry
            .run(RetryClass::Model, &cancel, ProviderError::is_retryable, |_| {
                call_model(provider.clone(), events.clone(), streaming, request.clone(), cancel.clone())
            })
            .await;

        let response = match response {
            Ok(response) => response,
            Err(RetryError::Aborted) => return IterationOutcome::Aborted,
            Err(err @ RetryError::Exhausted { .. }) => return IterationOutcome::Error(err.to_string()),
        };
        if cancel.is_cancelled() {
            return IterationOutcome::Aborted;
        }
        self.usage.add(&response.usage);

        let parsed = self.engine.parse_response(&response);
        self.history.push(self.engine.build_historical_assistant_message(&parsed));

        if parsed.needs_tool_execution() {
            return self.run_tools(&parsed, &cancel).await;
        }

        match screen {
            Some(ctx) => self.run_actions(&parsed.content, &ctx, &cancel).await,
            None => IterationOutcome::FinalAnswer(parsed.content),
        }
    }

    /// Screenshot for this iteration, added to the history as a user image.
    async fn capture(&mut self, session: &RunSession) -> Result<Option<ScreenContext>, IterationOutcome> {
        let Some(operator) = self.operator.as_deref() else {
            return Ok(None);
        };

        let shot = self
            .config
            .retry
            .run(RetryClass::Screenshot, &session.cancel, |_: &OperatorError| true, |_| operator.screenshot())
            .await
            .map_err(|err| match err {
                RetryError::Aborted => IterationOutcome::Aborted,
                other => IterationOutcome::Error(other.to_string()),
            })?;

        let ctx = ScreenContext::from_screenshot(&shot, self.config.screenshot_scale_factor);
        self.events.append(
            EventKind::Screenshot,
            json!({
                "iteration": session.current_iteration,
                "width": shot.width,
                "height": shot.height,
                "scale_factor": ctx.scale_factor,
            }),
        );
        self.history
            .push(Message::user_with_image("", shot.image_base64, SCREENSHOT_MIME));
        Ok(Some(ctx))
    }

    async fn run_tools(&mut self, parsed: &ParsedResponse, cancel: &CancellationToken) -> IterationOutcome {
        if !parsed.content.trim().is_empty() {
            self.events.append(
                EventKind::AssistantMessage,
                json!({"content": parsed.content, "final": false}),
            );
        }
        for call in &parsed.tool_calls {
            self.events.append(
                EventKind::ToolCallRequest,
                json!({
                    "call_id": call.call_id,
                    "tool_name": call.tool_name,
                    "arguments": call.arguments,
                }),
            );
        }

        let results = execute_all(&self.tools, &parsed.tool_calls, cancel).await;

        for result in &results {
            self.events.append(
                EventKind::ToolCallResult,
                json!({
                    "call_id": result.call_id,
                    "tool_name": result.tool_name,
                    "content": result.content,
                    "is_error": result.is_error,
                }),
            );
        }
        self.history
            .extend(self.engine.build_historical_tool_call_result_messages(&results));

        if cancel.is_cancelled() {
            IterationOutcome::Aborted
        } else {
            IterationOutcome::Continue
        }
    }

    async fn run_actions(&mut self, content: &str, ctx: &ScreenContext, cancel: &CancellationToken) -> IterationOutcome {
        let actions = parse_action_text(content, &self.config.parse_options);

        if actions.iter().all(ParsedAction::is_degraded) {
            warn!("No action could be parsed from model output");
            self.events.append(
                EventKind::System,
                json!({"message": "no action could be parsed from the model output", "content": content}),
            );
            self.history.push(Message::user(NO_ACTION_FEEDBACK));
            return IterationOutcome::Continue;
        }

        let Some(operator) = self.operator.as_deref() else {
            return IterationOutcome::FinalAnswer(content.to_string());
        };

        for action in actions.iter().filter(|a| !a.is_degraded()) {
            self.events.append(
                EventKind::Action,
                json!({
                    "action_type": action.action_type,
                    "action_inputs": action.action_inputs,
                    "thought": action.thought,
                    "reflection": action.reflection,
                }),
            );

            let result = self
                .config
                .retry
                .run(
                    RetryClass::Execute,
                    cancel,
                    |e: &OperatorError| !matches!(e, OperatorError::InvalidAction(_)),
                    |_| operator.execute(action, ctx),
                )
                .await;

            match result {
                Ok(ExecuteOutcome::Continue) => {}
                Ok(ExecuteOutcome::Stop(StopSignal::Finished(text))) => {
                    let answer = if text.trim().is_empty() { action.thought.clone() } else { text };
                    return IterationOutcome::FinalAnswer(answer);
                }
                Ok(ExecuteOutcome::Stop(StopSignal::CallUser)) => {
                    return IterationOutcome::FinalAnswer(CALL_USER_MESSAGE.to_string());
                }
                Ok(ExecuteOutcome::Stop(StopSignal::Error(message))) => return IterationOutcome::Error(message),
                Err(RetryError::Aborted) => return IterationOutcome::Aborted,
                Err(RetryError::Exhausted {
                    last: OperatorError::InvalidAction(msg),
                    ..
                }) => {
                    warn!("Skipping invalid action {}: {}", action.action_type, msg);
                    self.events.append(
                        EventKind::System,
                        json!({"message": format!("invalid action: {}", msg), "action_type": action.action_type}),
                    );
                    self.history
                        .push(Message::user(format!("The action `{}` was invalid: {}", action.action_type, msg)));
                }
                Err(err) => return IterationOutcome::Error(err.to_string()),
            }
        }

        if cancel.is_cancelled() {
            IterationOutcome::Aborted
        } else {
            IterationOutcome::Continue
        }
    }
}

/// One model round. Streaming deltas are appended as they arrive, never
/// after cancellation has been observed.
async fn call_model(
    provider: Arc<dyn ModelProvider>,
    events: EventLog,
    streaming: bool,
    request: ModelRequest,
    cancel: CancellationToken,
) -> Result<ModelResponse, ProviderError> {
    if !streaming {
        return provider.send(request, cancel).await;
    }

    let (tx, mut rx) = mpsc::channel::<StreamChunk>(64);
    let forward = async {
        let mut acc = StreamAccumulator::new();
        while let Some(chunk) = rx.recv().await {
            if let StreamChunk::TextDelta(delta) = &chunk {
                if !cancel.is_cancelled() {
                    events.append(EventKind::StreamDelta, json!({"delta": delta}));
                }
            }
            acc.push(&chunk);
        }
        acc
    };
    let (result, acc) = tokio::join!(provider.stream(request, tx, cancel.clone()), forward);

    let mut response = result?;
    if let Some(err) = acc.error() {
        return Err(ProviderError::Stream(err.to_string()));
    }
    if response.content.is_none() && !acc.text().is_empty() {
        response.content = Some(acc.text().to_string());
    }
    Ok(response)
}
