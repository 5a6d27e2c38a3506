//! Run coordinator - the public entry point for running the loop.
//!
//! Resolves the provider and model for a run, builds the loop executor and
//! drives one session, either buffered (`run`) or as a spawned task whose
//! events are delivered over a channel (`run_streaming`).

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use log::{debug, info};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, RetryConfig};
use crate::error::{ActloopError, Result};
use crate::events::{Event, EventLog};
use crate::llm::{ModelProvider, ToolCallEngineKind};
use crate::operator::Operator;
use crate::runner::{LoopConfig, LoopExecutor, RunSession, SessionStatus};
use crate::tools::ToolRegistry;

/// Provider and model a run talks to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModel {
    pub provider: String,
    pub model: String,
}

/// Per-run overrides of the configured defaults
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub max_iterations: Option<u32>,
    pub retry: Option<RetryConfig>,
    pub tool_call_engine: Option<ToolCallEngineKind>,
    pub screenshot_scale_factor: Option<f64>,
    /// Content deltas for buffered runs; `run_streaming` always emits them
    pub streaming: Option<bool>,
    pub system_prompt: Option<String>,
    /// Cancellation signal for the session; a fresh one is created when absent
    pub cancel: Option<CancellationToken>,
}

/// Everything a finished run produced
#[derive(Debug, Clone)]
pub struct RunResult {
    pub session_id: String,
    pub status: SessionStatus,
    pub final_answer: Option<String>,
    pub error: Option<String>,
    pub iterations: u32,
    pub events: Vec<Event>,
}

pub struct RunCoordinator {
    config: Config,
    providers: HashMap<String, Arc<dyn ModelProvider>>,
}

impl RunCoordinator {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            providers: HashMap::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Register a provider under `name`, replacing any previous one.
    pub fn register_provider(&mut self, name: impl Into<String>, provider: Arc<dyn ModelProvider>) {
        let name = name.into();
        debug!("Registering provider: {}", name);
        self.providers.insert(name, provider);
    }

    pub fn with_provider(mut self, name: impl Into<String>, provider: Arc<dyn ModelProvider>) -> Self {
        self.register_provider(name, provider);
        self
    }

    /// Resolve the provider/model pair from `options`, falling back to config.
    pub fn resolve_model(&self, options: &RunOptions) -> Result<ResolvedModel> {
        let provider = options
            .provider
            .clone()
            .unwrap_or_else(|| self.config.model.provider.clone());
        let model = options.model.clone().unwrap_or_else(|| self.config.model.name.clone());

        if provider.trim().is_empty() {
            return Err(ActloopError::ModelResolution("no model provider configured".to_string()));
        }
        if model.trim().is_empty() {
            return Err(ActloopError::ModelResolution(format!(
                "no model configured for provider {}",
                provider
            )));
        }
        if !self.providers.contains_key(&provider) {
            return Err(ActloopError::ModelResolution(format!("unknown provider: {}", provider)));
        }
        Ok(ResolvedModel { provider, model })
    }

    fn loop_config(&self, resolved: &ResolvedModel, options: &RunOptions) -> LoopConfig {
        let cfg = &self.config;
        LoopConfig {
            model: resolved.model.clone(),
            system_prompt: options
                .system_prompt
                .clone()
                .unwrap_or_else(|| cfg.agent.system_prompt.clone()),
            temperature: cfg.model.temperature,
            max_tokens: cfg.model.max_tokens,
            max_iterations: options.max_iterations.unwrap_or(cfg.agent.max_iterations),
            streaming: options.streaming.unwrap_or(cfg.agent.streaming),
            loop_interval: Duration::from_millis(cfg.agent.loop_interval_ms),
            retry: options.retry.as_ref().unwrap_or(&cfg.retry).policy(),
            parse_options: cfg.operator.parse_options(),
            screenshot_scale_factor: options
                .screenshot_scale_factor
                .or(cfg.operator.screenshot_scale_factor),
            max_screenshots_in_context: cfg.operator.max_screenshots_in_context,
        }
    }

    /// Resolve everything a session needs. Fails before any event is produced.
    fn prepare(
        &self,
        options: &RunOptions,
        tools: ToolRegistry,
        operator: Option<Box<dyn Operator>>,
    ) -> Result<(LoopExecutor, RunSession)> {
        let resolved = self.resolve_model(options)?;
        let provider = self
            .providers
            .get(&resolved.provider)
            .cloned()
            .ok_or_else(|| ActloopError::ModelResolution(format!("unknown provider: {}", resolved.provider)))?;

        let engine = options.tool_call_engine.unwrap_or(self.config.agent.tool_call_engine);
        let config = self.loop_config(&resolved, options);
        let mut executor = LoopExecutor::new(provider, Arc::new(tools), engine, EventLog::new(), config);
        if let Some(operator) = operator {
            executor = executor.with_operator(operator);
        }

        let cancel = options.cancel.clone().unwrap_or_default();
        let session = RunSession::new(cancel);
        info!(
            "{}: starting run with {}/{} ({:?} engine)",
            session.session_id, resolved.provider, resolved.model, engine
        );
        Ok((executor, session))
    }

    /// Run one session to completion and return its full result.
    pub async fn run(
        &self,
        input: &str,
        options: RunOptions,
        tools: ToolRegistry,
        operator: Option<Box<dyn Operator>>,
    ) -> Result<RunResult> {
        let (mut executor, mut session) = self.prepare(&options, tools, operator)?;
        Ok(drive(&mut executor, &mut session, input).await)
    }

    /// Spawn one session and stream its events as they are appended,
    /// including incremental content deltas.
    ///
    /// The stream ends right after the terminal event (final answer, error
    /// or abort).
    pub fn run_streaming(
        &self,
        input: &str,
        options: RunOptions,
        tools: ToolRegistry,
        operator: Option<Box<dyn Operator>>,
    ) -> Result<RunHandle> {
        let options = RunOptions {
            streaming: Some(true),
            ..options
        };
        let (mut executor, mut session) = self.prepare(&options, tools, operator)?;
        let session_id = session.session_id.clone();
        let cancel = session.cancel.clone();

        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = executor.events().subscribe(move |event| {
            // receiver gone means nobody is listening any more
            let _ = tx.send(event.clone());
        });

        let input = input.to_string();
        let task = tokio::spawn(async move {
            tracing::debug!(session_id = %session.session_id, "Session task started");
            let result = drive(&mut executor, &mut session, &input).await;
            subscription.unsubscribe();
            match result.status {
                SessionStatus::Error => tracing::error!(
                    session_id = %result.session_id,
                    error = result.error.as_deref().unwrap_or(""),
                    "Session failed"
                ),
                status => tracing::info!(
                    session_id = %result.session_id,
                    status = %status,
                    iterations = result.iterations,
                    "Session finished"
                ),
            }
            result
        });

        Ok(RunHandle {
            session_id,
            events: RunStream { rx },
            cancel,
            task,
        })
    }
}

async fn drive(executor: &mut LoopExecutor, session: &mut RunSession, input: &str) -> RunResult {
    let outcome = executor.run(session, input).await;
    RunResult {
        session_id: session.session_id.clone(),
        status: outcome.status,
        final_answer: outcome.final_answer,
        error: outcome.error,
        iterations: outcome.iterations,
        events: executor.events().get_all(),
    }
}

/// Ordered events of one streaming run
pub struct RunStream {
    rx: mpsc::UnboundedReceiver<Event>,
}

impl RunStream {
    /// Next event, or `None` once the run's terminal event has been delivered.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

impl Stream for RunStream {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Handle to a spawned session
pub struct RunHandle {
    pub session_id: String,
    pub events: RunStream,
    cancel: CancellationToken,
    task: JoinHandle<RunResult>,
}

impl RunHandle {
    /// Signal the session to stop. The stream still ends with an abort event.
    pub fn abort(&self) {
        info!("{}: abort requested", self.session_id);
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the session task and return its result.
    pub async fn join(self) -> Result<RunResult> {
        self.task
            .await
            .map_err(|e| ActloopError::InvalidState(format!("session task failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::llm::{ScriptStep, ScriptedProvider};
    use futures::StreamExt;

    fn config() -> Config {
        let mut config = Config::default();
        config.model.provider = "script".to_string();
        config.model.name = "test-model".to_string();
        config.retry.delay_ms = 0;
        config
    }

    fn coordinator(provider: Arc<ScriptedProvider>) -> RunCoordinator {
        RunCoordinator::new(config()).with_provider("script", provider)
    }

    #[test]
    fn test_resolve_model_from_config() {
        let coord = coordinator(Arc::new(ScriptedProvider::new("script")));
        let resolved = coord.resolve_model(&RunOptions::default()).unwrap();
        assert_eq!(
            resolved,
            ResolvedModel {
                provider: "script".to_string(),
                model: "test-model".to_string()
            }
        );
    }

    #[test]
    fn test_resolve_model_options_override() {
        let coord = coordinator(Arc::new(ScriptedProvider::new("script")));
        let options = RunOptions {
            model: Some("other".to_string()),
            ..Default::default()
        };
        assert_eq!(coord.resolve_model(&options).unwrap().model, "other");
    }

    #[test]
    fn test_resolve_model_rejects_empty_and_unknown() {
        let coord = coordinator(Arc::new(ScriptedProvider::new("script")));
        let empty = RunOptions {
            model: Some(String::new()),
            ..Default::default()
        };
        assert!(matches!(coord.resolve_model(&empty), Err(ActloopError::ModelResolution(_))));

        let unknown = RunOptions {
            provider: Some("missing".to_string()),
            ..Default::default()
        };
        let err = coord.resolve_model(&unknown).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[tokio::test]
    async fn test_run_fails_fast_without_model() {
        let provider = Arc::new(ScriptedProvider::new("script"));
        provider.push_text("unused");
        let coord = RunCoordinator::new(Config::default()).with_provider("script", provider.clone());
        let err = coord
            .run("hi", RunOptions::default(), ToolRegistry::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ActloopError::ModelResolution(_)));
        assert_eq!(provider.request_count(), 0);
    }

    #[tokio::test]
    async fn test_buffered_run() {
        let provider = Arc::new(ScriptedProvider::new("script"));
        provider.push_text("42");
        let coord = coordinator(provider);
        let result = coord
            .run("answer?", RunOptions::default(), ToolRegistry::new(), None)
            .await
            .unwrap();
        assert_eq!(result.status, SessionStatus::Done);
        assert_eq!(result.final_answer.as_deref(), Some("42"));
        assert_eq!(result.events.len(), 2);
        assert!(result.session_id.starts_with("run-"));
    }

    #[tokio::test]
    async fn test_streaming_run_ends_with_terminal_event() {
        let provider = Arc::new(ScriptedProvider::new("script"));
        provider.push_text("streamed answer");
        let coord = coordinator(provider);
        let options = RunOptions {
            streaming: Some(true),
            ..Default::default()
        };
        let mut handle = coord.run_streaming("go", options, ToolRegistry::new(), None).unwrap();

        let mut seen = Vec::new();
        while let Some(event) = handle.events.next().await {
            seen.push(event);
        }
        assert_eq!(seen.first().map(|e| e.kind), Some(EventKind::UserInput));
        assert!(seen.iter().any(|e| e.kind == EventKind::StreamDelta));
        assert!(seen.last().unwrap().is_final_answer());

        let result = handle.join().await.unwrap();
        assert_eq!(result.status, SessionStatus::Done);
        assert_eq!(result.events.len(), seen.len());
    }

    #[tokio::test]
    async fn test_streaming_run_emits_deltas_by_default() {
        let provider = Arc::new(ScriptedProvider::new("script"));
        provider.push_text("two words");
        let mut handle = coordinator(provider)
            .run_streaming("go", RunOptions::default(), ToolRegistry::new(), None)
            .unwrap();

        let mut kinds = Vec::new();
        while let Some(event) = handle.events.recv().await {
            kinds.push(event.kind);
        }
        let deltas = kinds.iter().filter(|k| **k == EventKind::StreamDelta).count();
        assert!(deltas > 0);
        assert_eq!(kinds.last(), Some(&EventKind::AssistantMessage));
        assert_eq!(handle.join().await.unwrap().final_answer.as_deref(), Some("two words"));
    }

    #[tokio::test]
    async fn test_buffered_run_follows_config_streaming() {
        let provider = Arc::new(ScriptedProvider::new("script"));
        provider.push_text("quiet answer");
        let result = coordinator(provider)
            .run("go", RunOptions::default(), ToolRegistry::new(), None)
            .await
            .unwrap();
        assert!(result.events.iter().all(|e| e.kind != EventKind::StreamDelta));
    }

    #[tokio::test]
    async fn test_streaming_abort_closes_with_marker() {
        let provider = Arc::new(ScriptedProvider::from_steps("script", [ScriptStep::Hang]));
        let coord = coordinator(provider);
        let mut handle = coord
            .run_streaming("wait", RunOptions::default(), ToolRegistry::new(), None)
            .unwrap();

        let first = handle.events.recv().await.unwrap();
        assert_eq!(first.kind, EventKind::UserInput);
        handle.abort();

        let mut last = None;
        while let Some(event) = handle.events.recv().await {
            last = Some(event);
        }
        assert_eq!(last.map(|e| e.kind), Some(EventKind::Aborted));
        assert_eq!(handle.join().await.unwrap().status, SessionStatus::Aborted);
    }
}
