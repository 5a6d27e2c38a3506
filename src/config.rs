use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::action::{ActionFormat, ParseOptions};
use crate::error::{ActloopError, Result};
use crate::llm::ToolCallEngineKind;
use crate::operator::DispatchConfig;
use crate::runner::RetryPolicy;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an agent that completes the user's task step by step. \
Think before each step, use the available tools or device actions, and reply with the final answer when done.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub model: ModelConfig,
    pub agent: AgentConfig,
    pub retry: RetryConfig,
    pub operator: OperatorConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub provider: String,
    pub name: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub max_iterations: u32,
    pub tool_call_engine: ToolCallEngineKind,
    pub system_prompt: String,
    pub streaming: bool,
    pub loop_interval_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 25,
            tool_call_engine: ToolCallEngineKind::Native,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            streaming: false,
            loop_interval_ms: 0,
        }
    }
}

/// Additional attempts after the first, per failure class
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub model: u32,
    pub screenshot: u32,
    pub execute: u32,
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            model: 3,
            screenshot: 5,
            execute: 1,
            delay_ms: 200,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            model: self.model,
            screenshot: self.screenshot,
            execute: self.execute,
            delay: Duration::from_millis(self.delay_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    pub screenshot_scale_factor: Option<f64>,
    pub action_format: ActionFormat,
    /// `[width, height]` grid the model's coordinates are expressed on
    pub coordinate_factors: Option<[f64; 2]>,
    pub max_screenshots_in_context: usize,
    pub wait_ms: u64,
    pub scroll_amount: u32,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            screenshot_scale_factor: None,
            action_format: ActionFormat::Bc,
            coordinate_factors: None,
            max_screenshots_in_context: 5,
            wait_ms: 5000,
            scroll_amount: 5,
        }
    }
}

impl OperatorConfig {
    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            factors: self.coordinate_factors.map(|[w, h]| (w, h)),
            mode: self.action_format,
        }
    }

    pub fn dispatch(&self) -> DispatchConfig {
        DispatchConfig {
            wait: Duration::from_millis(self.wait_ms),
            scroll_amount: self.scroll_amount,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            model: ModelConfig::default(),
            agent: AgentConfig::default(),
            retry: RetryConfig::default(),
            operator: OperatorConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        let project_name = env!("CARGO_PKG_NAME");

        // Primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => warn!("Failed to load config from {}: {}", primary_config.display(), e),
                }
            }
        }

        // Fallback location: ./<project>.yml
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => warn!("Failed to load config from {}: {}", fallback_config.display(), e),
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| ActloopError::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let config = Self::from_yaml(&content)
            .map_err(|e| ActloopError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        info!("Loaded config from: {}", path.display());
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Reject values the loop cannot run with
    pub fn validate(&self) -> Result<()> {
        if let Some(scale) = self.operator.screenshot_scale_factor {
            if !(scale.is_finite() && scale > 0.0) {
                return Err(ActloopError::Config(format!(
                    "operator.screenshot_scale_factor must be positive, got {}",
                    scale
                )));
            }
        }
        if let Some([w, h]) = self.operator.coordinate_factors {
            if !(w > 0.0 && h > 0.0) {
                return Err(ActloopError::Config(format!(
                    "operator.coordinate_factors must be positive, got [{}, {}]",
                    w, h
                )));
            }
        }
        if !(0.0..=2.0).contains(&self.model.temperature) {
            return Err(ActloopError::Config(format!(
                "model.temperature must be within 0..=2, got {}",
                self.model.temperature
            )));
        }
        Ok(())
    }
}
