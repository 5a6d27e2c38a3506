//! Operator that logs device commands instead of touching a device

use std::sync::Mutex;

use async_trait::async_trait;
use log::info;

use super::dispatch::{DeviceCommand, DispatchConfig, plan_commands};
use super::{ExecuteOutcome, Operator, ScreenContext, Screenshot};
use crate::action::ParsedAction;
use crate::error::OperatorError;

/// 1x1 transparent PNG
const BLANK_PNG_BASE64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

pub struct DryRunOperator {
    width: u32,
    height: u32,
    scale_factor: f64,
    config: DispatchConfig,
    commands: Mutex<Vec<DeviceCommand>>,
    final_answer: Mutex<Option<String>>,
}

impl DryRunOperator {
    pub fn new(width: u32, height: u32, scale_factor: f64, config: DispatchConfig) -> Self {
        Self {
            width,
            height,
            scale_factor,
            config,
            commands: Mutex::new(Vec::new()),
            final_answer: Mutex::new(None),
        }
    }

    /// Commands issued so far, in order
    pub fn commands(&self) -> Vec<DeviceCommand> {
        self.commands.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn final_answer_text(&self) -> Option<String> {
        self.final_answer.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Operator for DryRunOperator {
    async fn screenshot(&self) -> Result<Screenshot, OperatorError> {
        Ok(Screenshot {
            image_base64: BLANK_PNG_BASE64.to_string(),
            width: self.width,
            height: self.height,
            scale_factor: self.scale_factor,
        })
    }

    async fn execute(&self, action: &ParsedAction, ctx: &ScreenContext) -> Result<ExecuteOutcome, OperatorError> {
        let plan = plan_commands(action, ctx, &self.config)?;
        let mut commands = self.commands.lock().unwrap_or_else(|e| e.into_inner());
        for command in plan.commands {
            info!("dry-run: {:?}", command);
            commands.push(command);
        }
        Ok(plan.outcome)
    }

    async fn final_answer(&self, text: &str) {
        *self.final_answer.lock().unwrap_or_else(|e| e.into_inner()) = Some(text.to_string());
    }
}
