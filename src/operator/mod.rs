//! Operators - device-facing executors of parsed actions
//!
//! An operator captures screenshots and turns one [`ParsedAction`] into
//! device effects. The denormalization and action mapping in [`dispatch`] is
//! shared; each concrete operator only applies [`DeviceCommand`]s through
//! its backend:
//! - [`DesktopOperator`] over an [`InputDriver`] (pointer and keyboard)
//! - [`BrowserOperator`] over a [`BrowserPage`] (page automation primitives)
//! - [`DryRunOperator`] which only logs

mod browser;
mod desktop;
pub mod dispatch;
mod dry_run;

pub use browser::{BrowserOperator, BrowserPage, browser_key_name};
pub use desktop::{DesktopOperator, InputDriver};
pub use dispatch::{ACTION_NAMES, DeviceCommand, DispatchConfig, HeldKeys, MouseButton, Plan, Point, ScrollDirection, plan_commands, to_pixels};
pub use dry_run::DryRunOperator;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::action::ParsedAction;
use crate::error::OperatorError;

/// Mime type of captured screenshots
pub const SCREENSHOT_MIME: &str = "image/png";

/// A captured screen image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Screenshot {
    pub image_base64: String,
    /// Logical width
    pub width: u32,
    /// Logical height
    pub height: u32,
    /// Physical pixels per logical pixel
    pub scale_factor: f64,
}

/// Screen geometry used to denormalize coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenContext {
    pub width: u32,
    pub height: u32,
    pub scale_factor: f64,
}

impl ScreenContext {
    pub fn new(width: u32, height: u32, scale_factor: f64) -> Self {
        Self {
            width,
            height,
            scale_factor,
        }
    }

    /// Geometry of a screenshot; `scale_override` replaces the reported factor
    pub fn from_screenshot(shot: &Screenshot, scale_override: Option<f64>) -> Self {
        Self::new(shot.width, shot.height, scale_override.unwrap_or(shot.scale_factor))
    }
}

/// Why an action ended the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", content = "message", rename_all = "snake_case")]
pub enum StopSignal {
    /// Task complete; carries the final answer text
    Finished(String),
    /// The model needs the user
    CallUser,
    /// The model reported it cannot continue
    Error(String),
}

/// What the loop should do after an action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecuteOutcome {
    Continue,
    Stop(StopSignal),
}

impl ExecuteOutcome {
    pub fn is_stop(&self) -> bool {
        matches!(self, ExecuteOutcome::Stop(_))
    }
}

/// Device or browser executor, exclusively owned by one session.
#[async_trait]
pub trait Operator: Send + Sync {
    async fn screenshot(&self) -> Result<Screenshot, OperatorError>;

    async fn execute(&self, action: &ParsedAction, ctx: &ScreenContext) -> Result<ExecuteOutcome, OperatorError>;

    /// Called once with the final answer of a finished run
    async fn final_answer(&self, _text: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_screen_context_from_screenshot() {
        let shot = Screenshot {
            image_base64: String::new(),
            width: 1280,
            height: 800,
            scale_factor: 2.0,
        };
        assert_eq!(ScreenContext::from_screenshot(&shot, None).scale_factor, 2.0);
        let ctx = ScreenContext::from_screenshot(&shot, Some(1.0));
        assert_eq!(ctx, ScreenContext::new(1280, 800, 1.0));
    }

    #[test]
    fn test_stop_signal_serde() {
        let json = serde_json::to_value(StopSignal::Finished("done".to_string())).unwrap();
        assert_eq!(json["signal"], "finished");
        assert_eq!(json["message"], "done");
        assert!(ExecuteOutcome::Stop(StopSignal::CallUser).is_stop());
        assert!(!ExecuteOutcome::Continue.is_stop());
    }
}
