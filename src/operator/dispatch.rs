//! Shared action dispatch: normalized action to ordered device commands.
//!
//! Pixel coordinates are `x_norm * width * scale_factor` (same for y) and
//! are rounded only here.

use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

use super::{ExecuteOutcome, ScreenContext, StopSignal};
use crate::action::{ParsedAction, box_center};
use crate::error::OperatorError;

/// Marker the model appends to typed text to request a submit
const SUBMIT_MARKER: &str = "\\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

impl std::str::FromStr for ScrollDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "up" => Ok(ScrollDirection::Up),
            "down" => Ok(ScrollDirection::Down),
            "left" => Ok(ScrollDirection::Left),
            "right" => Ok(ScrollDirection::Right),
            other => Err(format!("unknown scroll direction: {}", other)),
        }
    }
}

/// Physical pixel position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

/// One primitive device effect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum DeviceCommand {
    MoveTo { to: Point },
    Click { button: MouseButton, count: u8 },
    Drag { from: Point, to: Point },
    TypeText { text: String },
    KeyPress { key: String },
    KeyDown { key: String },
    KeyUp { key: String },
    Scroll { direction: ScrollDirection, amount: u32 },
    Wait { millis: u64 },
    Screenshot,
    CursorPosition,
}

/// Keys pressed by a plan that have not been released yet
#[derive(Debug, Default)]
pub struct HeldKeys(Vec<String>);

impl HeldKeys {
    /// Record a command that was applied successfully
    pub fn track(&mut self, command: &DeviceCommand) {
        match command {
            DeviceCommand::KeyDown { key } => self.0.push(key.clone()),
            DeviceCommand::KeyUp { key } => {
                if let Some(pos) = self.0.iter().rposition(|k| k == key) {
                    self.0.remove(pos);
                }
            }
            _ => {}
        }
    }

    /// Held keys, most recent first
    pub fn release_order(&mut self) -> Vec<String> {
        let mut keys = std::mem::take(&mut self.0);
        keys.reverse();
        keys
    }
}

/// Fixed effects of the no-pointer actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    pub wait: Duration,
    pub scroll_amount: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            wait: Duration::from_millis(5000),
            scroll_amount: 5,
        }
    }
}

/// Commands to apply in order, and what the loop does afterwards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub commands: Vec<DeviceCommand>,
    pub outcome: ExecuteOutcome,
}

impl Plan {
    fn run(commands: Vec<DeviceCommand>) -> Self {
        Self {
            commands,
            outcome: ExecuteOutcome::Continue,
        }
    }

    fn stop(signal: StopSignal) -> Self {
        Self {
            commands: Vec::new(),
            outcome: ExecuteOutcome::Stop(signal),
        }
    }
}

/// Normalized coordinate to physical pixels
pub fn to_pixels(x_norm: f64, y_norm: f64, ctx: &ScreenContext) -> Point {
    Point {
        x: (x_norm * ctx.width as f64 * ctx.scale_factor).round() as i32,
        y: (y_norm * ctx.height as f64 * ctx.scale_factor).round() as i32,
    }
}

fn box_point(action: &ParsedAction, key: &str, ctx: &ScreenContext) -> Result<Point, OperatorError> {
    let coords = action
        .box_input(key)
        .ok_or_else(|| OperatorError::InvalidAction(format!("{} requires {}", action.action_type, key)))?;
    let (cx, cy) = box_center(&coords);
    Ok(to_pixels(cx, cy, ctx))
}

fn text_input(action: &ParsedAction) -> String {
    action
        .input("content")
        .or_else(|| action.input("text"))
        .unwrap_or_default()
        .to_string()
}

/// Split a trailing submit marker (literal `\n` or a real newline) off `text`
fn split_submit(text: &str) -> (&str, bool) {
    if let Some(stripped) = text.strip_suffix(SUBMIT_MARKER) {
        return (stripped, true);
    }
    if let Some(stripped) = text.strip_suffix('\n') {
        return (stripped.strip_suffix('\r').unwrap_or(stripped), true);
    }
    (text, false)
}

fn hotkey_keys(action: &ParsedAction) -> Vec<String> {
    action
        .input("key")
        .or_else(|| action.input("hotkey"))
        .or_else(|| action.input("content"))
        .unwrap_or_default()
        .split(|c: char| c.is_whitespace() || c == '+')
        .filter(|k| !k.is_empty())
        .map(|k| k.to_lowercase())
        .collect()
}

fn click(action: &ParsedAction, ctx: &ScreenContext, button: MouseButton, count: u8) -> Result<Plan, OperatorError> {
    let to = box_point(action, "start_box", ctx)?;
    Ok(Plan::run(vec![DeviceCommand::MoveTo { to }, DeviceCommand::Click { button, count }]))
}

/// Action types [`plan_commands`] understands
pub const ACTION_NAMES: &[&str] = &[
    "click",
    "left_click",
    "left_single",
    "double_click",
    "left_double",
    "right_click",
    "right_single",
    "drag",
    "left_click_drag",
    "select",
    "type",
    "hotkey",
    "press",
    "scroll",
    "wait",
    "screenshot",
    "cursor_position",
    "finished",
    "call_user",
    "error",
    "error_env",
];

/// Map one action to device commands.
///
/// Unknown action types are logged and planned as a no-op.
pub fn plan_commands(action: &ParsedAction, ctx: &ScreenContext, cfg: &DispatchConfig) -> Result<Plan, OperatorError> {
    match action.action_type.as_str() {
        "click" | "left_click" | "left_single" => click(action, ctx, MouseButton::Left, 1),
        "double_click" | "left_double" => click(action, ctx, MouseButton::Left, 2),
        "right_click" | "right_single" => click(action, ctx, MouseButton::Right, 1),
        "drag" | "left_click_drag" | "select" => {
            let from = box_point(action, "start_box", ctx)?;
            let to = box_point(action, "end_box", ctx)?;
            Ok(Plan::run(vec![DeviceCommand::MoveTo { to: from }, DeviceCommand::Drag { from, to }]))
        }
        "type" => {
            let content = text_input(action);
            let (text, submit) = split_submit(&content);
            let mut commands = Vec::new();
            if !text.is_empty() {
                commands.push(DeviceCommand::TypeText { text: text.to_string() });
            }
            if submit {
                commands.push(DeviceCommand::KeyPress {
                    key: "enter".to_string(),
                });
            }
            Ok(Plan::run(commands))
        }
        "hotkey" => {
            let keys = hotkey_keys(action);
            if keys.is_empty() {
                return Err(OperatorError::InvalidAction("hotkey requires key".to_string()));
            }
            let mut commands: Vec<DeviceCommand> =
                keys.iter().map(|k| DeviceCommand::KeyDown { key: k.clone() }).collect();
            commands.extend(keys.iter().rev().map(|k| DeviceCommand::KeyUp { key: k.clone() }));
            Ok(Plan::run(commands))
        }
        "press" => {
            let key = action
                .input("key")
                .or_else(|| action.input("content"))
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .ok_or_else(|| OperatorError::InvalidAction("press requires key".to_string()))?;
            Ok(Plan::run(vec![DeviceCommand::KeyPress { key }]))
        }
        "scroll" => {
            let direction = action
                .input("direction")
                .unwrap_or("down")
                .parse::<ScrollDirection>()
                .map_err(OperatorError::InvalidAction)?;
            Ok(Plan::run(vec![DeviceCommand::Scroll {
                direction,
                amount: cfg.scroll_amount,
            }]))
        }
        "wait" => Ok(Plan::run(vec![DeviceCommand::Wait {
            millis: cfg.wait.as_millis() as u64,
        }])),
        "screenshot" => Ok(Plan::run(vec![DeviceCommand::Screenshot])),
        "cursor_position" => Ok(Plan::run(vec![DeviceCommand::CursorPosition])),
        "finished" => Ok(Plan::stop(StopSignal::Finished(text_input(action)))),
        "call_user" => Ok(Plan::stop(StopSignal::CallUser)),
        "error" | "error_env" => {
            let content = text_input(action);
            let message = if content.is_empty() {
                "model reported an error".to_string()
            } else {
                content
            };
            Ok(Plan::stop(StopSignal::Error(message)))
        }
        other => {
            warn!("Unknown action type '{}', ignoring", other);
            Ok(Plan::run(Vec::new()))
        }
    }
}
