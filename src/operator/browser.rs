//! Browser operator - applies device commands to an automated page
//!
//! The page handle is owned by the operator for the lifetime of the session.

use std::sync::Mutex;

use async_trait::async_trait;
use log::{debug, info, warn};

use super::dispatch::{DeviceCommand, DispatchConfig, HeldKeys, MouseButton, Point, ScrollDirection, plan_commands};
use super::{ExecuteOutcome, Operator, ScreenContext, Screenshot};
use crate::action::ParsedAction;
use crate::error::OperatorError;

/// Wheel delta per scroll notch, in CSS pixels
const WHEEL_STEP: f64 = 100.0;

/// Automation primitives of one browser page
#[async_trait]
pub trait BrowserPage: Send + Sync {
    async fn screenshot(&self) -> Result<Screenshot, OperatorError>;

    async fn mouse_move(&self, x: f64, y: f64) -> Result<(), OperatorError>;

    async fn mouse_down(&self, button: MouseButton) -> Result<(), OperatorError>;

    async fn mouse_up(&self, button: MouseButton) -> Result<(), OperatorError>;

    async fn mouse_click(&self, x: f64, y: f64, button: MouseButton, click_count: u8) -> Result<(), OperatorError>;

    async fn mouse_wheel(&self, delta_x: f64, delta_y: f64) -> Result<(), OperatorError>;

    async fn keyboard_type(&self, text: &str) -> Result<(), OperatorError>;

    async fn keyboard_press(&self, key: &str) -> Result<(), OperatorError>;

    async fn keyboard_down(&self, key: &str) -> Result<(), OperatorError>;

    async fn keyboard_up(&self, key: &str) -> Result<(), OperatorError>;
}

/// Map a model key name to the page's key naming
pub fn browser_key_name(key: &str) -> String {
    match key.to_lowercase().as_str() {
        "enter" | "return" => "Enter".to_string(),
        "ctrl" | "control" => "Control".to_string(),
        "cmd" | "command" | "meta" | "win" | "super" => "Meta".to_string(),
        "alt" | "option" => "Alt".to_string(),
        "shift" => "Shift".to_string(),
        "esc" | "escape" => "Escape".to_string(),
        "tab" => "Tab".to_string(),
        "space" => " ".to_string(),
        "backspace" => "Backspace".to_string(),
        "delete" | "del" => "Delete".to_string(),
        "up" | "arrowup" => "ArrowUp".to_string(),
        "down" | "arrowdown" => "ArrowDown".to_string(),
        "left" | "arrowleft" => "ArrowLeft".to_string(),
        "right" | "arrowright" => "ArrowRight".to_string(),
        "pageup" => "PageUp".to_string(),
        "pagedown" => "PageDown".to_string(),
        "home" => "Home".to_string(),
        "end" => "End".to_string(),
        other if other.len() > 1 && other.starts_with('f') && other[1..].parse::<u8>().is_ok() => other.to_uppercase(),
        _ => key.to_string(),
    }
}

/// Operator for a browser page
pub struct BrowserOperator<P: BrowserPage> {
    page: P,
    config: DispatchConfig,
    /// Pages do not report the pointer, so the last position is tracked here
    cursor: Mutex<Point>,
}

impl<P: BrowserPage> BrowserOperator<P> {
    pub fn new(page: P, config: DispatchConfig) -> Self {
        Self {
            page,
            config,
            cursor: Mutex::new(Point { x: 0, y: 0 }),
        }
    }

    pub fn page(&self) -> &P {
        &self.page
    }

    fn set_cursor(&self, at: Point) {
        *self.cursor.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }

    fn cursor(&self) -> Point {
        *self.cursor.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn apply(&self, command: &DeviceCommand) -> Result<(), OperatorError> {
        debug!("browser: {:?}", command);
        match command {
            DeviceCommand::MoveTo { to } => {
                self.page.mouse_move(to.x as f64, to.y as f64).await?;
                self.set_cursor(*to);
                Ok(())
            }
            DeviceCommand::Click { button, count } => {
                let at = self.cursor();
                self.page.mouse_click(at.x as f64, at.y as f64, *button, *count).await
            }
            DeviceCommand::Drag { from, to } => {
                self.page.mouse_move(from.x as f64, from.y as f64).await?;
                self.page.mouse_down(MouseButton::Left).await?;
                self.page.mouse_move(to.x as f64, to.y as f64).await?;
                self.page.mouse_up(MouseButton::Left).await?;
                self.set_cursor(*to);
                Ok(())
            }
            DeviceCommand::TypeText { text } => self.page.keyboard_type(text).await,
            DeviceCommand::KeyPress { key } => self.page.keyboard_press(&browser_key_name(key)).await,
            DeviceCommand::KeyDown { key } => self.page.keyboard_down(&browser_key_name(key)).await,
            DeviceCommand::KeyUp { key } => self.page.keyboard_up(&browser_key_name(key)).await,
            DeviceCommand::Scroll { direction, amount } => {
                let delta = *amount as f64 * WHEEL_STEP;
                let (dx, dy) = match direction {
                    ScrollDirection::Up => (0.0, -delta),
                    ScrollDirection::Down => (0.0, delta),
                    ScrollDirection::Left => (-delta, 0.0),
                    ScrollDirection::Right => (delta, 0.0),
                };
                self.page.mouse_wheel(dx, dy).await
            }
            DeviceCommand::Wait { millis } => {
                tokio::time::sleep(std::time::Duration::from_millis(*millis)).await;
                Ok(())
            }
            DeviceCommand::Screenshot => self.page.screenshot().await.map(|_| ()),
            DeviceCommand::CursorPosition => {
                let at = self.cursor();
                info!("cursor at ({}, {})", at.x, at.y);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl<P: BrowserPage> Operator for BrowserOperator<P> {
    async fn screenshot(&self) -> Result<Screenshot, OperatorError> {
        self.page.screenshot().await
    }

    async fn execute(&self, action: &ParsedAction, ctx: &ScreenContext) -> Result<ExecuteOutcome, OperatorError> {
        let plan = plan_commands(action, ctx, &self.config)?;
        let mut held = HeldKeys::default();
        for command in &plan.commands {
            if let Err(err) = self.apply(command).await {
                for key in held.release_order() {
                    if let Err(e) = self.page.keyboard_up(&browser_key_name(&key)).await {
                        warn!("Failed to release key {}: {}", key, e);
                    }
                }
                return Err(err);
            }
            held.track(command);
        }
        Ok(plan.outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct FakePage {
        log: Mutex<Vec<String>>,
        fail_key_down: Option<&'static str>,
    }

    impl FakePage {
        fn push(&self, s: String) -> Result<(), OperatorError> {
            self.log.lock().unwrap().push(s);
            Ok(())
        }

        fn entries(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BrowserPage for FakePage {
        async fn screenshot(&self) -> Result<Screenshot, OperatorError> {
            Ok(Screenshot {
                image_base64: "AA==".to_string(),
                width: 800,
                height: 600,
                scale_factor: 1.0,
            })
        }
        async fn mouse_move(&self, x: f64, y: f64) -> Result<(), OperatorError> {
            self.push(format!("move {} {}", x, y))
        }
        async fn mouse_down(&self, button: MouseButton) -> Result<(), OperatorError> {
            self.push(format!("down {:?}", button))
        }
        async fn mouse_up(&self, button: MouseButton) -> Result<(), OperatorError> {
            self.push(format!("up {:?}", button))
        }
        async fn mouse_click(&self, x: f64, y: f64, button: MouseButton, count: u8) -> Result<(), OperatorError> {
            self.push(format!("click {} {} {:?} {}", x, y, button, count))
        }
        async fn mouse_wheel(&self, dx: f64, dy: f64) -> Result<(), OperatorError> {
            self.push(format!("wheel {} {}", dx, dy))
        }
        async fn keyboard_type(&self, text: &str) -> Result<(), OperatorError> {
            self.push(format!("type {}", text))
        }
        async fn keyboard_press(&self, key: &str) -> Result<(), OperatorError> {
            self.push(format!("press {}", key))
        }
        async fn keyboard_down(&self, key: &str) -> Result<(), OperatorError> {
            if self.fail_key_down == Some(key) {
                return Err(OperatorError::Execution(format!("{} not pressed", key)));
            }
            self.push(format!("keydown {}", key))
        }
        async fn keyboard_up(&self, key: &str) -> Result<(), OperatorError> {
            self.push(format!("keyup {}", key))
        }
    }

    fn ctx() -> ScreenContext {
        ScreenContext::new(800, 600, 1.0)
    }

    #[tokio::test]
    async fn test_click_at_tracked_cursor() {
        let op = BrowserOperator::new(FakePage::default(), DispatchConfig::default());
        let action = ParsedAction::new("click").with_input("start_box", "[0.5,0.5,0.5,0.5]");
        op.execute(&action, &ctx()).await.unwrap();
        assert_eq!(op.page().entries(), vec!["move 400 300", "click 400 300 Left 1"]);
    }

    #[tokio::test]
    async fn test_drag_sequence() {
        let op = BrowserOperator::new(FakePage::default(), DispatchConfig::default());
        let action = ParsedAction::new("drag")
            .with_input("start_box", "[0.0,0.0,0.0,0.0]")
            .with_input("end_box", "[0.5,0.5,0.5,0.5]");
        op.execute(&action, &ctx()).await.unwrap();
        assert_eq!(
            op.page().entries(),
            vec!["move 0 0", "move 0 0", "down Left", "move 400 300", "up Left"]
        );
    }

    #[tokio::test]
    async fn test_scroll_uses_wheel_steps() {
        let op = BrowserOperator::new(
            FakePage::default(),
            DispatchConfig {
                scroll_amount: 3,
                ..Default::default()
            },
        );
        op.execute(&ParsedAction::new("scroll").with_input("direction", "up"), &ctx())
            .await
            .unwrap();
        assert_eq!(op.page().entries(), vec!["wheel 0 -300"]);
    }

    #[tokio::test]
    async fn test_hotkey_uses_page_key_names() {
        let op = BrowserOperator::new(FakePage::default(), DispatchConfig::default());
        op.execute(&ParsedAction::new("hotkey").with_input("key", "ctrl enter"), &ctx())
            .await
            .unwrap();
        assert_eq!(
            op.page().entries(),
            vec!["keydown Control", "keydown Enter", "keyup Enter", "keyup Control"]
        );
    }

    #[tokio::test]
    async fn test_failed_hotkey_releases_held_keys() {
        let page = FakePage {
            fail_key_down: Some("c"),
            ..Default::default()
        };
        let op = BrowserOperator::new(page, DispatchConfig::default());
        let err = op
            .execute(&ParsedAction::new("hotkey").with_input("key", "ctrl c"), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, OperatorError::Execution(_)));
        assert_eq!(op.page().entries(), vec!["keydown Control", "keyup Control"]);
    }

    #[test]
    fn test_browser_key_names() {
        assert_eq!(browser_key_name("ESC"), "Escape");
        assert_eq!(browser_key_name("f5"), "F5");
        assert_eq!(browser_key_name("a"), "a");
        assert_eq!(browser_key_name("cmd"), "Meta");
    }
}
