//! Desktop operator - applies device commands through an input driver

use async_trait::async_trait;
use log::{debug, info, warn};

use super::dispatch::{DeviceCommand, DispatchConfig, HeldKeys, MouseButton, Point, ScrollDirection, plan_commands};
use super::{ExecuteOutcome, Operator, ScreenContext, Screenshot};
use crate::action::ParsedAction;
use crate::error::OperatorError;

/// Pointer, keyboard and capture primitives of a desktop session
#[async_trait]
pub trait InputDriver: Send + Sync {
    async fn capture(&self) -> Result<Screenshot, OperatorError>;

    async fn move_to(&self, to: Point) -> Result<(), OperatorError>;

    async fn click(&self, button: MouseButton, count: u8) -> Result<(), OperatorError>;

    async fn drag(&self, from: Point, to: Point) -> Result<(), OperatorError>;

    async fn type_text(&self, text: &str) -> Result<(), OperatorError>;

    async fn key_press(&self, key: &str) -> Result<(), OperatorError>;

    async fn key_down(&self, key: &str) -> Result<(), OperatorError>;

    async fn key_up(&self, key: &str) -> Result<(), OperatorError>;

    async fn scroll(&self, direction: ScrollDirection, amount: u32) -> Result<(), OperatorError>;

    async fn cursor_position(&self) -> Result<Point, OperatorError>;
}

/// Operator for a local desktop
pub struct DesktopOperator<D: InputDriver> {
    driver: D,
    config: DispatchConfig,
}

impl<D: InputDriver> DesktopOperator<D> {
    pub fn new(driver: D, config: DispatchConfig) -> Self {
        Self { driver, config }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    async fn apply(&self, command: &DeviceCommand) -> Result<(), OperatorError> {
        debug!("desktop: {:?}", command);
        match command {
            DeviceCommand::MoveTo { to } => self.driver.move_to(*to).await,
            DeviceCommand::Click { button, count } => self.driver.click(*button, *count).await,
            DeviceCommand::Drag { from, to } => self.driver.drag(*from, *to).await,
            DeviceCommand::TypeText { text } => self.driver.type_text(text).await,
            DeviceCommand::KeyPress { key } => self.driver.key_press(key).await,
            DeviceCommand::KeyDown { key } => self.driver.key_down(key).await,
            DeviceCommand::KeyUp { key } => self.driver.key_up(key).await,
            DeviceCommand::Scroll { direction, amount } => self.driver.scroll(*direction, *amount).await,
            DeviceCommand::Wait { millis } => {
                tokio::time::sleep(std::time::Duration::from_millis(*millis)).await;
                Ok(())
            }
            DeviceCommand::Screenshot => self.driver.capture().await.map(|_| ()),
            DeviceCommand::CursorPosition => {
                let at = self.driver.cursor_position().await?;
                info!("cursor at ({}, {})", at.x, at.y);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl<D: InputDriver> Operator for DesktopOperator<D> {
    async fn screenshot(&self) -> Result<Screenshot, OperatorError> {
        self.driver.capture().await
    }

    async fn execute(&self, action: &ParsedAction, ctx: &ScreenContext) -> Result<ExecuteOutcome, OperatorError> {
        let plan = plan_commands(action, ctx, &self.config)?;
        let mut held = HeldKeys::default();
        for command in &plan.commands {
            if let Err(err) = self.apply(command).await {
                for key in held.release_order() {
                    if let Err(e) = self.driver.key_up(&key).await {
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
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
        fail_clicks: bool,
        fail_key_down: Option<&'static str>,
    }

    impl Recorder {
        fn record(&self, s: String) {
            self.calls.lock().unwrap().push(s);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl InputDriver for Recorder {
        async fn capture(&self) -> Result<Screenshot, OperatorError> {
            Ok(Screenshot {
                image_base64: "AA==".to_string(),
                width: 100,
                height: 100,
                scale_factor: 1.0,
            })
        }
        async fn move_to(&self, to: Point) -> Result<(), OperatorError> {
            self.record(format!("move {} {}", to.x, to.y));
            Ok(())
        }
        async fn click(&self, button: MouseButton, count: u8) -> Result<(), OperatorError> {
            if self.fail_clicks {
                return Err(OperatorError::Execution("button stuck".to_string()));
            }
            self.record(format!("click {:?} {}", button, count));
            Ok(())
        }
        async fn drag(&self, from: Point, to: Point) -> Result<(), OperatorError> {
            self.record(format!("drag {},{} -> {},{}", from.x, from.y, to.x, to.y));
            Ok(())
        }
        async fn type_text(&self, text: &str) -> Result<(), OperatorError> {
            self.record(format!("type {}", text));
            Ok(())
        }
        async fn key_press(&self, key: &str) -> Result<(), OperatorError> {
            self.record(format!("press {}", key));
            Ok(())
        }
        async fn key_down(&self, key: &str) -> Result<(), OperatorError> {
            if self.fail_key_down == Some(key) {
                return Err(OperatorError::Execution(format!("{} not pressed", key)));
            }
            self.record(format!("down {}", key));
            Ok(())
        }
        async fn key_up(&self, key: &str) -> Result<(), OperatorError> {
            self.record(format!("up {}", key));
            Ok(())
        }
        async fn scroll(&self, direction: ScrollDirection, amount: u32) -> Result<(), OperatorError> {
            self.record(format!("scroll {:?} {}", direction, amount));
            Ok(())
        }
        async fn cursor_position(&self) -> Result<Point, OperatorError> {
            Ok(Point { x: 1, y: 2 })
        }
    }

    #[tokio::test]
    async fn test_type_then_enter() {
        let op = DesktopOperator::new(Recorder::default(), DispatchConfig::default());
        let action = ParsedAction::new("type").with_input("content", "go\\n");
        let outcome = op.execute(&action, &ScreenContext::new(100, 100, 1.0)).await.unwrap();
        assert_eq!(outcome, ExecuteOutcome::Continue);
        assert_eq!(op.driver().calls(), vec!["type go", "press enter"]);
    }

    #[tokio::test]
    async fn test_click_with_scale() {
        let op = DesktopOperator::new(Recorder::default(), DispatchConfig::default());
        let action = ParsedAction::new("click").with_input("start_box", "[0.5,0.25,0.5,0.25]");
        op.execute(&action, &ScreenContext::new(200, 100, 2.0)).await.unwrap();
        assert_eq!(op.driver().calls(), vec!["move 200 50", "click Left 1"]);
    }

    #[tokio::test]
    async fn test_driver_failure_propagates() {
        let driver = Recorder {
            fail_clicks: true,
            ..Default::default()
        };
        let op = DesktopOperator::new(driver, DispatchConfig::default());
        let action = ParsedAction::new("click").with_input("start_box", "[0.5,0.5,0.5,0.5]");
        let err = op.execute(&action, &ScreenContext::new(100, 100, 1.0)).await.unwrap_err();
        assert!(matches!(err, OperatorError::Execution(_)));
    }

    #[tokio::test]
    async fn test_failed_hotkey_releases_held_keys() {
        let driver = Recorder {
            fail_key_down: Some("c"),
            ..Default::default()
        };
        let op = DesktopOperator::new(driver, DispatchConfig::default());
        let action = ParsedAction::new("hotkey").with_input("key", "ctrl shift c");
        let err = op.execute(&action, &ScreenContext::new(100, 100, 1.0)).await.unwrap_err();
        assert!(matches!(err, OperatorError::Execution(_)));
        assert_eq!(op.driver().calls(), vec!["down ctrl", "down shift", "up shift", "up ctrl"]);
    }

    #[tokio::test]
    async fn test_finished_touches_nothing() {
        let op = DesktopOperator::new(Recorder::default(), DispatchConfig::default());
        let outcome = op
            .execute(&ParsedAction::new("finished"), &ScreenContext::new(100, 100, 1.0))
            .await
            .unwrap();
        assert!(outcome.is_stop());
        assert!(op.driver().calls().is_empty());
    }
}
