//! Event log - the ordered, append-only record of a session.
//!
//! This module provides:
//! - Event and EventKind record types
//! - EventLog with synchronous, ordered subscriber delivery
//! - JSONL snapshots for replay and test tooling

mod jsonl;
mod store;

pub use self::jsonl::{read_jsonl, write_jsonl};
pub use self::store::{EventLog, Subscription};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What kind of thing happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    UserInput,
    AssistantMessage,
    ToolCallRequest,
    ToolCallResult,
    System,
    StreamDelta,
    Screenshot,
    Action,
    Aborted,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::UserInput => "user_input",
            EventKind::AssistantMessage => "assistant_message",
            EventKind::ToolCallRequest => "tool_call_request",
            EventKind::ToolCallResult => "tool_call_result",
            EventKind::System => "system",
            EventKind::StreamDelta => "stream_delta",
            EventKind::Screenshot => "screenshot",
            EventKind::Action => "action",
            EventKind::Aborted => "aborted",
            EventKind::Error => "error",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of one thing that happened during a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// 1-based position in the log
    pub id: u64,
    pub kind: EventKind,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Text content carried by the payload, if any
    pub fn content(&self) -> Option<&str> {
        self.payload.get("content").and_then(|v| v.as_str())
    }

    /// True for the final-answer assistant message of a run
    pub fn is_final_answer(&self) -> bool {
        self.kind == EventKind::AssistantMessage
            && self
                .payload
                .get("final")
                .and_then(|v| v.as_bool())
                .unwrap_or(false)
    }

    /// True when this event ends a run's event stream
    pub fn is_terminal(&self) -> bool {
        self.is_final_answer() || matches!(self.kind, EventKind::Aborted | EventKind::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(kind: EventKind, payload: Value) -> Event {
        Event {
            id: 1,
            kind,
            payload,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_event_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&EventKind::ToolCallResult).unwrap(),
            "\"tool_call_result\""
        );
        let kind: EventKind = serde_json::from_str("\"stream_delta\"").unwrap();
        assert_eq!(kind, EventKind::StreamDelta);
    }

    #[test]
    fn test_event_kind_display_matches_serde() {
        for kind in [EventKind::UserInput, EventKind::Aborted, EventKind::Screenshot] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json.trim_matches('"'), kind.to_string());
        }
    }

    #[test]
    fn test_final_answer_detection() {
        let final_msg = event(EventKind::AssistantMessage, json!({"content": "done", "final": true}));
        assert!(final_msg.is_final_answer());
        assert!(final_msg.is_terminal());
        assert_eq!(final_msg.content(), Some("done"));

        let partial = event(EventKind::AssistantMessage, json!({"content": "thinking"}));
        assert!(!partial.is_final_answer());
        assert!(!partial.is_terminal());
    }

    #[test]
    fn test_abort_and_error_are_terminal() {
        assert!(event(EventKind::Aborted, Value::Null).is_terminal());
        assert!(event(EventKind::Error, json!({"message": "boom"})).is_terminal());
        assert!(!event(EventKind::StreamDelta, json!({"content": "x"})).is_terminal());
    }
}
