//! Run session state

use std::fmt;

use log::debug;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::id::generate_session_id;

/// Lifecycle of a session: `idle -> executing -> {done | aborted | error}`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Idle,
    Executing,
    Aborted,
    Error,
    Done,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Aborted | SessionStatus::Error | SessionStatus::Done)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Executing => "executing",
            SessionStatus::Aborted => "aborted",
            SessionStatus::Error => "error",
            SessionStatus::Done => "done",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One run of the loop. Mutated only by the loop executor.
#[derive(Debug, Clone)]
pub struct RunSession {
    pub session_id: String,
    pub current_iteration: u32,
    pub cancel: CancellationToken,
    status: SessionStatus,
}

impl RunSession {
    pub fn new(cancel: CancellationToken) -> Self {
        Self::with_id(generate_session_id(), cancel)
    }

    pub fn with_id(session_id: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            session_id: session_id.into(),
            current_iteration: 0,
            cancel,
            status: SessionStatus::Idle,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Move to `next`. Terminal states are final; later transitions are ignored.
    pub fn transition(&mut self, next: SessionStatus) -> bool {
        if self.status.is_terminal() {
            debug!(
                "{}: ignoring transition {} -> {}",
                self.session_id, self.status, next
            );
            return false;
        }
        debug!("{}: {} -> {}", self.session_id, self.status, next);
        self.status = next;
        true
    }
}
