//! Loop execution - sessions, retry budgets and the iteration state machine.
//!
//! This module provides:
//! - RunSession and SessionStatus
//! - RetryPolicy with independent model/screenshot/execute budgets
//! - LoopExecutor, which drives one session to a terminal state

mod loop_runner;
mod retry;
mod session;

pub use loop_runner::{
    CALL_USER_MESSAGE, IterationOutcome, LoopConfig, LoopExecutor, LoopOutcome, MAX_ITERATIONS_MESSAGE,
};
pub use retry::{RetryClass, RetryError, RetryPolicy};
pub use session::{RunSession, SessionStatus};
