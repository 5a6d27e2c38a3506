//! Per-failure-class retry budgets

use std::fmt;
use std::future::Future;
use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Failure classes with independent budgets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryClass {
    Model,
    Screenshot,
    Execute,
}

impl fmt::Display for RetryClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryClass::Model => write!(f, "model request"),
            RetryClass::Screenshot => write!(f, "screenshot"),
            RetryClass::Execute => write!(f, "execute"),
        }
    }
}

/// Additional attempts allowed after the first, per class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub model: u32,
    pub screenshot: u32,
    pub execute: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            model: 3,
            screenshot: 5,
            execute: 1,
            delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    pub fn budget(&self, class: RetryClass) -> u32 {
        match class {
            RetryClass::Model => self.model,
            RetryClass::Screenshot => self.screenshot,
            RetryClass::Execute => self.execute,
        }
    }

    /// Run `op` until it succeeds, the budget for `class` is spent, the error
    /// is not retryable, or `cancel` fires. Cancellation wins over retries.
    pub async fn run<T, E, F, Fut>(
        &self,
        class: RetryClass,
        cancel: &CancellationToken,
        retryable: impl Fn(&E) -> bool,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let budget = self.budget(class);
        let mut attempt = 0;
        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Aborted);
            }
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(RetryError::Aborted),
                r = op(attempt) => r,
            };
            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !retryable(&err) || attempt >= budget {
                return Err(RetryError::Exhausted {
                    class,
                    attempts: attempt + 1,
                    last: err,
                });
            }
            attempt += 1;
            warn!("{} failed ({}), retry {}/{}", class, err, attempt, budget);

            if !self.delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(RetryError::Aborted),
                    _ = tokio::time::sleep(self.delay) => {}
                }
            }
        }
    }
}

/// Why a retried operation gave up
#[derive(Debug, Clone, PartialEq)]
pub enum RetryError<E> {
    Aborted,
    Exhausted { class: RetryClass, attempts: u32, last: E },
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Aborted => write!(f, "aborted"),
            RetryError::Exhausted { class, attempts, last } => {
                write!(f, "{} failed after {} attempt(s): {}", class, attempts, last)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            delay: Duration::ZERO,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let out: Result<u32, RetryError<String>> = fast()
            .run(RetryClass::Model, &CancellationToken::new(), |_| true, move |attempt| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    if attempt < 2 { Err("flaky".to_string()) } else { Ok(attempt) }
                }
            })
            .await;
        assert_eq!(out.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let out: Result<(), RetryError<String>> = fast()
            .run(RetryClass::Execute, &CancellationToken::new(), |_| true, move |_| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err("stuck".to_string())
                }
            })
            .await;
        match out.unwrap_err() {
            RetryError::Exhausted { class, attempts, last } => {
                assert_eq!(class, RetryClass::Execute);
                assert_eq!(attempts, 2);
                assert_eq!(last, "stuck");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_retryable_stops_immediately() {
        let out: Result<(), RetryError<String>> = fast()
            .run(RetryClass::Screenshot, &CancellationToken::new(), |_| false, |_| async {
                Err("fatal".to_string())
            })
            .await;
        assert!(matches!(out, Err(RetryError::Exhausted { attempts: 1, .. })));
    }

    #[tokio::test]
    async fn test_cancel_takes_priority() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let out: Result<(), RetryError<String>> = fast()
            .run(RetryClass::Model, &cancel, |_| true, |_| async { Ok(()) })
            .await;
        assert_eq!(out, Err(RetryError::Aborted));
    }

    #[tokio::test]
    async fn test_cancel_during_delay() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let policy = RetryPolicy {
            delay: Duration::from_secs(30),
            ..Default::default()
        };
        let out: Result<(), RetryError<String>> = policy
            .run(RetryClass::Model, &cancel, |_| true, move |_| {
                trigger.cancel();
                async { Err("down".to_string()) }
            })
            .await;
        assert_eq!(out, Err(RetryError::Aborted));
    }

    #[test]
    fn test_display() {
        let err: RetryError<String> = RetryError::Exhausted {
            class: RetryClass::Model,
            attempts: 4,
            last: "503".to_string(),
        };
        assert_eq!(err.to_string(), "model request failed after 4 attempt(s): 503");
    }
}
