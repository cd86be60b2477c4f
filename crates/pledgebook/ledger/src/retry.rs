use crate::error::{LedgerError, LedgerResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Bounded retry with exponential backoff for optimistic writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Never less than one.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Per-attempt deadline. An attempt that overruns it counts as contention.
    pub operation_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 10,
            max_backoff_ms: 500,
            operation_timeout_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms.max(1))
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Run `op` until it succeeds, fails permanently, or the budget is spent.
    ///
    /// Each attempt must be self-contained: it re-reads whatever it depends on
    /// and writes through a version check, so that replaying it is safe.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut op: F) -> LedgerResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = LedgerResult<T>>,
    {
        let attempts = self.attempts();
        let mut attempt = 1;
        loop {
            let outcome = match tokio::time::timeout(self.operation_timeout(), op()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(LedgerError::ConcurrencyConflict(format!(
                    "{operation} attempt timed out"
                ))),
            };

            match outcome {
                Err(err) if err.is_transient() => {
                    if attempt >= attempts {
                        warn!(operation, attempts, error = %err, "Retry budget exhausted");
                        return Err(match err {
                            LedgerError::ConcurrencyConflict(_) => {
                                LedgerError::ConcurrencyTimeout { attempts }
                            }
                            other => other,
                        });
                    }
                    let delay = self.backoff(attempt);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
