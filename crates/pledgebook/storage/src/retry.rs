use crate::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Bounded retry for idempotent reads against an unreachable backend.
///
/// Only [`StorageError::Unavailable`] is retried. Writes must not go through
/// here; they need their own idempotency story.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadRetry {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub backoff_ms: u64,
}

impl Default for ReadRetry {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 10,
        }
    }
}

impl ReadRetry {
    /// A single attempt. For callers that retry whole operations themselves.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.backoff_ms.saturating_mul(factor))
    }

    pub async fn run<T, F, Fut>(&self, what: &'static str, mut read: F) -> StorageResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match read().await {
                Err(StorageError::Unavailable(msg)) if attempt < attempts => {
                    let delay = self.backoff(attempt);
                    warn!(what, attempt, error = %msg, "Store unavailable, retrying read");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}
