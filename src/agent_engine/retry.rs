use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::errors::{AgentError, AgentResult, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts after the first one.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on every further retry.
    pub backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            backoff_ms: 1000,
            max_backoff_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_ms: u64) -> Self {
        Self {
            max_retries,
            backoff_ms,
            ..Self::default()
        }
    }

    pub fn none() -> Self {
        Self::new(0, 0)
    }

    /// Backoff before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let multiplier = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.backoff_ms.saturating_mul(multiplier).min(self.max_backoff_ms))
    }
}

/// Waits for `duration` unless `cancel` fires first.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> AgentResult<()> {
    if duration.is_zero() {
        return if cancel.is_cancelled() { Err(AgentError::Cancelled) } else { Ok(()) };
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(AgentError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Runs `op` until it succeeds, fails with a non-transient error, or the
/// policy is exhausted. Cancellation, whether signalled on the token or
/// returned by `op`, ends the loop immediately.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    stage: &str,
    mut op: F,
) -> AgentResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AgentResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
            r = op() => r,
        };

        let err = match result {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        match err.kind() {
            ErrorKind::Cancelled => return Err(err),
            ErrorKind::Fatal => {
                tracing::warn!(stage, error = %err, "non-retryable failure");
                return Err(err);
            }
            ErrorKind::Transient if attempt >= policy.max_retries => {
                tracing::warn!(stage, attempts = attempt + 1, error = %err, "retries exhausted");
                return Err(err);
            }
            ErrorKind::Transient => {
                attempt += 1;
                let backoff = policy.backoff(attempt);
                tracing::warn!(
                    stage,
                    attempt,
                    max_retries = policy.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "retrying"
                );
                sleep_or_cancel(backoff, cancel).await?;
            }
        }
    }
}
