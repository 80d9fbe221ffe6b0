//! Bounded retry helper for readiness loops

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::errors::OrchestratorError;
use crate::storage::settings::RetrySettings;

/// Fixed-interval retry with an attempt ceiling and a per-attempt timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 15,
            attempt_timeout: Duration::from_secs(5),
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            interval: Duration::from_secs(settings.interval_secs),
            max_attempts: settings.max_attempts.max(1),
            attempt_timeout: Duration::from_secs(settings.attempt_timeout_secs),
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds or the attempts run out.
    ///
    /// `op` receives the 1-based attempt number. An attempt that outlives
    /// `attempt_timeout` counts as failed. The interval is slept between
    /// attempts, never after the last one.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, OrchestratorError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, OrchestratorError>>,
    {
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=self.max_attempts {
            match tokio::time::timeout(self.attempt_timeout, op(attempt)).await {
                Ok(Ok(value)) => {
                    debug!(label, attempt, "ready");
                    return Ok(value);
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => {
                    last_error = format!("attempt timed out after {:?}", self.attempt_timeout)
                }
            }
            debug!(label, attempt, max = self.max_attempts, "not ready: {}", last_error);

            if attempt < self.max_attempts {
                tokio::time::sleep(self.interval).await;
            }
        }

        Err(OrchestratorError::Timeout(format!(
            "{} not ready after {} attempts: {}",
            label, self.max_attempts, last_error
        )))
    }
}
