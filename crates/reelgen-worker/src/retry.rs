//! Retry utilities with exponential backoff.

use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::context::JobContext;
use crate::error::{WorkerError, WorkerResult};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_retries: u32,
    /// Base delay; attempt n waits base * 2^(n-1).
    pub base_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Operation name for logging.
    pub operation_name: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            operation_name: "operation".to_string(),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with the given operation name.
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            ..Default::default()
        }
    }

    /// Set the maximum number of retries.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the base delay for exponential backoff.
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Delay before retry attempt `attempt` (1-based): 1s, 2s, 4s, ...
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        delay.min(self.max_delay)
    }
}

/// Run an operation with retries on transient failures, checking the job's
/// cancellation flag before every attempt.
///
/// Exhausted transient failures promote to `Permanent`; validation errors,
/// cancellation, and other non-transient failures short-circuit.
pub async fn retry_with_cancel<F, Fut, T>(
    config: &RetryConfig,
    ctx: &JobContext,
    operation: F,
) -> WorkerResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = WorkerResult<T>>,
{
    let mut attempt = 0u32;

    loop {
        ctx.checkpoint().await?;

        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_cancelled() => return Err(WorkerError::Cancelled),
            Err(e) if e.is_transient() && attempt < config.max_retries => {
                attempt += 1;
                let delay = config.delay_for_attempt(attempt);
                debug!(
                    "{} attempt {} failed, retrying in {:?}: {}",
                    config.operation_name, attempt, delay, e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) if e.is_transient() => {
                return Err(WorkerError::permanent(format!(
                    "{} failed after {} attempts: {}",
                    config.operation_name,
                    attempt + 1,
                    e
                )));
            }
            Err(e) => return Err(e),
        }
    }
}
