//! Exponential backoff retry for remote operations.

use std::time::Duration;

use tracing::{debug, warn};

use dirsync_core::{GatewayError, SyncSettings};

/// Terminal failure of a single operation after retry handling.
#[derive(Debug)]
pub struct OpFailure {
    /// The last error observed.
    pub error: GatewayError,
    /// True when the error was transient but the retry budget ran out.
    /// Used for batch-level escalation.
    pub retries_exhausted: bool,
}

impl OpFailure {
    #[must_use]
    pub fn permanent(error: GatewayError) -> Self {
        Self {
            error,
            retries_exhausted: false,
        }
    }

    #[must_use]
    pub fn exhausted(error: GatewayError) -> Self {
        Self {
            error,
            retries_exhausted: true,
        }
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (0 = no retries).
    pub max_retries: u32,
    /// Base delay in seconds for exponential backoff.
    pub base_delay_secs: u64,
    /// Maximum delay cap in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_secs: 1,
            max_delay_secs: 60,
        }
    }
}

impl RetryPolicy {
    /// Derive a policy from the engine settings.
    #[must_use]
    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay_secs: settings.backoff_base_secs,
            max_delay_secs: settings.backoff_max_secs,
        }
    }

    /// Whether the error should be retried at the given attempt number.
    #[must_use]
    pub fn should_retry(&self, attempt: u32, error: &GatewayError) -> bool {
        attempt < self.max_retries && error.is_transient()
    }

    /// Delay before the next attempt.
    ///
    /// A server-provided `Retry-After` is honored directly (capped at
    /// `max_delay_secs`); otherwise the delay is
    /// `min(base * 2^attempt, max)`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, error: &GatewayError) -> Duration {
        let secs = if let GatewayError::RateLimited {
            retry_after_secs: Some(retry_after),
        } = error
        {
            (*retry_after).min(self.max_delay_secs)
        } else {
            self.base_delay_secs
                .saturating_mul(2u64.saturating_pow(attempt))
                .min(self.max_delay_secs)
        };
        Duration::from_secs(secs)
    }

    /// Execute an async operation with retry.
    ///
    /// Retries transient errors with backoff until success, a permanent
    /// error, or an exhausted budget.
    pub async fn execute<F, Fut, T>(&self, operation: &str, mut f: F) -> Result<T, OpFailure>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, GatewayError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match f().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(
                            operation,
                            attempt = attempt + 1,
                            "operation succeeded after retries"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if !self.should_retry(attempt, &error) {
                        if error.is_transient() {
                            warn!(
                                operation,
                                attempts = attempt + 1,
                                error = %error,
                                "retry budget exhausted"
                            );
                            return Err(OpFailure::exhausted(error));
                        }
                        return Err(OpFailure::permanent(error));
                    }

                    let delay = self.delay_for(attempt, &error);
                    debug!(
                        operation,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_secs = delay.as_secs(),
                        error = %error,
                        "retrying after transient error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
