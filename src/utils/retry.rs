//! Retry logic with exponential backoff
//!
//! Every call to the configuration store and to Key Vault goes through
//! [`retry_with_backoff`] with the budget chosen by the credential selector.

use crate::error::{AppConfigError, Result};
use crate::utils::network::is_retryable_error;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryOptions {
    pub max_retries: usize,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    /// Per-request timeout applied by the HTTP clients that use this budget.
    pub network_timeout: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
            network_timeout: Duration::from_secs(100),
        }
    }
}

impl RetryOptions {
    /// Reduced budget so failures surface quickly instead of hanging.
    pub fn fail_fast() -> Self {
        Self {
            max_retries: 2,
            initial_interval: Duration::from_millis(800),
            max_interval: Duration::from_secs(5),
            multiplier: 2.0,
            network_timeout: Duration::from_secs(5),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let mut interval = self.initial_interval;
        for _ in 1..attempt {
            interval = Duration::from_secs_f64(interval.as_secs_f64() * self.multiplier);
            if interval >= self.max_interval {
                return self.max_interval;
            }
        }
        std::cmp::min(interval, self.max_interval)
    }
}

pub async fn retry_with_backoff<T, F, Fut>(mut operation: F, options: &RetryOptions) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 0..=options.max_retries {
        if attempt > 0 {
            let delay = options.delay_for(attempt);
            tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Retrying request");
            sleep(delay).await;
        }

        match operation().await {
            Ok(result) => return Ok(result),
            Err(error) => {
                if !is_retryable_error(&error) {
                    return Err(error);
                }

                last_error = Some(error);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| AppConfigError::unknown("Retry failed with no error")))
}
