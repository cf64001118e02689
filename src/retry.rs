use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{event, Level};

/// How many times, and how patiently, to retry an operation.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Retries after the first attempt; the operation runs at most
    /// `max_retries + 1` times.
    pub max_retries: u32,
    /// Wait before the first retry.
    pub base_delay: Duration,
    /// Factor the wait is multiplied by after every attempt.
    pub backoff: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            backoff: 2.0,
        }
    }
}

/// Runs `operation` until it succeeds or the retry budget is exhausted, in
/// which case the last error is returned unchanged.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut delay = config.base_delay;
    let mut attempt = 0u32;
    loop {
        let result = operation().await;
        let wait = delay;
        delay = delay.mul_f64(config.backoff);
        match result {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= config.max_retries => {
                event!(
                    Level::ERROR,
                    operation = %operation_name,
                    attempts = attempt + 1,
                    err = %err,
                    "operation failed, giving up"
                );
                return Err(err);
            }
            Err(err) => {
                event!(
                    Level::WARN,
                    operation = %operation_name,
                    attempt = attempt + 1,
                    err = %err,
                    delay_ms = wait.as_millis(),
                    "operation failed, retrying"
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
        }
    }
}
