use crate::error::AppError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first one)
    pub max_attempts: u32,
    /// Initial delay before the first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff (e.g., 2.0 doubles the delay each time)
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Preset: a single quick retry for the translation provider.
    ///
    /// Kept short because a feed item waits on it; the queue adds its own
    /// pacing between items anyway.
    pub fn translation() -> Self {
        Self::new(2, Duration::from_millis(500))
            .with_max_delay(Duration::from_secs(1))
            .with_backoff_multiplier(2.0)
    }

    /// Preset: document store reads (3 attempts)
    /// Delays: 500ms, 1s = 1.5s total wait time
    pub fn document_store() -> Self {
        Self::new(3, Duration::from_millis(500))
            .with_max_delay(Duration::from_secs(2))
            .with_backoff_multiplier(2.0)
    }

    /// Preset: no retries at all. Useful for tests and one-shot tools.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Delay before a given attempt (0-indexed). The first attempt never waits.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let delay_ms = self.initial_delay.as_millis() as f64
            * self.backoff_multiplier.powi((attempt - 1) as i32);

        let delay = Duration::from_millis(delay_ms as u64);
        delay.min(self.max_delay)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::document_store()
    }
}

/// Execute an async operation with retries, using a predicate to decide
/// whether a failed attempt is worth repeating.
///
/// Client errors (4xx) should generally fail immediately, while 5xx, 429
/// and transport errors are retried.
///
/// # Panics
/// Panics if `config.max_attempts` is 0
pub async fn with_retry_if<T, E, F, Fut, P>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    assert!(
        config.max_attempts >= 1,
        "RetryConfig.max_attempts must be >= 1, got {}",
        config.max_attempts
    );

    let mut attempt = 0;
    loop {
        let delay = config.delay_for_attempt(attempt);
        if !delay.is_zero() {
            debug!(
                "{}: Retry attempt {}/{} after {:?}",
                operation_name,
                attempt + 1,
                config.max_attempts,
                delay
            );
            sleep(delay).await;
        }

        let e = match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(
                        "{}: Succeeded on attempt {}/{}",
                        operation_name,
                        attempt + 1,
                        config.max_attempts
                    );
                }
                return Ok(result);
            }
            Err(e) => e,
        };

        if !should_retry(&e) {
            debug!(
                "{}: Error is not retryable, failing immediately: {}",
                operation_name, e
            );
            return Err(e);
        }

        let remaining = config.max_attempts - attempt - 1;
        if remaining == 0 {
            warn!(
                "{}: All {} attempts failed. Last error: {}",
                operation_name, config.max_attempts, e
            );
            return Err(e);
        }

        warn!(
            "{}: Attempt {}/{} failed ({}), {} retries remaining",
            operation_name,
            attempt + 1,
            config.max_attempts,
            e,
            remaining
        );
        attempt += 1;
    }
}

/// Pull the numeric HTTP status out of an error message shaped like
/// `"<Service> API error (429 Too Many Requests): ..."`.
pub fn status_from_error_message(message: &str) -> Option<u16> {
    if !message.contains("API error") {
        return None;
    }
    let start = message.find('(')?;
    let end = message[start..].find(')')?;
    let status_str = &message[start + 1..start + end];
    status_str.split_whitespace().next()?.parse().ok()
}

/// Default retry predicate for HTTP-backed calls: retry 429 and 5xx,
/// fail fast on other 4xx, retry anything that is not an API status error
/// (network failures, timeouts).
pub fn is_transient_http_error(error: &anyhow::Error) -> bool {
    let app_error = error
        .chain()
        .find_map(|cause| cause.downcast_ref::<AppError>());
    let status = match app_error {
        Some(AppError::Backend { status, .. }) => Some(*status),
        Some(_) => return false,
        None => status_from_error_message(&error.to_string()),
    };
    match status {
        Some(status) => status == 429 || status >= 500,
        None => true,
    }
}
