//! Retry with exponential backoff for fallible async operations

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Retry policy
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Attempts allowed after the first one
    pub max_retries: u32,
    /// Wait before the first retry
    pub initial_delay: Duration,
    /// Growth factor applied to the wait after each retry
    pub backoff_multiplier: f64,
    /// Upper bound on any single wait, jitter included
    pub max_delay: Duration,
    /// Stretch each wait by a random 0-25%
    pub use_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(200),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(5),
            use_jitter: true,
        }
    }
}

/// Errors that know whether another attempt could succeed
pub trait RetryableError: std::error::Error + Send + Sync {
    fn is_retriable(&self) -> bool;

    /// Wait requested by the error itself (e.g. a server-sent retry-after)
    fn custom_retry_delay(&self, _attempt: u32) -> Option<Duration> {
        None
    }
}

/// Wait schedule for one retried operation
#[derive(Debug, Clone)]
struct Backoff<'a> {
    config: &'a RetryConfig,
    base: Duration,
}

impl<'a> Backoff<'a> {
    fn new(config: &'a RetryConfig) -> Self {
        Self {
            config,
            base: config.initial_delay,
        }
    }

    /// The wait before the next attempt; advances the schedule
    fn next_delay(&mut self) -> Duration {
        let delay = self.jittered(self.base);
        self.base = self.scaled(self.base, self.config.backoff_multiplier);
        delay
    }

    fn jittered(&self, base: Duration) -> Duration {
        if self.config.use_jitter {
            self.scaled(base, 1.0 + rand::rng().random_range(0.0..=0.25))
        } else {
            base.min(self.config.max_delay)
        }
    }

    /// `base * factor`, capped at `max_delay`. Factors that overflow or are
    /// not numbers land on the cap.
    fn scaled(&self, base: Duration, factor: f64) -> Duration {
        Duration::try_from_secs_f64(base.as_secs_f64() * factor)
            .map_or(self.config.max_delay, |delay| delay.min(self.config.max_delay))
    }
}

/// Runs operations under a [`RetryConfig`]
#[derive(Debug, Clone, Default)]
pub struct RetryManager {
    config: RetryConfig,
}

impl RetryManager {
    /// Manager with the default policy
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation` until it succeeds, fails permanently, or runs out of retries
    pub async fn retry<F, T, E, Fut>(&self, operation_name: &str, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError,
    {
        self.retry_counted(operation_name, operation).await.0
    }

    /// Like [`retry`](Self::retry), also returning the number of attempts made
    pub async fn retry_counted<F, T, E, Fut>(
        &self,
        operation_name: &str,
        mut operation: F,
    ) -> (Result<T, E>, u32)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError,
    {
        let mut backoff = Backoff::new(&self.config);
        let mut attempts = 0;

        loop {
            attempts += 1;
            let error = match operation().await {
                Ok(value) => {
                    if attempts > 1 {
                        info!(operation = operation_name, attempts, "succeeded after retrying");
                    }
                    return (Ok(value), attempts);
                }
                Err(error) => error,
            };

            if !error.is_retriable() {
                debug!(operation = operation_name, attempts, %error, "permanent failure, not retrying");
                return (Err(error), attempts);
            }
            if attempts > self.config.max_retries {
                warn!(operation = operation_name, attempts, %error, "retries exhausted");
                return (Err(error), attempts);
            }

            let scheduled = backoff.next_delay();
            let delay = error.custom_retry_delay(attempts).unwrap_or(scheduled);
            debug!(
                operation = operation_name,
                attempts,
                %error,
                delay_ms = delay.as_millis() as u64,
                "retrying after transient failure"
            );
            sleep(delay).await;
        }
    }
}
