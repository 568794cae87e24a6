//! Retry and backoff for provider calls

mod backoff;
mod error;

pub use backoff::{Backoff, ExponentialBackoff, FixedBackoff};
pub use error::RetryError;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::select;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts (None for infinite)
    pub max_retries: Option<u32>,
    /// Initial backoff duration
    #[serde(with = "crate::config::millis", rename = "initial_backoff_ms")]
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    #[serde(with = "crate::config::millis", rename = "max_backoff_ms")]
    pub max_backoff: Duration,
    /// Jitter factor (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: Some(5),
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            jitter_factor: 0.1,
        }
    }
}

/// Resolves once shutdown has been requested.
///
/// A dropped sender means nobody can ask for shutdown any more, so this then
/// never resolves.
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Helper for retrying operations with backoff
pub struct RetryHandle<B: Backoff> {
    config: RetryConfig,
    backoff: B,
    attempts: u32,
}

impl<B: Backoff> RetryHandle<B> {
    pub fn new(config: RetryConfig, backoff: B) -> Self {
        Self {
            config,
            backoff,
            attempts: 0,
        }
    }

    /// Retry an operation on every error
    pub async fn retry<F, Fut, T, E>(
        &mut self,
        operation: F,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.retry_if(operation, |_| true, shutdown).await
    }

    /// Retry an operation while `should_retry` accepts its error.
    ///
    /// Rejected errors come back as [`RetryError::Fatal`] without a delay.
    /// Attempts are counted from zero on every call.
    pub async fn retry_if<F, Fut, T, E, P>(
        &mut self,
        mut operation: F,
        should_retry: P,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        P: Fn(&E) -> bool,
    {
        self.reset();

        loop {
            self.attempts += 1;
            trace!(attempt = self.attempts, "Executing operation");

            let result = select! {
                result = operation() => result,
                _ = wait_for_shutdown(shutdown) => {
                    debug!("Operation interrupted by shutdown signal");
                    return Err(RetryError::Interrupted);
                }
            };

            let e = match result {
                Ok(value) => {
                    if self.attempts > 1 {
                        debug!(attempts = self.attempts, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !should_retry(&e) {
                return Err(RetryError::Fatal(e));
            }

            if let Some(max) = self.config.max_retries {
                if self.attempts >= max {
                    warn!(
                        attempts = self.attempts,
                        error = %e,
                        "Maximum retry attempts exceeded"
                    );
                    return Err(RetryError::MaxRetriesExceeded(self.attempts, e));
                }
            }

            let delay = self.backoff.next_delay(self.attempts - 1);
            warn!(
                attempt = self.attempts,
                delay_ms = ?delay.as_millis(),
                error = %e,
                "Operation failed, retrying after delay"
            );

            select! {
                _ = tokio::time::sleep(delay) => continue,
                _ = wait_for_shutdown(shutdown) => {
                    debug!("Retry interrupted by shutdown signal");
                    return Err(RetryError::Interrupted);
                }
            }
        }
    }

    /// Reset the retry counter
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.backoff.reset();
    }

    /// Attempts made by the most recent call
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
