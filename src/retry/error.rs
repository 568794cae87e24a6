use thiserror::Error;

/// Why a retried operation gave up, carrying the last underlying error where there is one
#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("Maximum retries ({0}) exceeded: {1}")]
    MaxRetriesExceeded(u32, E),

    #[error("Retry interrupted by shutdown signal")]
    Interrupted,

    #[error("Non-retryable failure: {0}")]
    Fatal(E),
}
