//! Error types for pulling and analysing shard records

use crate::client::KinesisClientError;
use crate::retry::RetryError;
use thiserror::Error;

/// Main error type for probe operations
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Provider error: {0}")]
    Provider(#[from] KinesisClientError),

    #[error("Failed to get iterator for shard {shard_id}: {source}")]
    GetIteratorFailed {
        shard_id: String,
        #[source]
        source: KinesisClientError,
    },

    #[error("Iterator expired for shard {0}")]
    IteratorExpired(String),

    #[error("Maximum retry attempts reached: {0}")]
    MaxRetriesExceeded(String),

    #[error("Parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shutdown requested")]
    Shutdown,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProbeError {
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        ProbeError::Parse {
            line,
            message: message.into(),
        }
    }

    /// Provider-side failures, as opposed to local parse, config or I/O problems
    pub fn is_provider(&self) -> bool {
        matches!(
            self,
            ProbeError::Provider(_)
                | ProbeError::GetIteratorFailed { .. }
                | ProbeError::IteratorExpired(_)
                | ProbeError::MaxRetriesExceeded(_)
        )
    }
}

impl From<RetryError<KinesisClientError>> for ProbeError {
    fn from(err: RetryError<KinesisClientError>) -> Self {
        match err {
            RetryError::MaxRetriesExceeded(attempts, last) => {
                ProbeError::MaxRetriesExceeded(format!("After {} attempts: {}", attempts, last))
            }
            RetryError::Interrupted => ProbeError::Shutdown,
            RetryError::Fatal(e) => ProbeError::Provider(e),
        }
    }
}

/// Result type for probe operations
pub type Result<T> = std::result::Result<T, ProbeError>;
