//! Typed access to the Kinesis read API
//!
//! The rest of the crate only talks to [`KinesisClientTrait`], which hands back
//! [`ShardInfo`], [`StreamRecord`] and [`RecordBatch`] values instead of raw SDK
//! response shapes. The implementation for [`aws_sdk_kinesis::Client`] lives at
//! the bottom of this file and is the only place SDK errors get classified.

use async_trait::async_trait;
use aws_sdk_kinesis::{
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    types::{Record, ShardIteratorType},
    Client,
};
use aws_smithy_types_convert::date_time::DateTimeExt;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info};

use crate::error::{ProbeError, Result};

/// Failures reported by the stream provider, classified by how callers should react
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KinesisClientError {
    #[error("Shard iterator expired")]
    ExpiredIterator,

    #[error("Provisioned throughput exceeded")]
    ThroughputExceeded,

    #[error("Access denied")]
    AccessDenied,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("KMS error: {0}")]
    KmsError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("{0}")]
    Other(String),
}

impl KinesisClientError {
    /// Whether waiting and trying the same call again can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            KinesisClientError::ThroughputExceeded
                | KinesisClientError::Timeout(_)
                | KinesisClientError::ConnectionError(_)
        )
    }

    pub fn is_expired_iterator(&self) -> bool {
        matches!(self, KinesisClientError::ExpiredIterator)
    }
}

/// A shard as reported by `ListShards`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardInfo {
    pub shard_id: String,
}

impl ShardInfo {
    pub fn new(shard_id: impl Into<String>) -> Self {
        Self {
            shard_id: shard_id.into(),
        }
    }
}

/// One record delivered by `GetRecords`
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRecord {
    pub sequence_number: String,
    /// Approximate arrival time stamped by the provider
    pub arrival: DateTime<Utc>,
    pub size_bytes: usize,
}

impl TryFrom<&Record> for StreamRecord {
    type Error = KinesisClientError;

    fn try_from(record: &Record) -> std::result::Result<Self, Self::Error> {
        let sequence_number = record.sequence_number().to_string();
        let arrival = record
            .approximate_arrival_timestamp()
            .ok_or_else(|| {
                KinesisClientError::Other(format!(
                    "record {} carries no arrival timestamp",
                    sequence_number
                ))
            })?
            .to_chrono_utc()
            .map_err(|e| {
                KinesisClientError::Other(format!(
                    "record {} has an unrepresentable arrival timestamp: {}",
                    sequence_number, e
                ))
            })?;

        Ok(Self {
            size_bytes: record.data().as_ref().len(),
            sequence_number,
            arrival,
        })
    }
}

/// Result of a single `GetRecords` call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordBatch {
    pub records: Vec<StreamRecord>,
    /// `None` once the shard has been closed and fully read
    pub next_iterator: Option<String>,
    pub millis_behind_latest: Option<i64>,
}

impl RecordBatch {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

/// The stream name and its shard list, fetched once per session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub stream_name: String,
    pub shards: Vec<ShardInfo>,
}

impl StreamDescriptor {
    /// Looks up the shards of `stream_name`
    pub async fn describe<C>(client: &C, stream_name: &str) -> Result<Self>
    where
        C: KinesisClientTrait + ?Sized,
    {
        let shards = client.list_shards(stream_name).await?;
        if shards.is_empty() {
            return Err(ProbeError::ConfigError(format!(
                "stream {} has no shards",
                stream_name
            )));
        }

        info!(stream = %stream_name, shard_count = shards.len(), "Got stream");

        Ok(Self {
            stream_name: stream_name.to_string(),
            shards,
        })
    }

    pub fn shard_ids(&self) -> impl Iterator<Item = &str> {
        self.shards.iter().map(|s| s.shard_id.as_str())
    }

    /// Resolves the shard to read: the requested one, or the first listed
    pub fn select_shard(&self, requested: Option<&str>) -> Result<&ShardInfo> {
        match requested {
            Some(id) => self
                .shards
                .iter()
                .find(|s| s.shard_id == id)
                .ok_or_else(|| {
                    ProbeError::ConfigError(format!(
                        "shard {} not found in stream {}",
                        id, self.stream_name
                    ))
                }),
            None => self.shards.first().ok_or_else(|| {
                ProbeError::ConfigError(format!("stream {} has no shards", self.stream_name))
            }),
        }
    }
}

#[async_trait]
pub trait KinesisClientTrait: Send + Sync {
    async fn list_shards(
        &self,
        stream_name: &str,
    ) -> std::result::Result<Vec<ShardInfo>, KinesisClientError>;

    async fn get_shard_iterator(
        &self,
        stream_name: &str,
        shard_id: &str,
        iterator_type: ShardIteratorType,
        sequence_number: Option<&str>,
        timestamp: Option<&DateTime<Utc>>,
    ) -> std::result::Result<String, KinesisClientError>;

    async fn get_records(
        &self,
        iterator: &str,
        limit: i32,
    ) -> std::result::Result<RecordBatch, KinesisClientError>;
}

fn classify_sdk_error<E, R>(err: SdkError<E, R>) -> KinesisClientError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match &err {
        SdkError::TimeoutError(_) => {
            return KinesisClientError::Timeout(DisplayErrorContext(&err).to_string())
        }
        SdkError::DispatchFailure(_) => {
            return KinesisClientError::ConnectionError(DisplayErrorContext(&err).to_string())
        }
        _ => {}
    }

    let message = err.message().unwrap_or_default().to_string();
    match err.code() {
        Some("ExpiredIteratorException") => KinesisClientError::ExpiredIterator,
        Some("ProvisionedThroughputExceededException")
        | Some("LimitExceededException")
        | Some("KMSThrottlingException") => KinesisClientError::ThroughputExceeded,
        Some("AccessDeniedException") => KinesisClientError::AccessDenied,
        Some("InvalidArgumentException") => KinesisClientError::InvalidArgument(message),
        Some("ResourceNotFoundException") => KinesisClientError::ResourceNotFound(message),
        Some(code) if code.starts_with("KMS") => {
            KinesisClientError::KmsError(format!("{}: {}", code, message))
        }
        _ => KinesisClientError::Other(DisplayErrorContext(&err).to_string()),
    }
}

#[async_trait]
impl KinesisClientTrait for Client {
    async fn list_shards(
        &self,
        stream_name: &str,
    ) -> std::result::Result<Vec<ShardInfo>, KinesisClientError> {
        let response = self
            .list_shards()
            .stream_name(stream_name)
            .send()
            .await
            .map_err(classify_sdk_error)?;

        Ok(response
            .shards
            .unwrap_or_default()
            .iter()
            .map(|shard| ShardInfo::new(shard.shard_id()))
            .collect())
    }

    async fn get_shard_iterator(
        &self,
        stream_name: &str,
        shard_id: &str,
        iterator_type: ShardIteratorType,
        sequence_number: Option<&str>,
        timestamp: Option<&DateTime<Utc>>,
    ) -> std::result::Result<String, KinesisClientError> {
        let mut req = self
            .get_shard_iterator()
            .stream_name(stream_name)
            .shard_id(shard_id)
            .shard_iterator_type(iterator_type);

        if let Some(seq) = sequence_number {
            req = req.starting_sequence_number(seq);
        }

        if let Some(ts) = timestamp {
            req = req.timestamp(aws_smithy_types::DateTime::from_chrono_utc(*ts));
        }

        let response = req.send().await.map_err(classify_sdk_error)?;
        response.shard_iterator.ok_or_else(|| {
            KinesisClientError::Other(format!("no shard iterator returned for {}", shard_id))
        })
    }

    async fn get_records(
        &self,
        iterator: &str,
        limit: i32,
    ) -> std::result::Result<RecordBatch, KinesisClientError> {
        let response = self
            .get_records()
            .shard_iterator(iterator)
            .limit(limit)
            .send()
            .await
            .map_err(classify_sdk_error)?;

        let records = response
            .records()
            .iter()
            .map(StreamRecord::try_from)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        debug!(count = records.len(), "Got records");

        Ok(RecordBatch {
            records,
            next_iterator: response.next_shard_iterator().map(String::from),
            millis_behind_latest: response.millis_behind_latest(),
        })
    }
}
