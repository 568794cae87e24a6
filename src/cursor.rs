//! Read position within a single shard
//!
//! A [`ShardCursor`] starts from an anchor timestamp and walks forward one page
//! at a time, replacing its shard iterator after every call. Throttling and
//! transport failures are retried with backoff. An expired iterator is
//! re-acquired from the last delivered sequence number (or the anchor, if
//! nothing has been delivered yet) and the page is fetched again.

use aws_sdk_kinesis::types::ShardIteratorType;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::client::{KinesisClientError, KinesisClientTrait, RecordBatch, StreamDescriptor};
use crate::config::FetchConfig;
use crate::error::{ProbeError, Result};
use crate::retry::{Backoff, ExponentialBackoff, RetryConfig, RetryError, RetryHandle};

async fn timed<T, F>(limit: Duration, call: F) -> std::result::Result<T, KinesisClientError>
where
    F: Future<Output = std::result::Result<T, KinesisClientError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(KinesisClientError::Timeout(format!(
            "no response within {:?}",
            limit
        ))),
    }
}

/// Continuation state for reading one shard
pub struct ShardCursor {
    stream_name: String,
    shard_id: String,
    anchor: DateTime<Utc>,
    token: Option<String>,
    last_sequence: Option<String>,
    last_arrival: Option<DateTime<Utc>>,
    exhausted: bool,
    api_timeout: Duration,
    retry: RetryHandle<Box<dyn Backoff>>,
    iterator_renewals: u32,
}

impl std::fmt::Debug for ShardCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardCursor")
            .field("stream_name", &self.stream_name)
            .field("shard_id", &self.shard_id)
            .field("anchor", &self.anchor)
            .field("positioned", &self.token.is_some())
            .field("last_sequence", &self.last_sequence)
            .field("last_arrival", &self.last_arrival)
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

impl ShardCursor {
    /// An unpositioned cursor; the first [`advance`](Self::advance) seeks to `anchor`
    pub fn new(
        stream_name: impl Into<String>,
        shard_id: impl Into<String>,
        anchor: DateTime<Utc>,
    ) -> Self {
        let retry_config = RetryConfig::default();
        let backoff: Box<dyn Backoff> = Box::new(ExponentialBackoff::from_config(&retry_config));
        Self {
            stream_name: stream_name.into(),
            shard_id: shard_id.into(),
            anchor,
            token: None,
            last_sequence: None,
            last_arrival: None,
            exhausted: false,
            api_timeout: FetchConfig::default().api_timeout,
            retry: RetryHandle::new(retry_config, backoff),
            iterator_renewals: 0,
        }
    }

    pub fn with_api_timeout(mut self, api_timeout: Duration) -> Self {
        self.api_timeout = api_timeout;
        self
    }

    /// Use `config` for retries, with exponential backoff built from it
    pub fn with_retry(self, config: RetryConfig) -> Self {
        let backoff = ExponentialBackoff::from_config(&config);
        self.with_retry_backoff(config, backoff)
    }

    pub fn with_retry_backoff<B: Backoff + 'static>(mut self, config: RetryConfig, backoff: B) -> Self {
        let backoff: Box<dyn Backoff> = Box::new(backoff);
        self.retry = RetryHandle::new(config, backoff);
        self
    }

    /// Pick a shard from `descriptor` and position a cursor at `anchor`
    pub async fn open<C>(
        client: &C,
        descriptor: &StreamDescriptor,
        shard_id: Option<&str>,
        anchor: DateTime<Utc>,
        fetch: &FetchConfig,
        retry: &RetryConfig,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Self>
    where
        C: KinesisClientTrait + ?Sized,
    {
        let shard = descriptor.select_shard(shard_id)?;
        let mut cursor = Self::new(descriptor.stream_name.clone(), shard.shard_id.clone(), anchor)
            .with_api_timeout(fetch.api_timeout)
            .with_retry(retry.clone());
        cursor.initialize(client, shutdown).await?;
        Ok(cursor)
    }

    /// Acquire an iterator at the anchor timestamp.
    ///
    /// The provider's timestamp seek is approximate; records slightly before
    /// the anchor can be delivered.
    #[instrument(skip(self, client, shutdown), fields(shard_id = %self.shard_id, anchor = %self.anchor))]
    pub async fn initialize<C>(
        &mut self,
        client: &C,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()>
    where
        C: KinesisClientTrait + ?Sized,
    {
        self.last_sequence = None;
        self.last_arrival = None;
        self.exhausted = false;
        self.acquire_iterator(client, shutdown).await?;
        info!(shard_id = %self.shard_id, "Positioned cursor at anchor");
        Ok(())
    }

    async fn acquire_iterator<C>(
        &mut self,
        client: &C,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<()>
    where
        C: KinesisClientTrait + ?Sized,
    {
        let (iterator_type, sequence, timestamp) = match &self.last_sequence {
            Some(seq) => (ShardIteratorType::AfterSequenceNumber, Some(seq.as_str()), None),
            None => (ShardIteratorType::AtTimestamp, None, Some(&self.anchor)),
        };

        debug!(
            shard_id = %self.shard_id,
            iterator_type = ?iterator_type,
            sequence = ?sequence,
            "Requesting shard iterator"
        );

        let stream_name = self.stream_name.as_str();
        let shard_id = self.shard_id.as_str();
        let api_timeout = self.api_timeout;

        let result = self
            .retry
            .retry_if(
                || {
                    timed(
                        api_timeout,
                        client.get_shard_iterator(
                            stream_name,
                            shard_id,
                            iterator_type.clone(),
                            sequence,
                            timestamp,
                        ),
                    )
                },
                KinesisClientError::is_retryable,
                shutdown,
            )
            .await;

        match result {
            Ok(token) => {
                self.token = Some(token);
                Ok(())
            }
            Err(RetryError::Fatal(source)) => {
                warn!(shard_id = %self.shard_id, error = %source, "Failed to get shard iterator");
                Err(ProbeError::GetIteratorFailed {
                    shard_id: self.shard_id.clone(),
                    source,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Fetch the next page of at most `limit` records.
    ///
    /// An exhausted cursor returns an empty batch without calling the provider.
    #[instrument(level = "debug", skip(self, client, shutdown), fields(shard_id = %self.shard_id))]
    pub async fn advance<C>(
        &mut self,
        client: &C,
        limit: i32,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<RecordBatch>
    where
        C: KinesisClientTrait + ?Sized,
    {
        if self.exhausted {
            return Ok(RecordBatch::default());
        }
        if self.token.is_none() {
            self.acquire_iterator(client, shutdown).await?;
        }

        let mut renewed = false;
        loop {
            let token = self
                .token
                .clone()
                .ok_or_else(|| ProbeError::IteratorExpired(self.shard_id.clone()))?;
            let api_timeout = self.api_timeout;

            let result = self
                .retry
                .retry_if(
                    || timed(api_timeout, client.get_records(&token, limit)),
                    KinesisClientError::is_retryable,
                    shutdown,
                )
                .await;

            match result {
                Ok(batch) => {
                    self.accept(&batch);
                    return Ok(batch);
                }
                Err(RetryError::Fatal(KinesisClientError::ExpiredIterator)) if !renewed => {
                    warn!(
                        shard_id = %self.shard_id,
                        last_sequence = ?self.last_sequence,
                        "Iterator expired, reacquiring"
                    );
                    renewed = true;
                    self.iterator_renewals += 1;
                    self.token = None;
                    self.acquire_iterator(client, shutdown).await?;
                }
                Err(RetryError::Fatal(KinesisClientError::ExpiredIterator)) => {
                    return Err(ProbeError::IteratorExpired(self.shard_id.clone()));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn accept(&mut self, batch: &RecordBatch) {
        for record in &batch.records {
            match self.last_arrival {
                Some(prev) if record.arrival < prev => {
                    warn!(
                        shard_id = %self.shard_id,
                        sequence = %record.sequence_number,
                        arrival = %record.arrival,
                        previous = %prev,
                        "Record delivered out of arrival order"
                    );
                }
                _ => self.last_arrival = Some(record.arrival),
            }
        }
        if let Some(last) = batch.records.last() {
            self.last_sequence = Some(last.sequence_number.clone());
        }

        self.token = batch.next_iterator.clone();
        if self.token.is_none() {
            info!(shard_id = %self.shard_id, "Shard closed, no further records");
            self.exhausted = true;
        }
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }

    pub fn anchor(&self) -> DateTime<Utc> {
        self.anchor
    }

    /// Current continuation token, if positioned
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn last_sequence(&self) -> Option<&str> {
        self.last_sequence.as_deref()
    }

    /// Latest arrival time delivered so far
    pub fn last_arrival(&self) -> Option<DateTime<Utc>> {
        self.last_arrival
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn iterator_renewals(&self) -> u32 {
        self.iterator_renewals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::FixedBackoff;
    use crate::test::mocks::MockKinesisClient;
    use crate::test::TestUtils;
    use chrono::TimeZone;

    fn quick_retry(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries: Some(max_retries),
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            jitter_factor: 0.0,
        }
    }

    fn cursor() -> ShardCursor {
        ShardCursor::new(
            "test-stream",
            "shard-1",
            Utc.with_ymd_and_hms(2023, 7, 10, 10, 0, 0).unwrap(),
        )
        .with_retry_backoff(quick_retry(3), FixedBackoff::new(Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn test_advance_replaces_token() -> anyhow::Result<()> {
        let client = MockKinesisClient::new();
        client.mock_get_iterator(Ok("iterator-0".to_string())).await;
        client
            .mock_get_records(Ok(TestUtils::create_batch(3, Some("iterator-1"))))
            .await;

        let (_tx, mut rx) = watch::channel(false);
        let mut cursor = cursor();
        cursor.initialize(&client, &mut rx).await?;
        assert_eq!(cursor.token(), Some("iterator-0"));

        let batch = cursor.advance(&client, 10, &mut rx).await?;
        assert_eq!(batch.len(), 3);
        assert_eq!(cursor.token(), Some("iterator-1"));
        assert_eq!(cursor.last_sequence(), Some("sequence-2"));
        assert!(!cursor.is_exhausted());
        assert_eq!(client.get_records_request_count().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_closed_shard_exhausts_cursor() -> anyhow::Result<()> {
        let client = MockKinesisClient::new();
        client.mock_get_iterator(Ok("iterator-0".to_string())).await;
        client
            .mock_get_records(Ok(TestUtils::create_batch(1, None)))
            .await;

        let (_tx, mut rx) = watch::channel(false);
        let mut cursor = cursor();
        cursor.advance(&client, 10, &mut rx).await?;
        assert!(cursor.is_exhausted());

        let batch = cursor.advance(&client, 10, &mut rx).await?;
        assert!(batch.is_empty());
        assert_eq!(client.get_records_request_count().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_expired_iterator_is_reacquired_after_last_sequence() -> anyhow::Result<()> {
        let client = MockKinesisClient::new();
        client.mock_get_iterator(Ok("iterator-0".to_string())).await;
        client.mock_get_iterator(Ok("iterator-renewed".to_string())).await;
        client
            .mock_get_records(Ok(TestUtils::create_batch(2, Some("iterator-1"))))
            .await;
        client.mock_expired_iterator().await;
        client
            .mock_get_records(Ok(TestUtils::create_batch(1, Some("iterator-2"))))
            .await;

        let (_tx, mut rx) = watch::channel(false);
        let mut cursor = cursor();
        cursor.advance(&client, 10, &mut rx).await?;
        let batch = cursor.advance(&client, 10, &mut rx).await?;

        assert_eq!(batch.len(), 1);
        assert_eq!(cursor.iterator_renewals(), 1);
        assert_eq!(client.get_iterator_request_count().await, 2);

        let requests = client.iterator_requests().await;
        assert_eq!(requests[0].0, ShardIteratorType::AtTimestamp);
        assert_eq!(requests[1].0, ShardIteratorType::AfterSequenceNumber);
        assert_eq!(requests[1].1.as_deref(), Some("sequence-1"));
        Ok(())
    }

    #[tokio::test]
    async fn test_repeated_expiry_fails() -> anyhow::Result<()> {
        let client = MockKinesisClient::new();
        client.mock_expired_iterator().await;
        client.mock_expired_iterator().await;

        let (_tx, mut rx) = watch::channel(false);
        let mut cursor = cursor();
        let err = cursor.advance(&client, 10, &mut rx).await.unwrap_err();
        assert!(matches!(err, ProbeError::IteratorExpired(_)));
        Ok(())
    }

    #[tokio::test]
    async fn test_throttling_is_retried() -> anyhow::Result<()> {
        let client = MockKinesisClient::new();
        client.mock_throughput_exceeded().await;
        client.mock_throughput_exceeded().await;
        client
            .mock_get_records(Ok(TestUtils::create_batch(4, Some("iterator-1"))))
            .await;

        let (_tx, mut rx) = watch::channel(false);
        let mut cursor = cursor();
        let batch = cursor.advance(&client, 10, &mut rx).await?;
        assert_eq!(batch.len(), 4);
        assert_eq!(client.get_records_request_count().await, 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_persistent_throttling_exhausts_retries() -> anyhow::Result<()> {
        let client = MockKinesisClient::new();
        for _ in 0..3 {
            client.mock_throughput_exceeded().await;
        }

        let (_tx, mut rx) = watch::channel(false);
        let mut cursor = cursor();
        let err = cursor.advance(&client, 10, &mut rx).await.unwrap_err();
        assert!(matches!(err, ProbeError::MaxRetriesExceeded(_)));
        Ok(())
    }

    #[tokio::test]
    async fn test_access_denied_is_not_retried() -> anyhow::Result<()> {
        let client = MockKinesisClient::new();
        client.mock_error(KinesisClientError::AccessDenied).await;

        let (_tx, mut rx) = watch::channel(false);
        let mut cursor = cursor();
        let err = cursor.advance(&client, 10, &mut rx).await.unwrap_err();
        assert!(matches!(
            err,
            ProbeError::Provider(KinesisClientError::AccessDenied)
        ));
        assert_eq!(client.get_records_request_count().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_iterator_failure_names_shard() -> anyhow::Result<()> {
        let client = MockKinesisClient::new();
        client
            .mock_get_iterator(Err(KinesisClientError::ResourceNotFound(
                "test-stream".into(),
            )))
            .await;

        let (_tx, mut rx) = watch::channel(false);
        let mut cursor = cursor();
        let err = cursor.initialize(&client, &mut rx).await.unwrap_err();
        match err {
            ProbeError::GetIteratorFailed { shard_id, .. } => assert_eq!(shard_id, "shard-1"),
            other => panic!("unexpected error: {other}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_hung_call_times_out() -> anyhow::Result<()> {
        let client = MockKinesisClient::new_with_delay(Duration::from_millis(200));
        client
            .mock_get_records(Ok(TestUtils::create_batch(1, Some("iterator-1"))))
            .await;

        let (_tx, mut rx) = watch::channel(false);
        let mut cursor = cursor()
            .with_api_timeout(Duration::from_millis(20))
            .with_retry_backoff(quick_retry(1), FixedBackoff::new(Duration::from_millis(1)));
        let err = cursor.advance(&client, 10, &mut rx).await.unwrap_err();
        assert!(matches!(err, ProbeError::MaxRetriesExceeded(_)));
        Ok(())
    }
}
