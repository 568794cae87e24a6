//! Bounded fetch loop over a shard cursor
//!
//! [`BatchFetcher::batches`] exposes the cursor as a pull-based stream of
//! pages. [`BatchFetcher::pull`] drains that stream into a [`RecordSink`] until
//! the record budget is spent, the deadline passes, the shard closes or
//! shutdown is requested, whichever comes first.

use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, TryStreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::client::{KinesisClientTrait, RecordBatch};
use crate::config::FetchConfig;
use crate::cursor::ShardCursor;
use crate::error::{ProbeError, Result};
use crate::log::RecordSink;
use crate::retry::wait_for_shutdown;

/// Why a pull session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The record budget was reached
    BudgetReached,
    /// The session deadline passed before the budget was reached
    DeadlineElapsed,
    /// The shard was closed and fully read
    ShardExhausted,
    /// An empty page reported no lag behind the tip of the shard
    CaughtUp,
    /// Shutdown was requested
    Shutdown,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StopReason::BudgetReached => "record budget reached",
            StopReason::DeadlineElapsed => "deadline elapsed",
            StopReason::ShardExhausted => "shard exhausted",
            StopReason::CaughtUp => "caught up with shard tip",
            StopReason::Shutdown => "shutdown requested",
        };
        f.write_str(s)
    }
}

/// Totals for one pull session
#[derive(Debug, Clone, PartialEq)]
pub struct PullSummary {
    pub shard_id: String,
    pub records: usize,
    pub bytes: u64,
    /// Provider calls that returned a page, empty ones included
    pub batches: usize,
    pub empty_polls: usize,
    pub iterator_renewals: u32,
    pub first_arrival: Option<DateTime<Utc>>,
    pub last_arrival: Option<DateTime<Utc>>,
    pub elapsed: Duration,
    pub stop_reason: StopReason,
}

impl PullSummary {
    fn new(shard_id: &str) -> Self {
        Self {
            shard_id: shard_id.to_string(),
            records: 0,
            bytes: 0,
            batches: 0,
            empty_polls: 0,
            iterator_renewals: 0,
            first_arrival: None,
            last_arrival: None,
            elapsed: Duration::ZERO,
            stop_reason: StopReason::BudgetReached,
        }
    }

    fn observe(&mut self, batch: &RecordBatch) {
        self.batches += 1;
        if batch.is_empty() {
            self.empty_polls += 1;
        }
        for record in &batch.records {
            self.records += 1;
            self.bytes += record.size_bytes as u64;
            if self.first_arrival.is_none() {
                self.first_arrival = Some(record.arrival);
            }
            self.last_arrival = Some(record.arrival);
        }
    }
}

/// Drives a [`ShardCursor`] under a record budget and deadline
pub struct BatchFetcher<C: KinesisClientTrait + ?Sized> {
    client: Arc<C>,
    config: FetchConfig,
}

impl<C: KinesisClientTrait + ?Sized> BatchFetcher<C> {
    pub fn new(client: Arc<C>, config: FetchConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Pages from `cursor`, each at most `page_size` records.
    ///
    /// With a `budget`, page requests shrink so the total never exceeds it and
    /// the stream ends once it is spent. Without one the stream only ends when
    /// the shard closes. Empty pages are yielded like any other.
    pub fn batches<'a>(
        &'a self,
        cursor: &'a mut ShardCursor,
        shutdown: &'a mut watch::Receiver<bool>,
        budget: Option<usize>,
    ) -> impl Stream<Item = Result<RecordBatch>> + 'a {
        let client: &'a C = &self.client;
        let page_size = self.config.page_size;

        stream::try_unfold(
            (cursor, shutdown, budget),
            move |(cursor, shutdown, remaining)| async move {
                if cursor.is_exhausted() || remaining == Some(0) {
                    return Ok::<_, ProbeError>(None);
                }

                let limit = match remaining {
                    Some(left) => page_size.min(i32::try_from(left).unwrap_or(i32::MAX)),
                    None => page_size,
                };
                let batch = cursor.advance(client, limit, shutdown).await?;
                let remaining = remaining.map(|left| left.saturating_sub(batch.len()));

                Ok(Some((batch, (cursor, shutdown, remaining))))
            },
        )
    }

    /// Run one pull session, appending every delivered record to `sink`.
    ///
    /// The sink is flushed after each page, so on error every record already
    /// delivered is still in the sink.
    #[instrument(
        skip_all,
        fields(
            shard_id = %cursor.shard_id(),
            max_records = self.config.max_records,
            page_size = self.config.page_size
        )
    )]
    pub async fn pull<S>(
        &self,
        cursor: &mut ShardCursor,
        sink: &mut S,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<PullSummary>
    where
        S: RecordSink + ?Sized,
    {
        self.config.validate()?;

        let started = Instant::now();
        let deadline = self.config.deadline.map(|d| started + d);
        let max_records = self.config.max_records;
        let mut summary = PullSummary::new(cursor.shard_id());
        let anchor = cursor.anchor();

        info!(anchor = %anchor, deadline = ?self.config.deadline, "Starting pull");

        let mut stream_shutdown = shutdown.clone();
        let stop = {
            let batches = self.batches(cursor, &mut stream_shutdown, Some(max_records));
            futures::pin_mut!(batches);

            loop {
                if deadline.is_some_and(|at| Instant::now() >= at) {
                    break StopReason::DeadlineElapsed;
                }

                let next = match deadline {
                    Some(at) => tokio::select! {
                        next = batches.try_next() => next,
                        _ = tokio::time::sleep_until(at) => break StopReason::DeadlineElapsed,
                    },
                    None => batches.try_next().await,
                };

                let batch = match next {
                    Ok(Some(batch)) => batch,
                    Ok(None) if summary.records >= max_records => break StopReason::BudgetReached,
                    Ok(None) => break StopReason::ShardExhausted,
                    Err(ProbeError::Shutdown) => break StopReason::Shutdown,
                    Err(e) => {
                        warn!(
                            records = summary.records,
                            error = %e,
                            "Pull aborted, records already written are kept"
                        );
                        return Err(e);
                    }
                };

                if summary.first_arrival.is_none() {
                    if let Some(first) = batch.records.first() {
                        debug!(first_arrival = %first.arrival, anchor = %anchor, "First record delivered");
                    }
                }

                for record in &batch.records {
                    sink.append(record)?;
                }
                sink.flush()?;
                summary.observe(&batch);

                debug!(
                    count = batch.len(),
                    total = summary.records,
                    millis_behind_latest = ?batch.millis_behind_latest,
                    "Got records"
                );

                if !batch.is_empty() {
                    continue;
                }

                if self.config.stop_when_caught_up && batch.millis_behind_latest == Some(0) {
                    break StopReason::CaughtUp;
                }

                if let Some(reason) = self.idle(deadline, shutdown).await {
                    break reason;
                }
            }
        };

        summary.iterator_renewals = cursor.iterator_renewals();
        summary.elapsed = started.elapsed();
        summary.stop_reason = stop;

        info!(
            records = summary.records,
            batches = summary.batches,
            empty_polls = summary.empty_polls,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            stop_reason = %stop,
            "Pull finished"
        );

        Ok(summary)
    }

    /// Wait out the poll interval after an empty page
    async fn idle(
        &self,
        deadline: Option<Instant>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<StopReason> {
        let wake = Instant::now() + self.config.poll_interval;
        let (until, hits_deadline) = match deadline {
            Some(at) if at <= wake => (at, true),
            _ => (wake, false),
        };

        tokio::select! {
            _ = tokio::time::sleep_until(until) => {
                hits_deadline.then_some(StopReason::DeadlineElapsed)
            }
            _ = wait_for_shutdown(shutdown) => Some(StopReason::Shutdown),
        }
    }
}
