//! Kinesis shard rate probe
//!
//! Pulls a bounded sample of records from one shard into a CSV record log,
//! then buckets the log by arrival time and checks every bucket against the
//! shard's record and byte ceilings.

pub mod aggregate;
pub mod cli;
pub mod client;
pub mod config;
pub mod cursor;
pub mod error;
pub mod fetcher;
pub mod log;
pub mod monitor;
pub mod report;
pub mod retry;

// Make test utilities available for integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test;
#[cfg(test)]
mod tests;

pub use aggregate::{aggregate, Bucket, BucketStats};
pub use client::{KinesisClientError, KinesisClientTrait, RecordBatch, StreamDescriptor, StreamRecord};
pub use config::{FetchConfig, ProbeConfig, ReportConfig};
pub use cursor::ShardCursor;
pub use error::{ProbeError, Result};
pub use fetcher::{BatchFetcher, PullSummary, StopReason};
pub use log::{read_log, LogRecord, RecordLogWriter, RecordSink};
pub use monitor::{evaluate, Ceilings, MonitorReport};
pub use report::{analyse, AnalysisReport};
pub use retry::{Backoff, ExponentialBackoff, RetryConfig};
