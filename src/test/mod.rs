//! Test utilities and mock provider implementations


use aws_sdk_kinesis::types::Record;
use aws_smithy_types_convert::date_time::DateTimeExt;
use chrono::{DateTime, TimeZone, Utc};

use crate::client::{RecordBatch, ShardInfo, StreamRecord};

/// Helper functions for creating test data
pub struct TestUtils;

impl TestUtils {
    /// Base arrival time used by generated records
    pub fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 7, 10, 10, 0, 0)
            .single()
            .unwrap_or_default()
    }

    /// SDK record with the given payload and arrival timestamp
    pub fn create_sdk_record(sequence_number: &str, data: &[u8], arrival: DateTime<Utc>) -> Record {
        Record::builder()
            .sequence_number(sequence_number)
            .data(aws_smithy_types::Blob::new(data.to_vec()))
            .partition_key("test-partition-key")
            .approximate_arrival_timestamp(aws_smithy_types::DateTime::from_chrono_utc(arrival))
            .build()
            .expect("Failed to build test record")
    }

    pub fn create_stream_record(
        sequence_number: &str,
        arrival: DateTime<Utc>,
        size_bytes: usize,
    ) -> StreamRecord {
        StreamRecord {
            sequence_number: sequence_number.to_string(),
            arrival,
            size_bytes,
        }
    }

    pub fn create_test_shard(shard_id: &str) -> ShardInfo {
        ShardInfo::new(shard_id)
    }

    /// `count` records named `sequence-0..`, 100ms apart from [`base_time`](Self::base_time), 1 KB each
    pub fn create_test_records(count: usize) -> Vec<StreamRecord> {
        (0..count)
            .map(|i| {
                Self::create_stream_record(
                    &format!("sequence-{}", i),
                    Self::base_time() + chrono::Duration::milliseconds(100 * i as i64),
                    1024,
                )
            })
            .collect()
    }

    pub fn create_batch(count: usize, next_iterator: Option<&str>) -> RecordBatch {
        RecordBatch {
            records: Self::create_test_records(count),
            next_iterator: next_iterator.map(String::from),
            millis_behind_latest: None,
        }
    }

    /// One 1 KB record per timestamp, sequence numbers in input order
    pub fn records_at(arrivals: &[DateTime<Utc>]) -> Vec<StreamRecord> {
        arrivals
            .iter()
            .enumerate()
            .map(|(i, arrival)| Self::create_stream_record(&format!("{:020}", i), *arrival, 1024))
            .collect()
    }
}
