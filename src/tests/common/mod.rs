use chrono::{DateTime, Utc};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::sync::watch;

use crate::client::StreamDescriptor;
use crate::config::FetchConfig;
use crate::cursor::ShardCursor;
use crate::retry::RetryConfig;
use crate::test::mocks::SimulatedShardClient;
use crate::test::TestUtils;

static INIT: Once = Once::new();

pub fn init_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("kinesis_shard_rate=debug".parse().unwrap()),
            )
            .with_test_writer()
            .with_line_number(true)
            .try_init()
            .ok();
    });
}

pub fn fetch_config(max_records: usize, page_size: i32) -> FetchConfig {
    FetchConfig {
        max_records,
        page_size,
        poll_interval: Duration::from_millis(5),
        deadline: Some(Duration::from_secs(5)),
        api_timeout: Duration::from_secs(1),
        stop_when_caught_up: false,
    }
}

pub fn quick_retry() -> RetryConfig {
    RetryConfig {
        max_retries: Some(4),
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        jitter_factor: 0.0,
    }
}

/// `count` records `step_ms` apart starting at `start`
pub fn evenly_spaced(start: DateTime<Utc>, step_ms: i64, count: usize) -> Vec<DateTime<Utc>> {
    (0..count)
        .map(|i| start + chrono::Duration::milliseconds(step_ms * i as i64))
        .collect()
}

pub fn simulated_shard(arrivals: &[DateTime<Utc>]) -> Arc<SimulatedShardClient> {
    Arc::new(SimulatedShardClient::new("shard-0001", TestUtils::records_at(arrivals)))
}

/// Describe the simulated stream and position a cursor at `anchor`
pub async fn open_cursor(
    client: &SimulatedShardClient,
    anchor: DateTime<Utc>,
    fetch: &FetchConfig,
    shutdown: &mut watch::Receiver<bool>,
) -> anyhow::Result<ShardCursor> {
    let descriptor = StreamDescriptor::describe(client, "test-stream").await?;
    let cursor = ShardCursor::open(
        client,
        &descriptor,
        None,
        anchor,
        fetch,
        &quick_retry(),
        shutdown,
    )
    .await?;
    Ok(cursor)
}
