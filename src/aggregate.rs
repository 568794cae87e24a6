//! Fixed-width time bucketing of the record log
//!
//! Timestamps are normalised to UTC and floored to epoch-aligned boundaries, so
//! rows written with different UTC offsets land in the same bucket when they
//! describe the same instant. Every interval between the first and last record
//! gets a bucket, empty ones included.

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::error::{ProbeError, Result};
use crate::log::LogRecord;

/// Upper bound on buckets produced by one aggregation
pub const MAX_BUCKETS: usize = 10_000_000;

/// Record count and summed size over `[start, start + width)`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bucket {
    pub start: DateTime<Utc>,
    #[serde(rename = "width_secs", serialize_with = "serialize_width")]
    pub width: chrono::Duration,
    pub count: u64,
    pub total_size: f64,
}

fn serialize_width<S: serde::Serializer>(
    width: &chrono::Duration,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(width.to_std().map(|w| w.as_secs_f64()).unwrap_or_default())
}

impl Bucket {
    pub fn end(&self) -> DateTime<Utc> {
        self.start + self.width
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end()
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Reduce `records` into contiguous buckets of `width`.
///
/// The result spans from the bucket holding the earliest record through the
/// bucket holding the latest. Input order does not matter.
pub fn aggregate(records: &[LogRecord], width: Duration) -> Result<Vec<Bucket>> {
    let width_ns = i64::try_from(width.as_nanos())
        .ok()
        .filter(|w| *w > 0)
        .ok_or_else(|| {
            ProbeError::ConfigError(format!("invalid bucket width {:?}", width))
        })?;

    if records.is_empty() {
        return Ok(Vec::new());
    }

    let mut slots = Vec::with_capacity(records.len());
    for record in records {
        let utc = record.arrival.with_timezone(&Utc);
        let ns = utc.timestamp_nanos_opt().ok_or_else(|| {
            ProbeError::ConfigError(format!("timestamp {} is out of range", record.arrival))
        })?;
        slots.push((ns.div_euclid(width_ns), record.size_kb));
    }

    // slots is non-empty here
    let first = slots.iter().map(|(i, _)| *i).min().unwrap_or_default();
    let last = slots.iter().map(|(i, _)| *i).max().unwrap_or_default();

    let len = usize::try_from(last - first + 1)
        .ok()
        .filter(|len| *len <= MAX_BUCKETS)
        .ok_or_else(|| {
            ProbeError::ConfigError(format!(
                "time range needs more than {} buckets of {:?}",
                MAX_BUCKETS, width
            ))
        })?;

    let mut counts = vec![0u64; len];
    let mut sizes = vec![0f64; len];
    for (slot, size) in slots {
        let i = (slot - first) as usize;
        counts[i] += 1;
        sizes[i] += size;
    }

    let width = chrono::Duration::nanoseconds(width_ns);
    let buckets: Vec<Bucket> = counts
        .into_iter()
        .zip(sizes)
        .enumerate()
        .map(|(i, (count, total_size))| Bucket {
            start: Utc.timestamp_nanos((first + i as i64) * width_ns),
            width,
            count,
            total_size,
        })
        .collect();

    debug!(
        records = records.len(),
        buckets = buckets.len(),
        empty = buckets.iter().filter(|b| b.is_empty()).count(),
        "Aggregated record log"
    );

    Ok(buckets)
}

/// Descriptive statistics over one series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation; NaN for fewer than two values
    pub std: f64,
    pub min: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub max: f64,
}

/// Summarise `values`, or `None` when there are none
pub fn describe(values: &[f64]) -> Option<Summary> {
    if values.is_empty() {
        return None;
    }

    let n = values.len();
    let mean = values.iter().sum::<f64>() / n as f64;
    let std = if n > 1 {
        let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
        (ss / (n - 1) as f64).sqrt()
    } else {
        f64::NAN
    };

    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    Some(Summary {
        count: n,
        mean,
        std,
        min: sorted[0],
        p25: quantile(&sorted, 0.25),
        p50: quantile(&sorted, 0.50),
        p75: quantile(&sorted, 0.75),
        max: sorted[n - 1],
    })
}

// Linear interpolation between closest ranks; `sorted` must be non-empty.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// Statistics over the per-bucket count and size series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketStats {
    pub count: Summary,
    pub size: Summary,
}

impl BucketStats {
    pub fn from_buckets(buckets: &[Bucket]) -> Option<Self> {
        let counts: Vec<f64> = buckets.iter().map(|b| b.count as f64).collect();
        let sizes: Vec<f64> = buckets.iter().map(|b| b.total_size).collect();
        Some(Self {
            count: describe(&counts)?,
            size: describe(&sizes)?,
        })
    }
}
