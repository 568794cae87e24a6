//! Capacity ceiling checks over aggregated buckets
//!
//! Purely advisory: a breach only marks the bucket in the [`MonitorReport`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::aggregate::Bucket;
use crate::error::{ProbeError, Result};

/// Per-shard write capacity, expressed per second.
///
/// Defaults are the provider's per-shard limits: 1000 records and 1 MiB each
/// second. Sizes are in kilobytes to match the record log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ceilings {
    pub count_per_second: u64,
    pub size_kb_per_second: f64,
}

impl Default for Ceilings {
    fn default() -> Self {
        Self {
            count_per_second: 1000,
            size_kb_per_second: 1024.0,
        }
    }
}

impl Ceilings {
    pub fn new(count_per_second: u64, size_kb_per_second: f64) -> Self {
        Self {
            count_per_second,
            size_kb_per_second,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.count_per_second == 0 {
            return Err(ProbeError::ConfigError("count ceiling must be positive".into()));
        }
        if !(self.size_kb_per_second.is_finite() && self.size_kb_per_second > 0.0) {
            return Err(ProbeError::ConfigError("size ceiling must be positive".into()));
        }
        Ok(())
    }

    /// Ceilings for a bucket `width_secs` wide
    pub fn scaled(&self, width_secs: f64) -> (f64, f64) {
        (
            self.count_per_second as f64 * width_secs,
            self.size_kb_per_second * width_secs,
        )
    }
}

/// Breach flags for one bucket
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketFlag {
    pub start: DateTime<Utc>,
    pub count: u64,
    pub total_size: f64,
    pub count_breached: bool,
    pub size_breached: bool,
}

impl BucketFlag {
    pub fn breached(&self) -> bool {
        self.count_breached || self.size_breached
    }
}

/// Outcome of checking a bucket sequence against [`Ceilings`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorReport {
    pub ceilings: Ceilings,
    /// Ceilings after scaling to the bucket width
    pub count_limit: f64,
    pub size_limit: f64,
    pub flags: Vec<BucketFlag>,
}

impl MonitorReport {
    pub fn breach_count(&self) -> usize {
        self.flags.iter().filter(|f| f.breached()).count()
    }

    pub fn any_breach(&self) -> bool {
        self.flags.iter().any(BucketFlag::breached)
    }

    pub fn breaches(&self) -> impl Iterator<Item = &BucketFlag> {
        self.flags.iter().filter(|f| f.breached())
    }

    /// Highest observed count and size as fractions of their limits
    pub fn peak_utilisation(&self) -> (f64, f64) {
        self.flags.iter().fold((0.0_f64, 0.0_f64), |(c, s), f| {
            (
                c.max(f.count as f64 / self.count_limit),
                s.max(f.total_size / self.size_limit),
            )
        })
    }
}

/// Flag every bucket whose count or size exceeds the ceiling for a bucket `width` wide.
///
/// A value equal to the ceiling is within capacity.
pub fn evaluate(buckets: &[Bucket], width: Duration, ceilings: &Ceilings) -> MonitorReport {
    let (count_limit, size_limit) = ceilings.scaled(width.as_secs_f64());

    let flags: Vec<BucketFlag> = buckets
        .iter()
        .map(|bucket| BucketFlag {
            start: bucket.start,
            count: bucket.count,
            total_size: bucket.total_size,
            count_breached: bucket.count as f64 > count_limit,
            size_breached: bucket.total_size > size_limit,
        })
        .collect();

    let report = MonitorReport {
        ceilings: ceilings.clone(),
        count_limit,
        size_limit,
        flags,
    };

    let breaches = report.breach_count();
    if breaches > 0 {
        warn!(
            breaches,
            buckets = buckets.len(),
            count_limit,
            size_limit,
            "Buckets exceed shard capacity"
        );
    } else {
        debug!(buckets = buckets.len(), "No capacity breaches");
    }

    report
}
