//! Analysis of a record log and its presentation
//!
//! [`analyse`] runs aggregation, statistics and the ceiling check over parsed
//! log rows. The renderers only read the resulting [`AnalysisReport`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write;
use std::time::Duration;
use tracing::info;

use crate::aggregate::{aggregate, Bucket, BucketStats, Summary};
use crate::config::ReportConfig;
use crate::error::{ProbeError, Result};
use crate::log::LogRecord;
use crate::monitor::{evaluate, MonitorReport};

/// Everything produced from one record log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub records: usize,
    #[serde(rename = "bucket_width_secs", serialize_with = "serialize_secs")]
    pub bucket_width: Duration,
    pub first_bucket: Option<DateTime<Utc>>,
    pub last_bucket: Option<DateTime<Utc>>,
    pub stats: Option<BucketStats>,
    pub monitor: MonitorReport,
    pub buckets: Vec<Bucket>,
}

fn serialize_secs<S: serde::Serializer>(
    width: &Duration,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(width.as_secs_f64())
}

/// Bucket, summarise and check `records` against the configured ceilings
pub fn analyse(records: &[LogRecord], config: &ReportConfig) -> Result<AnalysisReport> {
    config.validate()?;

    let buckets = aggregate(records, config.bucket_width)?;
    let stats = BucketStats::from_buckets(&buckets);
    let monitor = evaluate(&buckets, config.bucket_width, &config.ceilings);

    info!(
        records = records.len(),
        buckets = buckets.len(),
        breaches = monitor.breach_count(),
        "Analysed record log"
    );

    Ok(AnalysisReport {
        records: records.len(),
        bucket_width: config.bucket_width,
        first_bucket: buckets.first().map(|b| b.start),
        last_bucket: buckets.last().map(|b| b.start),
        stats,
        monitor,
        buckets,
    })
}

const STAT_ROWS: [&str; 8] = ["count", "mean", "std", "min", "25%", "50%", "75%", "max"];

fn stat_values(summary: &Summary) -> [f64; 8] {
    [
        summary.count as f64,
        summary.mean,
        summary.std,
        summary.min,
        summary.p25,
        summary.p50,
        summary.p75,
        summary.max,
    ]
}

/// Plain-text report: the statistics table, a ceiling summary and optionally every bucket
pub fn render_text(report: &AnalysisReport, show_buckets: bool) -> String {
    let mut out = String::new();

    let _ = writeln!(
        out,
        "{} records in {} buckets of {:?}",
        report.records,
        report.buckets.len(),
        report.bucket_width
    );
    if let (Some(first), Some(last)) = (report.first_bucket, report.last_bucket) {
        let _ = writeln!(out, "from {} to {}", first, last);
    }
    out.push('\n');

    match &report.stats {
        Some(stats) => {
            let _ = writeln!(out, "{:<8}{:>16}{:>16}", "", "count", "size_kb");
            let counts = stat_values(&stats.count);
            let sizes = stat_values(&stats.size);
            for (i, label) in STAT_ROWS.iter().enumerate() {
                let _ = writeln!(out, "{:<8}{:>16.6}{:>16.6}", label, counts[i], sizes[i]);
            }
        }
        None => out.push_str("no records\n"),
    }
    out.push('\n');

    let monitor = &report.monitor;
    let (peak_count, peak_size) = monitor.peak_utilisation();
    let _ = writeln!(
        out,
        "ceilings per bucket: {} records, {} KB",
        monitor.count_limit, monitor.size_limit
    );
    let _ = writeln!(
        out,
        "peak utilisation: {:.1}% count, {:.1}% size",
        peak_count * 100.0,
        peak_size * 100.0
    );
    let _ = writeln!(out, "buckets over ceiling: {}", monitor.breach_count());
    for flag in monitor.breaches() {
        let _ = writeln!(
            out,
            "  {}  count={}{}  size_kb={:.3}{}",
            flag.start,
            flag.count,
            if flag.count_breached { " (over)" } else { "" },
            flag.total_size,
            if flag.size_breached { " (over)" } else { "" },
        );
    }

    if show_buckets && !report.buckets.is_empty() {
        out.push('\n');
        let _ = writeln!(out, "{:<34}{:>10}{:>16}  flag", "start", "count", "size_kb");
        for (bucket, flag) in report.buckets.iter().zip(&monitor.flags) {
            let _ = writeln!(
                out,
                "{:<34}{:>10}{:>16.3}  {}",
                bucket.start.to_rfc3339(),
                bucket.count,
                bucket.total_size,
                if flag.breached() { "!" } else { "" }
            );
        }
    }

    out
}

#[derive(Serialize)]
struct JsonView<'a> {
    records: usize,
    bucket_width_secs: f64,
    first_bucket: Option<DateTime<Utc>>,
    last_bucket: Option<DateTime<Utc>>,
    stats: &'a Option<BucketStats>,
    count_limit: f64,
    size_limit: f64,
    breach_count: usize,
    breaches: Vec<&'a crate::monitor::BucketFlag>,
    #[serde(skip_serializing_if = "Option::is_none")]
    buckets: Option<&'a [Bucket]>,
}

/// JSON report; `std` of a single bucket serialises as `null`
pub fn render_json(report: &AnalysisReport, show_buckets: bool) -> Result<String> {
    let view = JsonView {
        records: report.records,
        bucket_width_secs: report.bucket_width.as_secs_f64(),
        first_bucket: report.first_bucket,
        last_bucket: report.last_bucket,
        stats: &report.stats,
        count_limit: report.monitor.count_limit,
        size_limit: report.monitor.size_limit,
        breach_count: report.monitor.breach_count(),
        breaches: report.monitor.breaches().collect(),
        buckets: show_buckets.then_some(report.buckets.as_slice()),
    };
    serde_json::to_string_pretty(&view)
        .map_err(|e| ProbeError::Other(anyhow::anyhow!("failed to serialise report: {}", e)))
}
