use anyhow::Result;
use chrono::{FixedOffset, TimeZone, Utc};
use pretty_assertions::assert_eq;
use std::time::Duration;

use crate::aggregate::aggregate;
use crate::config::ReportConfig;
use crate::log::{parse_log, LogRecord};
use crate::monitor::{evaluate, Ceilings};
use crate::report::analyse;

fn burst(second: u32, count: usize, size_kb: f64) -> Vec<LogRecord> {
    let start = Utc.with_ymd_and_hms(2023, 7, 10, 10, 0, second).unwrap();
    (0..count)
        .map(|i| {
            let at = start + chrono::Duration::microseconds((i as i64 * 999_000) / count as i64);
            LogRecord::new(at.fixed_offset(), size_kb)
        })
        .collect()
}

#[test]
fn test_count_ceiling_breach_is_strict() -> Result<()> {
    let mut records = burst(0, 1200, 0.1);
    records.extend(burst(1, 999, 0.1));
    records.extend(burst(2, 1000, 0.1));

    let buckets = aggregate(&records, Duration::from_secs(1))?;
    let counts: Vec<u64> = buckets.iter().map(|b| b.count).collect();
    assert_eq!(counts, vec![1200, 999, 1000]);

    let report = evaluate(&buckets, Duration::from_secs(1), &Ceilings::default());
    let flags: Vec<bool> = report.flags.iter().map(|f| f.count_breached).collect();
    assert_eq!(flags, vec![true, false, false]);
    assert_eq!(report.breach_count(), 1);
    Ok(())
}

#[test]
fn test_size_ceiling_scales_with_width() -> Result<()> {
    // 600 KB in each of two consecutive seconds
    let mut records = burst(0, 6, 100.0);
    records.extend(burst(1, 6, 100.0));

    let config = ReportConfig {
        bucket_width: Duration::from_secs(1),
        ceilings: Ceilings::new(1000, 1024.0),
    };
    assert!(!analyse(&records, &config)?.monitor.any_breach());

    let config = ReportConfig {
        bucket_width: Duration::from_secs(2),
        ceilings: Ceilings::new(1000, 512.0),
    };
    let report = analyse(&records, &config)?;
    assert_eq!(report.buckets.len(), 1);
    assert_eq!(report.monitor.size_limit, 1024.0);
    assert!(report.monitor.flags[0].size_breached);
    assert!(!report.monitor.flags[0].count_breached);
    Ok(())
}

#[test]
fn test_log_with_mixed_offsets() -> Result<()> {
    let input = "date,event_size\n\
                 2023-07-10 11:00:00.100000+01:00,1.5\n\
                 2023-07-10 05:00:00.600000-05:00,2.5\n\
                 2023-07-10T10:00:01.200Z,4\n";
    let records = parse_log(input.as_bytes())?;
    let buckets = aggregate(&records, Duration::from_secs(1))?;

    let rows: Vec<(u64, f64)> = buckets.iter().map(|b| (b.count, b.total_size)).collect();
    assert_eq!(rows, vec![(2, 4.0), (1, 4.0)]);
    assert_eq!(
        buckets[0].start,
        Utc.with_ymd_and_hms(2023, 7, 10, 10, 0, 0).unwrap()
    );
    Ok(())
}

#[test]
fn test_empty_log_uses_configured_width() -> Result<()> {
    let config = ReportConfig {
        bucket_width: Duration::from_secs(10),
        ceilings: Ceilings::default(),
    };
    let report = analyse(&[], &config)?;
    assert!(report.buckets.is_empty());
    assert_eq!(report.monitor.count_limit, 10_000.0);
    assert_eq!(report.monitor.size_limit, 10_240.0);
    Ok(())
}

#[test]
fn test_analysis_is_idempotent() -> Result<()> {
    let offset = FixedOffset::east_opt(2 * 3600).unwrap();
    let records: Vec<LogRecord> = (0..50)
        .map(|i| {
            let at = offset.with_ymd_and_hms(2023, 7, 10, 12, 0, 0).unwrap()
                + chrono::Duration::milliseconds(i * 370);
            LogRecord::new(at, (i % 7) as f64 * 0.25)
        })
        .collect();

    let config = ReportConfig {
        bucket_width: Duration::from_millis(500),
        ceilings: Ceilings::default(),
    };
    let first = analyse(&records, &config)?;
    let second = analyse(&records, &config)?;
    assert_eq!(first.buckets, second.buckets);
    assert_eq!(first.monitor, second.monitor);
    assert_eq!(first.buckets.iter().map(|b| b.count).sum::<u64>(), 50);
    Ok(())
}
