//! Command-line interface
//!
//! Flags override values loaded from `--config`, which in turn override the
//! built-in defaults.

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{ProbeConfig, ReportConfig};
use crate::error::{ProbeError, Result};

/// Sample records from one Kinesis shard and check their arrival rate
/// against per-shard capacity.
///
/// Examples:
///   shard-rate pull --stream orders -n 500 --lookback-hours 1
///   shard-rate pull --stream orders --since 2023-07-10T10:00:00Z --append
///   shard-rate report --file orders.csv --bucket-secs 1 --show-buckets
#[derive(Parser, Debug)]
#[command(name = "shard-rate", author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Logging verbosity (trace, debug, info, warn, error) or a full filter directive
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Read records from a shard into a record log
    Pull(PullArgs),
    /// Bucket a record log and check it against capacity ceilings
    Report(ReportArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct PullArgs {
    /// Stream to read
    #[arg(long, value_name = "NAME", env = "SHARD_RATE_STREAM")]
    pub stream: Option<String>,

    /// Record budget for the session
    #[arg(short = 'n', long, value_name = "COUNT")]
    pub max_records: Option<usize>,

    /// Records requested per call
    #[arg(long, value_name = "COUNT")]
    pub page_size: Option<i32>,

    /// Shard to read; the first listed shard by default
    #[arg(long, value_name = "SHARD_ID")]
    pub shard: Option<String>,

    /// Start reading at this time (RFC 3339)
    #[arg(long, value_name = "RFC3339", conflicts_with = "lookback_hours")]
    pub since: Option<DateTime<Utc>>,

    /// Start reading this many hours before now
    #[arg(long, value_name = "HOURS")]
    pub lookback_hours: Option<f64>,

    /// Wall-clock limit for the session
    #[arg(long, value_name = "SECS", conflicts_with = "no_deadline")]
    pub deadline_secs: Option<u64>,

    /// Run until the budget is reached or the shard closes
    #[arg(long)]
    pub no_deadline: bool,

    /// Stop on the first empty page that reports no lag
    #[arg(long)]
    pub stop_when_caught_up: bool,

    /// Record log path; <stream>.csv by default
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Append to an existing record log instead of replacing it
    #[arg(long)]
    pub append: bool,

    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl PullArgs {
    /// Merge flags over the config file (or defaults) and validate the result
    pub fn resolve(&self) -> Result<ProbeConfig> {
        let mut config = load_config(self.config.as_ref())?;

        if let Some(stream) = &self.stream {
            config.stream_name = stream.clone();
        }
        if let Some(n) = self.max_records {
            config.fetch.max_records = n;
        }
        if let Some(page_size) = self.page_size {
            config.fetch.page_size = page_size;
        }
        if let Some(shard) = &self.shard {
            config.shard_id = Some(shard.clone());
        }
        if let Some(since) = self.since {
            config.since = Some(since);
        }
        if let Some(hours) = self.lookback_hours {
            config.lookback = Duration::try_from_secs_f64(hours * 3600.0).map_err(|_| {
                ProbeError::ConfigError(format!("invalid lookback of {} hours", hours))
            })?;
            config.since = None;
        }
        if let Some(secs) = self.deadline_secs {
            config.fetch.deadline = Some(Duration::from_secs(secs));
        }
        if self.no_deadline {
            config.fetch.deadline = None;
        }
        if self.stop_when_caught_up {
            config.fetch.stop_when_caught_up = true;
        }
        if let Some(output) = &self.output {
            config.output = Some(output.clone());
        }

        config.validate_pull()?;
        Ok(config)
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Args, Debug, Clone)]
pub struct ReportArgs {
    /// Record log to analyse
    #[arg(short, long, value_name = "FILE")]
    pub file: PathBuf,

    /// Bucket width in seconds; fractions allowed
    #[arg(long, value_name = "SECS")]
    pub bucket_secs: Option<f64>,

    /// Records per second per shard
    #[arg(long, value_name = "COUNT")]
    pub count_ceiling: Option<u64>,

    /// Kilobytes per second per shard
    #[arg(long, value_name = "KB")]
    pub size_ceiling_kb: Option<f64>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// List every bucket, not just the ones over a ceiling
    #[arg(long)]
    pub show_buckets: bool,

    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl ReportArgs {
    pub fn resolve(&self) -> Result<ReportConfig> {
        let mut report = load_config(self.config.as_ref())?.report;

        if let Some(secs) = self.bucket_secs {
            report.bucket_width = Duration::try_from_secs_f64(secs).map_err(|_| {
                ProbeError::ConfigError(format!("invalid bucket width of {} seconds", secs))
            })?;
        }
        if let Some(count) = self.count_ceiling {
            report.ceilings.count_per_second = count;
        }
        if let Some(kb) = self.size_ceiling_kb {
            report.ceilings.size_kb_per_second = kb;
        }

        report.validate()?;
        Ok(report)
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<ProbeConfig> {
    match path {
        Some(path) => ProbeConfig::load(path),
        None => Ok(ProbeConfig::default()),
    }
}
