//! Configuration for pull sessions and reports
//!
//! Every setting has a default, so a config file is optional. When one is given
//! it is TOML shaped like [`ProbeConfig`]; durations are written as integer
//! milliseconds or seconds, as named by each key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ProbeError, Result};
use crate::monitor::Ceilings;
use crate::retry::RetryConfig;

/// Hard limit on `GetRecords` page size imposed by the provider
pub const MAX_PAGE_SIZE: i32 = 10_000;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Name of the stream to sample
    pub stream_name: String,
    /// Shard to read; the first listed shard when unset
    pub shard_id: Option<String>,
    /// Explicit anchor timestamp; takes precedence over `lookback`
    pub since: Option<DateTime<Utc>>,
    /// How far before now to anchor when `since` is unset
    #[serde(with = "secs", rename = "lookback_secs")]
    pub lookback: Duration,
    /// Record log path; `<stream_name>.csv` when unset
    pub output: Option<PathBuf>,
    pub fetch: FetchConfig,
    pub retry: RetryConfig,
    pub report: ReportConfig,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            stream_name: String::new(),
            shard_id: None,
            since: None,
            lookback: Duration::from_secs(21 * 60 * 60),
            output: None,
            fetch: FetchConfig::default(),
            retry: RetryConfig::default(),
            report: ReportConfig::default(),
        }
    }
}

/// Settings for the bounded fetch loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Record budget for one pull session
    pub max_records: usize,
    /// Maximum number of records to request per GetRecords call
    pub page_size: i32,
    /// Wait after a page that came back empty
    #[serde(with = "millis", rename = "poll_interval_ms")]
    pub poll_interval: Duration,
    /// Wall-clock limit for one pull session (None for no limit)
    #[serde(with = "opt_secs", rename = "deadline_secs")]
    pub deadline: Option<Duration>,
    /// Timeout for each call to the provider
    #[serde(with = "millis", rename = "api_timeout_ms")]
    pub api_timeout: Duration,
    /// End the session on an empty page that reports zero lag
    pub stop_when_caught_up: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_records: 10,
            page_size: 10,
            poll_interval: Duration::from_millis(200),
            deadline: Some(Duration::from_secs(300)),
            api_timeout: Duration::from_secs(30),
            stop_when_caught_up: false,
        }
    }
}

/// Settings for log analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    #[serde(with = "millis", rename = "bucket_width_ms")]
    pub bucket_width: Duration,
    pub ceilings: Ceilings,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            bucket_width: Duration::from_secs(1),
            ceilings: Ceilings::default(),
        }
    }
}

impl ProbeConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProbeError::ConfigError(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
            .map_err(|e| ProbeError::ConfigError(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Check the settings needed by a pull session
    pub fn validate_pull(&self) -> Result<()> {
        if self.stream_name.trim().is_empty() {
            return Err(ProbeError::ConfigError("stream name is required".into()));
        }
        self.fetch.validate()
    }

    /// Anchor timestamp for the pull, relative to `now` unless pinned by `since`
    pub fn anchor(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        if let Some(since) = self.since {
            return Ok(since);
        }
        let lookback = chrono::Duration::from_std(self.lookback)
            .map_err(|e| ProbeError::ConfigError(format!("lookback out of range: {}", e)))?;
        now.checked_sub_signed(lookback)
            .ok_or_else(|| ProbeError::ConfigError("lookback reaches before the epoch".into()))
    }

    pub fn output_path(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}.csv", self.stream_name)))
    }
}

impl FetchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_records == 0 {
            return Err(ProbeError::ConfigError(
                "max_records must be at least 1".into(),
            ));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&self.page_size) {
            return Err(ProbeError::ConfigError(format!(
                "page_size must be between 1 and {}, got {}",
                MAX_PAGE_SIZE, self.page_size
            )));
        }
        if self.api_timeout.is_zero() {
            return Err(ProbeError::ConfigError("api_timeout must be non-zero".into()));
        }
        Ok(())
    }
}

impl ReportConfig {
    pub fn validate(&self) -> Result<()> {
        if self.bucket_width.is_zero() {
            return Err(ProbeError::ConfigError("bucket width must be non-zero".into()));
        }
        self.ceilings.validate()
    }
}

/// Serde adapter for `Duration` as integer milliseconds
pub(crate) mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Serde adapter for `Duration` as integer seconds
pub(crate) mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

pub(crate) mod opt_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|v| v.map(Duration::from_secs))
    }
}
