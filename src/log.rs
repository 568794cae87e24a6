//! The persisted record log
//!
//! A two-column CSV, one row per delivered record:
//!
//! ```text
//! date,event_size
//! 2023-07-09 13:44:57.096000+00:00,3.451171875
//! ```
//!
//! `date` is the arrival time with microseconds and a UTC offset, `event_size`
//! the payload size in kilobytes. The writer always emits UTC; the reader
//! accepts any offset and a few equivalent spellings of it.

use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::client::StreamRecord;
use crate::error::{ProbeError, Result};

pub const HEADER: &str = "date,event_size";

/// Format used when writing the `date` column
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f%:z";

const ACCEPTED_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%.f%z"];

pub const BYTES_PER_KB: f64 = 1024.0;

/// One row of the record log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub arrival: DateTime<FixedOffset>,
    pub size_kb: f64,
}

impl LogRecord {
    pub fn new(arrival: DateTime<FixedOffset>, size_kb: f64) -> Self {
        Self { arrival, size_kb }
    }

    pub fn from_stream_record(record: &StreamRecord) -> Self {
        Self {
            arrival: record.arrival.fixed_offset(),
            size_kb: record.size_bytes as f64 / BYTES_PER_KB,
        }
    }

    pub fn to_row(&self) -> String {
        format!("{},{}", self.arrival.format(TIMESTAMP_FORMAT), self.size_kb)
    }

    /// Parse one data row; `line` is only used for error reporting
    pub fn parse_row(row: &str, line: usize) -> Result<Self> {
        let (date, size) = row
            .split_once(',')
            .ok_or_else(|| ProbeError::parse(line, format!("expected 2 columns in {:?}", row)))?;

        let arrival = parse_timestamp(date.trim())
            .ok_or_else(|| ProbeError::parse(line, format!("unrecognised timestamp {:?}", date)))?;

        let size_kb: f64 = size
            .trim()
            .parse()
            .map_err(|e| ProbeError::parse(line, format!("bad event_size {:?}: {}", size, e)))?;
        if !size_kb.is_finite() || size_kb < 0.0 {
            return Err(ProbeError::parse(
                line,
                format!("event_size must be a non-negative number, got {}", size_kb),
            ));
        }

        Ok(Self { arrival, size_kb })
    }
}

/// Parse a log timestamp, accepting `+HH:MM`, `+HHMM` and RFC 3339 forms
pub fn parse_timestamp(s: &str) -> Option<DateTime<FixedOffset>> {
    ACCEPTED_FORMATS
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(s, fmt).ok())
        .or_else(|| DateTime::parse_from_rfc3339(s).ok())
}

/// Destination for records delivered by a pull session
pub trait RecordSink {
    fn append(&mut self, record: &StreamRecord) -> Result<()>;

    /// Make everything appended so far durable
    fn flush(&mut self) -> Result<()>;
}

impl RecordSink for Vec<LogRecord> {
    fn append(&mut self, record: &StreamRecord) -> Result<()> {
        self.push(LogRecord::from_stream_record(record));
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Append-only CSV writer for the record log
pub struct RecordLogWriter<W: Write> {
    inner: BufWriter<W>,
    path: Option<PathBuf>,
    rows: usize,
}

impl RecordLogWriter<File> {
    /// Create (or truncate) the log at `path` and write the header
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        info!(path = %path.display(), "Created record log");
        let mut writer = Self::new(file)?;
        writer.path = Some(path.to_path_buf());
        Ok(writer)
    }

    /// Open the log at `path` for appending.
    ///
    /// A file without a header gets one. An existing header must match
    /// [`HEADER`], and a trailing partial row is terminated so the next row
    /// starts on its own line.
    pub fn open_append(path: &Path) -> Result<Self> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let fresh = !has_header(BufReader::new(&mut file))?;
        let unterminated = !fresh && last_byte(&mut file)? != Some(b'\n');

        let mut writer = Self {
            inner: BufWriter::new(file),
            path: Some(path.to_path_buf()),
            rows: 0,
        };
        if unterminated {
            warn!(path = %path.display(), "Record log ends mid-row, terminating it");
            writeln!(writer.inner)?;
        }
        if fresh {
            writeln!(writer.inner, "{}", HEADER)?;
        }
        info!(path = %path.display(), fresh, "Opened record log for append");
        Ok(writer)
    }
}

fn last_byte(file: &mut File) -> Result<Option<u8>> {
    if file.metadata()?.len() == 0 {
        return Ok(None);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(Some(last[0]))
}

fn is_header(trimmed: &str) -> bool {
    trimmed.trim_start_matches('\u{feff}') == HEADER
}

fn header_error(line: usize, found: &str) -> ProbeError {
    ProbeError::parse(line, format!("expected header {:?}, found {:?}", HEADER, found))
}

/// A row that cannot be read as text is a malformed row, not an I/O failure
fn read_error(line: usize, err: std::io::Error) -> ProbeError {
    if err.kind() == ErrorKind::InvalidData {
        ProbeError::parse(line, format!("row is not valid UTF-8: {}", err))
    } else {
        ProbeError::Io(err)
    }
}

/// Whether the first non-blank line is the log header; any other first line is an error
fn has_header<R: BufRead>(reader: R) -> Result<bool> {
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| read_error(idx + 1, e))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if !is_header(trimmed) {
            return Err(header_error(idx + 1, trimmed));
        }
        return Ok(true);
    }
    Ok(false)
}

impl<W: Write> RecordLogWriter<W> {
    pub fn new(writer: W) -> Result<Self> {
        let mut inner = BufWriter::new(writer);
        writeln!(inner, "{}", HEADER)?;
        Ok(Self {
            inner,
            path: None,
            rows: 0,
        })
    }

    pub fn append_row(&mut self, record: &LogRecord) -> Result<()> {
        writeln!(self.inner, "{}", record.to_row())?;
        self.rows += 1;
        Ok(())
    }

    /// Rows written by this writer, header excluded
    pub fn rows_written(&self) -> usize {
        self.rows
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn into_inner(self) -> Result<W> {
        self.inner
            .into_inner()
            .map_err(|e| ProbeError::Io(e.into_error()))
    }
}

impl<W: Write> RecordSink for RecordLogWriter<W> {
    fn append(&mut self, record: &StreamRecord) -> Result<()> {
        self.append_row(&LogRecord::from_stream_record(record))
    }

    fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }
}

/// Read every row of a record log
pub fn read_log(path: &Path) -> Result<Vec<LogRecord>> {
    let file = File::open(path)?;
    let records = parse_log(BufReader::new(file))?;
    debug!(path = %path.display(), rows = records.len(), "Read record log");
    Ok(records)
}

/// Parse a record log from any buffered reader; blank lines are skipped
pub fn parse_log<R: BufRead>(reader: R) -> Result<Vec<LogRecord>> {
    let mut records = Vec::new();
    let mut saw_header = false;

    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.map_err(|e| read_error(line_no, e))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if !saw_header {
            if !is_header(trimmed) {
                return Err(header_error(line_no, trimmed));
            }
            saw_header = true;
            continue;
        }

        records.push(LogRecord::parse_row(trimmed, line_no)?);
    }

    if !saw_header {
        return Err(ProbeError::parse(0, "record log is empty"));
    }

    Ok(records)
}
