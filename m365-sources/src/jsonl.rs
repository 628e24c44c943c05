//! Newline-delimited JSON telemetry logs
//!
//! The emulator appends one compact record per line. Logs may also carry
//! event markers (`{"marker": ...}`) and the odd truncated line; malformed
//! lines are skipped with a warning instead of failing the whole read.

use anyhow::{Context, Result};
use chrono::Utc;
use m365_core::model::{is_marker, TelemetryRow};
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// One decoded log line
#[derive(Debug, Clone, PartialEq)]
pub enum LogEntry {
    Marker(Value),
    Telemetry(Value),
}

impl LogEntry {
    pub fn classify(raw: Value) -> Self {
        if is_marker(&raw) {
            LogEntry::Marker(raw)
        } else {
            LogEntry::Telemetry(raw)
        }
    }

    pub fn value(&self) -> &Value {
        match self {
            LogEntry::Marker(v) | LogEntry::Telemetry(v) => v,
        }
    }

    pub fn is_marker(&self) -> bool {
        matches!(self, LogEntry::Marker(_))
    }
}

/// Streaming NDJSON reader, yields entries in file order
pub struct JsonlReader<R> {
    lines: std::io::Lines<R>,
    line_no: usize,
    skipped: usize,
}

impl<R: BufRead> JsonlReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
            skipped: 0,
        }
    }

    /// Lines dropped so far as malformed
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl JsonlReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open log file: {}", path.display()))?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> Iterator for JsonlReader<R> {
    type Item = Result<LogEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    return Some(Err(anyhow::Error::new(e).context("Failed to read log line")))
                }
            };
            self.line_no += 1;

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str::<Value>(line) {
                Ok(raw) => return Some(Ok(LogEntry::classify(raw))),
                Err(e) => {
                    self.skipped += 1;
                    tracing::warn!("Skipping malformed line {}: {}", self.line_no, e);
                }
            }
        }
    }
}

/// Load the telemetry rows of a log, markers excluded, sorted by time
pub fn load_rows(path: impl AsRef<Path>) -> Result<Vec<TelemetryRow>> {
    let path = path.as_ref();
    let now = Utc::now();
    let mut rows = Vec::new();

    for entry in JsonlReader::open(path)? {
        let LogEntry::Telemetry(raw) = entry? else {
            continue;
        };
        match TelemetryRow::from_value(&raw, now) {
            Ok(row) => rows.push(row),
            Err(e) => tracing::warn!("Skipping record in {}: {}", path.display(), e),
        }
    }

    rows.sort_by_key(|row| row.ts);
    Ok(rows)
}
