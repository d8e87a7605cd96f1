//! JSONL activity log: append-only line-delimited JSON.
//!
//! Each line is a self-contained JSON object. Lines are assembled in memory
//! and written atomically via `write_all` to prevent interleaved partial
//! lines when the file is being tailed by another process.
//!
//! Fallback chain: primary file path → stderr with `[FXL-JSONL]` prefix →
//! silent discard. A load simulation must never fail because of logging.

#![allow(missing_docs)]

use std::fs::{File, OpenOptions, rename};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Severity level for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Event types matching the fauxload activity model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SimulationStart,
    SimulationStop,
    LoadIncrease,
    LoadDecrease,
    LoadReject,
    ControlAdjust,
    OomFloor,
    ScheduleStart,
    ScheduleComplete,
    Error,
}

/// A single JSONL log entry — all fields optional except `ts`, `event`,
/// `severity`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// ISO 8601 UTC timestamp.
    pub ts: String,
    /// Event type identifier.
    pub event: EventType,
    /// Severity level.
    pub severity: Severity,
    /// Cumulative CPU target after the transition, percent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_pct: Option<u32>,
    /// Cumulative memory target after the transition, bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_bytes: Option<u64>,
    /// Cumulative disk throughput target, bytes/second.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_bps: Option<u64>,
    /// Cumulative network throughput target, bytes/second.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub net_bps: Option<u64>,
    /// Control loop: target the state asked for, percent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desired_pct: Option<u32>,
    /// Control loop: measured process CPU, percent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_pct: Option<f64>,
    /// Control loop: trim increments distributed this correction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trim_steps: Option<u32>,
    /// Memory simulator: bytes the target asked for when allocation failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_bytes: Option<u64>,
    /// Memory simulator: bytes actually held after the floor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub held_bytes: Option<u64>,
    /// Schedule: number of steps in the traversal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<usize>,
    /// Duration of the action in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// FXL error code if the action failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Freeform details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// Create a new entry stamped with the current UTC time.
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: format_utc_now(),
            event,
            severity,
            cpu_pct: None,
            memory_bytes: None,
            disk_bps: None,
            net_bps: None,
            desired_pct: None,
            actual_pct: None,
            trim_steps: None,
            requested_bytes: None,
            held_bytes: None,
            steps: None,
            duration_ms: None,
            error_code: None,
            details: None,
        }
    }
}

fn format_utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// JSONL writer configuration.
#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    /// Rotate (rename to `<path>.1`) once the file exceeds this size.
    pub max_size_bytes: u64,
}

/// Append-only JSONL writer with single-step rotation.
pub struct JsonlWriter {
    config: JsonlConfig,
    file: Option<BufWriter<File>>,
    written: u64,
}

impl JsonlWriter {
    /// Open (or create) the log file for appending. An unopenable path is not
    /// fatal: entries degrade to stderr.
    pub fn open(config: JsonlConfig) -> Self {
        let (file, written) = match open_append(&config.path) {
            Ok(pair) => pair,
            Err(err) => {
                eprintln!(
                    "[FXL-JSONL] cannot open {}: {err}; falling back to stderr",
                    config.path.display()
                );
                (None, 0)
            }
        };
        Self {
            config,
            file,
            written,
        }
    }

    /// Serialize and append one entry, rotating beforehand when over size.
    pub fn append(&mut self, entry: &LogEntry) {
        let Ok(mut line) = serde_json::to_string(entry) else {
            // Serialization of plain structs cannot realistically fail;
            // discard rather than loop on a poisoned entry.
            return;
        };
        line.push('\n');

        if self.written >= self.config.max_size_bytes {
            self.rotate();
        }

        if let Some(writer) = self.file.as_mut() {
            if writer.write_all(line.as_bytes()).and_then(|()| writer.flush()).is_ok() {
                self.written += line.len() as u64;
                return;
            }
            self.file = None;
        }
        eprint!("[FXL-JSONL] {line}");
    }

    fn rotate(&mut self) {
        self.file = None;
        let rotated = self.config.path.with_extension("jsonl.1");
        let _ = rename(&self.config.path, rotated);
        match open_append(&self.config.path) {
            Ok((file, written)) => {
                self.file = file;
                self.written = written;
            }
            Err(err) => {
                eprintln!(
                    "[FXL-JSONL] rotation reopen failed for {}: {err}",
                    self.config.path.display()
                );
                self.written = 0;
            }
        }
    }
}

fn open_append(path: &std::path::Path) -> std::io::Result<(Option<BufWriter<File>>, u64)> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let written = file.metadata().map(|m| m.len()).unwrap_or(0);
    Ok((Some(BufWriter::new(file)), written))
}
