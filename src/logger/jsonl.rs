//! JSONL activity log: append-only line-delimited JSON with rotation.
//!
//! Each record is serialised into one buffer and written with a single
//! `write_all`, so a concurrent `tail -f` never sees half a line.
//!
//! When the primary path cannot be written the writer degrades one level at a
//! time: fallback path, then stderr with a `[DK-JSONL]` prefix, then silent
//! discard. Logging must never fail a retention pass or a lock operation.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::config::LoggingConfig;
use crate::core::errors::{DkError, Result};

/// Severity level for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Record kinds written to the activity log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ScanComplete,
    TraversalFailed,
    ArtifactEvict,
    ArtifactEvictFailed,
    ArtifactVanished,
    DirPrune,
    PassComplete,
    LockChange,
    LockFailed,
}

/// One JSONL record; everything except `ts`, `event` and `severity` is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// RFC 3339 UTC timestamp with millisecond precision.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dry_run: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// Create a new entry stamped with the current UTC time.
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            event,
            severity,
            path: None,
            size: None,
            count: None,
            remaining_size: None,
            remaining_count: None,
            mode: None,
            duration_ms: None,
            dry_run: None,
            error_code: None,
            error_message: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: &Path) -> Self {
        self.path = Some(path.to_string_lossy().into_owned());
        self
    }
}

/// Degradation state of the writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Primary,
    Fallback,
    Stderr,
    Discard,
}

impl SinkState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Fallback => "fallback",
            Self::Stderr => "stderr",
            Self::Discard => "discard",
        }
    }
}

/// Configuration for the JSONL writer.
#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    pub fallback_path: Option<PathBuf>,
    /// Rotate once the current file would grow past this many bytes.
    pub max_size_bytes: u64,
    /// Rotated generations kept (`.1` newest … `.N` oldest).
    pub max_rotated_files: u32,
}

impl From<&LoggingConfig> for JsonlConfig {
    fn from(cfg: &LoggingConfig) -> Self {
        Self {
            path: cfg.jsonl_path.clone(),
            fallback_path: cfg.fallback_path.clone(),
            max_size_bytes: cfg.max_size_bytes,
            max_rotated_files: cfg.max_rotated_files.max(1),
        }
    }
}

/// Append-only JSONL writer with rotation and multi-level fallback.
pub struct JsonlWriter {
    config: JsonlConfig,
    writer: Option<BufWriter<File>>,
    state: SinkState,
    bytes_written: u64,
}

impl JsonlWriter {
    /// Open the log. Never fails: an unwritable path degrades the sink instead.
    pub fn open(config: JsonlConfig) -> Self {
        let mut writer = Self {
            config,
            writer: None,
            state: SinkState::Discard,
            bytes_written: 0,
        };
        match open_append(&writer.config.path) {
            Ok((file, size)) => writer.attach(file, size, SinkState::Primary),
            Err(_) => writer.open_fallback(),
        }
        writer
    }

    /// Serialise and append one record.
    pub fn write_entry(&mut self, entry: &LogEntry) {
        match serde_json::to_string(entry) {
            Ok(json) => self.write_line(&format!("{json}\n")),
            Err(e) => {
                let _ = writeln!(io::stderr(), "[DK-JSONL] serialize error: {e}");
            }
        }
    }

    pub fn flush(&mut self) {
        if let Some(w) = self.writer.as_mut() {
            let _ = w.flush();
        }
    }

    pub const fn state(&self) -> SinkState {
        self.state
    }

    pub const fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn attach(&mut self, file: File, size: u64, state: SinkState) {
        self.writer = Some(BufWriter::new(file));
        self.bytes_written = size;
        self.state = state;
    }

    fn current_path(&self) -> Option<&Path> {
        match self.state {
            SinkState::Primary => Some(&self.config.path),
            SinkState::Fallback => self.config.fallback_path.as_deref(),
            SinkState::Stderr | SinkState::Discard => None,
        }
    }

    fn write_line(&mut self, line: &str) {
        let len = line.len() as u64;
        if self.writer.is_some() && self.bytes_written + len > self.config.max_size_bytes {
            self.rotate();
        }

        match self.state {
            SinkState::Primary | SinkState::Fallback => {
                let ok = self.writer.as_mut().is_some_and(|w| {
                    w.write_all(line.as_bytes()).is_ok() && w.flush().is_ok()
                });
                if ok {
                    self.bytes_written += len;
                } else {
                    self.degrade();
                    self.write_line(line);
                }
            }
            SinkState::Stderr => {
                if write!(io::stderr(), "[DK-JSONL] {line}").is_err() {
                    self.state = SinkState::Discard;
                }
            }
            SinkState::Discard => {}
        }
    }

    fn open_fallback(&mut self) {
        self.writer = None;
        let opened = self
            .config
            .fallback_path
            .as_deref()
            .and_then(|fb| open_append(fb).ok());
        if let Some((file, size)) = opened {
            let _ = writeln!(io::stderr(), "[DK-JSONL] primary log path failed, using fallback");
            self.attach(file, size, SinkState::Fallback);
        } else {
            let _ = writeln!(io::stderr(), "[DK-JSONL] no writable log path, using stderr");
            self.state = SinkState::Stderr;
        }
    }

    fn degrade(&mut self) {
        self.writer = None;
        match self.state {
            SinkState::Primary => self.open_fallback(),
            SinkState::Fallback => self.state = SinkState::Stderr,
            SinkState::Stderr | SinkState::Discard => self.state = SinkState::Discard,
        }
    }

    /// Shift `file.N-1 → file.N … file → file.1` and reopen a fresh file.
    fn rotate(&mut self) {
        self.flush();
        self.writer = None;
        let Some(base) = self.current_path().map(Path::to_path_buf) else {
            return;
        };

        let keep = self.config.max_rotated_files;
        let _ = fs::remove_file(rotated_name(&base, keep));
        for i in (1..keep).rev() {
            let _ = fs::rename(rotated_name(&base, i), rotated_name(&base, i + 1));
        }
        let _ = fs::rename(&base, rotated_name(&base, 1));

        match open_append(&base) {
            Ok((file, _)) => {
                let state = self.state;
                self.attach(file, 0, state);
            }
            Err(_) => self.degrade(),
        }
    }
}

/// Open or create a file for appending. Returns `(File, current_size)`.
fn open_append(path: &Path) -> Result<(File, u64)> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|source| DkError::io(parent, source))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| DkError::io(path, source))?;
    let size = file.metadata().map_or(0, |m| m.len());
    Ok((file, size))
}

/// `foo.jsonl` → `foo.jsonl.3`.
fn rotated_name(base: &Path, index: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}
