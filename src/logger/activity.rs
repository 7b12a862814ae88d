//! Typed activity events and the shared handle components log through.
//!
//! Components receive an `Option<ActivityLogger>` at construction; `None`
//! disables logging entirely. Writes are synchronous: nothing in this crate
//! spawns a logging thread.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::config::LoggingConfig;
use crate::core::errors::FailureRecord;
use crate::lock::LockMode;
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity, SinkState};

/// Events emitted by the retention engine and lockable files.
#[derive(Debug, Clone, PartialEq)]
pub enum ActivityEvent {
    ScanCompleted {
        root: PathBuf,
        entries: usize,
        failures: usize,
        duration_ms: u64,
    },
    TraversalFailed {
        failure: FailureRecord,
    },
    ArtifactEvicted {
        path: PathBuf,
        size_bytes: u64,
        dry_run: bool,
    },
    ArtifactEvictionFailed {
        failure: FailureRecord,
    },
    ArtifactVanished {
        path: PathBuf,
        size_bytes: u64,
    },
    DirectoryPruned {
        path: PathBuf,
    },
    PassCompleted {
        root: PathBuf,
        evicted: usize,
        bytes_evicted: u64,
        remaining_count: usize,
        remaining_size_bytes: u64,
        dry_run: bool,
        duration_ms: u64,
    },
    LockChanged {
        path: PathBuf,
        from: LockMode,
        to: LockMode,
    },
    LockFailed {
        path: PathBuf,
        mode: LockMode,
        error_code: String,
        message: String,
    },
}

impl ActivityEvent {
    /// Flatten into the on-disk record shape.
    pub fn to_entry(&self) -> LogEntry {
        match self {
            Self::ScanCompleted {
                root,
                entries,
                failures,
                duration_ms,
            } => {
                let mut e = LogEntry::new(EventType::ScanComplete, Severity::Info).with_path(root);
                e.count = Some(*entries as u64);
                e.duration_ms = Some(*duration_ms);
                e.details = Some(format!("{failures} traversal failures"));
                e
            }
            Self::TraversalFailed { failure } => {
                failure_entry(EventType::TraversalFailed, Severity::Warning, failure)
            }
            Self::ArtifactEvicted {
                path,
                size_bytes,
                dry_run,
            } => {
                let mut e = LogEntry::new(EventType::ArtifactEvict, Severity::Info).with_path(path);
                e.size = Some(*size_bytes);
                e.dry_run = Some(*dry_run);
                e
            }
            Self::ArtifactEvictionFailed { failure } => {
                failure_entry(EventType::ArtifactEvictFailed, Severity::Warning, failure)
            }
            Self::ArtifactVanished { path, size_bytes } => {
                let mut e =
                    LogEntry::new(EventType::ArtifactVanished, Severity::Info).with_path(path);
                e.size = Some(*size_bytes);
                e
            }
            Self::DirectoryPruned { path } => {
                LogEntry::new(EventType::DirPrune, Severity::Info).with_path(path)
            }
            Self::PassCompleted {
                root,
                evicted,
                bytes_evicted,
                remaining_count,
                remaining_size_bytes,
                dry_run,
                duration_ms,
            } => {
                let mut e = LogEntry::new(EventType::PassComplete, Severity::Info).with_path(root);
                e.count = Some(*evicted as u64);
                e.size = Some(*bytes_evicted);
                e.remaining_count = Some(*remaining_count as u64);
                e.remaining_size = Some(*remaining_size_bytes);
                e.dry_run = Some(*dry_run);
                e.duration_ms = Some(*duration_ms);
                e
            }
            Self::LockChanged { path, from, to } => {
                let mut e = LogEntry::new(EventType::LockChange, Severity::Info).with_path(path);
                e.mode = Some(to.as_str().to_string());
                e.details = Some(format!("{from} -> {to}"));
                e
            }
            Self::LockFailed {
                path,
                mode,
                error_code,
                message,
            } => {
                let mut e = LogEntry::new(EventType::LockFailed, Severity::Warning).with_path(path);
                e.mode = Some(mode.as_str().to_string());
                e.error_code = Some(error_code.clone());
                e.error_message = Some(message.clone());
                e
            }
        }
    }
}

fn failure_entry(event: EventType, severity: Severity, failure: &FailureRecord) -> LogEntry {
    let mut e = LogEntry::new(event, severity).with_path(&failure.path);
    e.error_code = Some(failure.error_code.clone());
    e.error_message = Some(failure.error.clone());
    e
}

/// Cheaply cloneable handle to one shared JSONL sink.
#[derive(Clone)]
pub struct ActivityLogger {
    sink: Arc<Mutex<JsonlWriter>>,
}

impl std::fmt::Debug for ActivityLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityLogger")
            .field("state", &self.state().as_str())
            .finish()
    }
}

impl ActivityLogger {
    pub fn open(config: JsonlConfig) -> Self {
        Self {
            sink: Arc::new(Mutex::new(JsonlWriter::open(config))),
        }
    }

    /// Build from the `[logging]` section; `None` when logging is disabled.
    pub fn from_config(config: &LoggingConfig) -> Option<Self> {
        config
            .enabled
            .then(|| Self::open(JsonlConfig::from(config)))
    }

    pub fn send(&self, event: &ActivityEvent) {
        self.sink.lock().write_entry(&event.to_entry());
    }

    pub fn state(&self) -> SinkState {
        self.sink.lock().state()
    }

    pub fn flush(&self) {
        self.sink.lock().flush();
    }
}

/// Send `event` if a logger is configured.
pub(crate) fn emit(logger: Option<&ActivityLogger>, event: &ActivityEvent) {
    if let Some(logger) = logger {
        logger.send(event);
    }
}
