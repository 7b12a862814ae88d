//! Read-only snapshot of the artifacts under a managed root.
//!
//! The walk uses an explicit work stack rather than call recursion, so a deep
//! tree cannot exhaust the thread stack. Symlinks are neither followed nor
//! collected. A directory that cannot be read (permission denied, removed
//! mid-walk) is recorded and skipped; the rest of the tree is still scanned.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};
use std::io;
use std::time::{Instant, SystemTime};

use crate::core::errors::{DkError, FailureRecord};
use crate::logger::activity::{ActivityEvent, ActivityLogger, emit};
use crate::retention::{ManagedEntry, PASS_LOCK_FILE};

/// Result of one scan: everything that could be read, plus what could not.
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub entries: Vec<ManagedEntry>,
    pub failures: Vec<FailureRecord>,
}

impl ScanOutcome {
    pub fn total_size_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.size_bytes).sum()
    }
}

/// Collects regular files whose name ends with a fixed suffix.
#[derive(Debug, Clone)]
pub struct DirectoryScanner {
    suffix: String,
    logger: Option<ActivityLogger>,
}

impl DirectoryScanner {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
            logger: None,
        }
    }

    #[must_use]
    pub fn with_logger(mut self, logger: Option<ActivityLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn matches(&self, name: &std::ffi::OsStr) -> bool {
        let name = name.to_string_lossy();
        name != PASS_LOCK_FILE && name.ends_with(self.suffix.as_str())
    }

    /// Walk every subdirectory of `root`. Never fails as a whole.
    pub fn scan(&self, root: &Path) -> ScanOutcome {
        let start = Instant::now();
        let mut outcome = ScanOutcome::default();
        let mut stack: Vec<PathBuf> = vec![root.to_path_buf()];

        while let Some(dir) = stack.pop() {
            let listing = match fs::read_dir(&dir) {
                Ok(listing) => listing,
                Err(source) => {
                    self.record(&mut outcome, DkError::Traversal { path: dir, source });
                    continue;
                }
            };

            for item in listing {
                let entry = match item {
                    Ok(entry) => entry,
                    Err(source) => {
                        self.record(
                            &mut outcome,
                            DkError::Traversal {
                                path: dir.clone(),
                                source,
                            },
                        );
                        continue;
                    }
                };

                let path = entry.path();
                // file_type() does not follow symlinks.
                let file_type = match entry.file_type() {
                    Ok(file_type) => file_type,
                    Err(source) => {
                        self.record(&mut outcome, DkError::Traversal { path, source });
                        continue;
                    }
                };
                if file_type.is_dir() {
                    stack.push(path);
                    continue;
                }
                if !file_type.is_file() || !self.matches(&entry.file_name()) {
                    continue;
                }

                let observed = entry
                    .metadata()
                    .map(|meta| (meta.len(), meta.modified()));
                match observed {
                    Ok((size_bytes, modified)) => match managed_entry(path, size_bytes, modified) {
                        Ok(managed) => outcome.entries.push(managed),
                        Err(err) => self.record(&mut outcome, err),
                    },
                    Err(source) => self.record(&mut outcome, DkError::Traversal { path, source }),
                }
            }
        }

        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = start.elapsed().as_millis() as u64;
        emit(
            self.logger.as_ref(),
            &ActivityEvent::ScanCompleted {
                root: root.to_path_buf(),
                entries: outcome.entries.len(),
                failures: outcome.failures.len(),
                duration_ms,
            },
        );
        outcome
    }

    fn record(&self, outcome: &mut ScanOutcome, err: DkError) {
        let failure = FailureRecord::from(&err);
        emit(
            self.logger.as_ref(),
            &ActivityEvent::TraversalFailed {
                failure: failure.clone(),
            },
        );
        outcome.failures.push(failure);
    }
}

/// An artifact without a modification time cannot be ordered, so it is
/// reported instead of being guessed oldest.
fn managed_entry(
    path: PathBuf,
    size_bytes: u64,
    modified: io::Result<SystemTime>,
) -> Result<ManagedEntry, DkError> {
    match modified {
        Ok(modified_at) => Ok(ManagedEntry {
            path,
            size_bytes,
            modified_at,
        }),
        Err(source) => Err(DkError::Traversal { path, source }),
    }
}
