//! Oldest-first eviction against a size cap and a count cap.
//!
//! Entries are ordered by modification time (path breaks ties) and removed one
//! at a time while either cap is exceeded and more than one entry is still
//! counted. The last artifact is never evicted, even when it alone violates
//! the caps.
//!
//! A failed deletion does not stop the pass: the entry stays counted as
//! present and the next-oldest entry is tried. An entry that is already gone
//! (`NotFound`) was removed by someone else; it no longer occupies space, so
//! it is subtracted from the totals and reported as vanished rather than
//! failed.

#![allow(missing_docs)]

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use serde::Serialize;

use crate::core::errors::{DkError, FailureRecord};
use crate::logger::activity::{ActivityEvent, ActivityLogger, emit};
use crate::retention::{ManagedEntry, RetentionLimits};

/// Deletes one artifact. The seam exists so failure paths can be exercised.
pub trait ArtifactRemover {
    fn remove(&self, path: &Path) -> std::io::Result<()>;
}

/// Plain `remove_file`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsRemover;

impl ArtifactRemover for FsRemover {
    fn remove(&self, path: &Path) -> std::io::Result<()> {
        fs::remove_file(path)
    }
}

impl<R: ArtifactRemover + ?Sized> ArtifactRemover for &R {
    fn remove(&self, path: &Path) -> std::io::Result<()> {
        (**self).remove(path)
    }
}

/// What one eviction run did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EvictionOutcome {
    /// Removed by this run (or selected for removal in dry-run), oldest first.
    pub evicted: Vec<ManagedEntry>,
    /// Already deleted by another party when their turn came.
    pub vanished: Vec<ManagedEntry>,
    pub failures: Vec<FailureRecord>,
    /// Everything still counted as present, oldest first.
    pub survivors: Vec<ManagedEntry>,
    pub remaining_size_bytes: u64,
    pub remaining_count: usize,
    pub bytes_evicted: u64,
    pub dry_run: bool,
}

impl EvictionOutcome {
    pub fn evicted_count(&self) -> usize {
        self.evicted.len()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Applies [`RetentionLimits`] to a scanned snapshot.
#[derive(Debug, Clone)]
pub struct Evictor<R = FsRemover> {
    limits: RetentionLimits,
    dry_run: bool,
    remover: R,
    logger: Option<ActivityLogger>,
}

impl Evictor<FsRemover> {
    pub fn new(limits: RetentionLimits) -> Self {
        Self {
            limits,
            dry_run: false,
            remover: FsRemover,
            logger: None,
        }
    }
}

impl<R: ArtifactRemover> Evictor<R> {
    #[must_use]
    pub fn with_remover<S: ArtifactRemover>(self, remover: S) -> Evictor<S> {
        Evictor {
            limits: self.limits,
            dry_run: self.dry_run,
            remover,
            logger: self.logger,
        }
    }

    #[must_use]
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    #[must_use]
    pub fn with_logger(mut self, logger: Option<ActivityLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub const fn limits(&self) -> RetentionLimits {
        self.limits
    }

    /// Evict from `entries` until both caps hold or one entry remains.
    pub fn evict(&self, mut entries: Vec<ManagedEntry>) -> EvictionOutcome {
        sort_oldest_first(&mut entries);

        let mut total_size = entries
            .iter()
            .fold(0u64, |acc, e| acc.saturating_add(e.size_bytes));
        let mut total_count = entries.len();
        let mut outcome = EvictionOutcome {
            dry_run: self.dry_run,
            ..EvictionOutcome::default()
        };

        let mut queue = entries.into_iter();
        while self.limits.is_exceeded_by(total_size, total_count) && total_count > 1 {
            let Some(entry) = queue.next() else {
                break;
            };

            let removal = if self.dry_run {
                Ok(())
            } else {
                self.remover.remove(&entry.path)
            };

            match removal {
                Ok(()) => {
                    total_size = total_size.saturating_sub(entry.size_bytes);
                    total_count -= 1;
                    outcome.bytes_evicted = outcome.bytes_evicted.saturating_add(entry.size_bytes);
                    emit(
                        self.logger.as_ref(),
                        &ActivityEvent::ArtifactEvicted {
                            path: entry.path.clone(),
                            size_bytes: entry.size_bytes,
                            dry_run: self.dry_run,
                        },
                    );
                    outcome.evicted.push(entry);
                }
                Err(source) if source.kind() == ErrorKind::NotFound => {
                    total_size = total_size.saturating_sub(entry.size_bytes);
                    total_count -= 1;
                    emit(
                        self.logger.as_ref(),
                        &ActivityEvent::ArtifactVanished {
                            path: entry.path.clone(),
                            size_bytes: entry.size_bytes,
                        },
                    );
                    outcome.vanished.push(entry);
                }
                Err(source) => {
                    let failure = FailureRecord::from(&DkError::Deletion {
                        path: entry.path.clone(),
                        source,
                    });
                    emit(
                        self.logger.as_ref(),
                        &ActivityEvent::ArtifactEvictionFailed {
                            failure: failure.clone(),
                        },
                    );
                    outcome.failures.push(failure);
                    outcome.survivors.push(entry);
                }
            }
        }

        outcome.survivors.extend(queue);
        outcome.remaining_size_bytes = total_size;
        outcome.remaining_count = total_count;
        outcome
    }
}

/// Ascending by modification time; identical times ordered by path.
pub fn sort_oldest_first(entries: &mut [ManagedEntry]) {
    entries.sort_by(|a, b| {
        a.modified_at
            .cmp(&b.modified_at)
            .then_with(|| a.path.cmp(&b.path))
    });
}
