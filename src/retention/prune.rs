//! Remove directories left empty under a managed root.
//!
//! Directories are visited deepest-first so a chain of nested empty
//! directories collapses in one call. The root itself is never removed and
//! symlinked directories are never entered.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::core::errors::{DkError, FailureRecord};
use crate::logger::activity::{ActivityEvent, ActivityLogger, emit};

#[derive(Debug, Clone, Default, Serialize)]
pub struct PruneReport {
    pub removed: Vec<PathBuf>,
    pub failures: Vec<FailureRecord>,
}

impl PruneReport {
    pub fn removed_count(&self) -> usize {
        self.removed.len()
    }
}

/// Delete every empty directory strictly below `root`.
///
/// A directory that still holds anything (including a file created after it
/// was listed) is left alone. Listing errors are recorded and skipped.
pub fn prune_empty_dirs(root: &Path, logger: Option<&ActivityLogger>) -> PruneReport {
    let mut report = PruneReport::default();

    // Pre-order collection; reversed, children always precede their parent.
    let mut ordered: Vec<PathBuf> = Vec::new();
    let mut unreadable: HashSet<PathBuf> = HashSet::new();
    let mut stack: Vec<PathBuf> = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let listing = match fs::read_dir(&dir) {
            Ok(listing) => listing,
            Err(source) => {
                unreadable.insert(dir.clone());
                record(&mut report, logger, DkError::Traversal { path: dir, source });
                continue;
            }
        };
        for item in listing {
            let item = match item {
                Ok(item) => item,
                Err(source) => {
                    let path = dir.clone();
                    record(&mut report, logger, DkError::Traversal { path, source });
                    continue;
                }
            };
            let path = item.path();
            match item.file_type() {
                Ok(file_type) if file_type.is_dir() => {
                    ordered.push(path.clone());
                    stack.push(path);
                }
                Ok(_) => {}
                Err(source) => record(&mut report, logger, DkError::Traversal { path, source }),
            }
        }
    }

    for dir in ordered.into_iter().rev() {
        if unreadable.contains(&dir) {
            continue;
        }
        match is_empty_dir(&dir) {
            Ok(true) => {}
            Ok(false) => continue,
            // Removed by someone else since it was listed.
            Err(source) if source.kind() == io::ErrorKind::NotFound => continue,
            Err(source) => {
                record(&mut report, logger, DkError::Traversal { path: dir, source });
                continue;
            }
        }
        match fs::remove_dir(&dir) {
            Ok(()) => {
                emit(logger, &ActivityEvent::DirectoryPruned { path: dir.clone() });
                report.removed.push(dir);
            }
            // Raced with a writer or another pruner; neither is a failure.
            Err(source)
                if matches!(
                    source.kind(),
                    io::ErrorKind::NotFound | io::ErrorKind::DirectoryNotEmpty
                ) => {}
            Err(source) => record(&mut report, logger, DkError::Deletion { path: dir, source }),
        }
    }

    report
}

fn is_empty_dir(dir: &Path) -> io::Result<bool> {
    Ok(fs::read_dir(dir)?.next().is_none())
}

fn record(report: &mut PruneReport, logger: Option<&ActivityLogger>, err: DkError) {
    let failure = FailureRecord::from(&err);
    emit(
        logger,
        &ActivityEvent::TraversalFailed {
            failure: failure.clone(),
        },
    );
    report.failures.push(failure);
}
