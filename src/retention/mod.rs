//! Bounded retention for a directory of generated artifacts.
//!
//! A retention pass is scan → evict → prune:
//! - [`scanner`] snapshots matching artifacts (read-only, best-effort),
//! - [`eviction`] deletes oldest-first until both caps hold or one artifact remains,
//! - [`prune`] removes directories the eviction left empty,
//! - [`engine`] sequences the three and owns the configured limits.
//!
//! A pass is not transactional. Artifacts created or deleted by other
//! processes between scan and eviction are tolerated, and callers serialise
//! their own passes over the same root.

use std::path::PathBuf;
use std::time::SystemTime;

use serde::Serialize;

pub mod engine;
pub mod eviction;
pub mod prune;
pub mod scanner;

#[cfg(test)]
mod test_properties;

pub use engine::{PassReport, RetentionEngine};
pub use eviction::{ArtifactRemover, EvictionOutcome, Evictor, FsRemover};
pub use prune::{PruneReport, prune_empty_dirs};
pub use scanner::{DirectoryScanner, ScanOutcome};

/// Bytes per configured megabyte.
pub const BYTES_PER_MB: u64 = 1024 * 1024;

/// Lock file that serialises passes over one root. Never treated as an
/// artifact, whatever the configured suffix.
pub const PASS_LOCK_FILE: &str = ".dk-retention.lock";

/// One artifact observed by a scan. Recomputed every pass, never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManagedEntry {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified_at: SystemTime,
}

/// Capacity budget for the managed directory, always in bytes and items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetentionLimits {
    pub max_size_bytes: u64,
    pub max_count: usize,
}

impl RetentionLimits {
    /// Convert a megabyte cap at the configuration boundary (saturating).
    #[must_use]
    pub const fn from_megabytes(max_size_mb: u64, max_count: usize) -> Self {
        Self {
            max_size_bytes: max_size_mb.saturating_mul(BYTES_PER_MB),
            max_count,
        }
    }

    /// True while either cap is violated.
    #[must_use]
    pub const fn is_exceeded_by(&self, total_size: u64, total_count: usize) -> bool {
        total_size > self.max_size_bytes || total_count > self.max_count
    }
}
