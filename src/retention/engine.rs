//! The retention engine: one configured managed root, passes run on demand.
//!
//! Construct once from [`RetentionConfig`] and hand the engine to whoever
//! triggers maintenance. Limits may be changed between passes; each pass
//! reads them once at its start.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;

use crate::core::config::RetentionConfig;
use crate::core::errors::{DkError, FailureRecord, Result};
use crate::core::paths::resolve_absolute_path;
use crate::logger::activity::{ActivityEvent, ActivityLogger, emit};
use crate::retention::eviction::{EvictionOutcome, Evictor, sort_oldest_first};
use crate::retention::prune::{PruneReport, prune_empty_dirs};
use crate::retention::scanner::DirectoryScanner;
use crate::retention::{BYTES_PER_MB, RetentionLimits};

/// Everything one pass observed and did.
#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    pub root: PathBuf,
    pub limits: RetentionLimits,
    pub scanned_count: usize,
    pub scanned_size_bytes: u64,
    pub scan_failures: Vec<FailureRecord>,
    pub eviction: EvictionOutcome,
    /// `None` when pruning is disabled or the pass was a dry run.
    pub prune: Option<PruneReport>,
    pub duration_ms: u64,
}

impl PassReport {
    pub fn evicted_count(&self) -> usize {
        self.eviction.evicted.len()
    }

    pub fn bytes_evicted(&self) -> u64 {
        self.eviction.bytes_evicted
    }

    /// Surviving artifacts, oldest first.
    pub fn surviving_paths(&self) -> Vec<PathBuf> {
        self.eviction
            .survivors
            .iter()
            .map(|e| e.path.clone())
            .collect()
    }

    /// Every recovered failure from scan, eviction, and prune.
    pub fn failures(&self) -> impl Iterator<Item = &FailureRecord> {
        self.scan_failures
            .iter()
            .chain(self.eviction.failures.iter())
            .chain(self.prune.iter().flat_map(|p| p.failures.iter()))
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }
}

#[derive(Debug, Clone)]
pub struct RetentionEngine {
    root: PathBuf,
    suffix: String,
    limits: RetentionLimits,
    prune_empty_dirs: bool,
    dry_run: bool,
    logger: Option<ActivityLogger>,
}

impl RetentionEngine {
    /// Build from configuration. The root is taken as given; use
    /// [`Self::set_root`] to resolve and create it.
    pub fn new(config: &RetentionConfig, logger: Option<ActivityLogger>) -> Self {
        Self {
            root: config.root.clone(),
            suffix: config.suffix.clone(),
            limits: config.limits(),
            prune_empty_dirs: config.prune_empty_dirs,
            dry_run: config.dry_run,
            logger,
        }
    }

    /// Build from configuration and prepare the configured root.
    pub fn from_config(config: &RetentionConfig, logger: Option<ActivityLogger>) -> Result<Self> {
        let mut engine = Self::new(config, logger);
        engine.set_root(&config.root)?;
        Ok(engine)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub const fn limits(&self) -> RetentionLimits {
        self.limits
    }

    pub const fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Make `path` the managed root: absolutized, created if missing.
    ///
    /// A path that exists but is not a directory is rejected and the
    /// previous root is kept.
    pub fn set_root(&mut self, path: &Path) -> Result<()> {
        let resolved = resolve_absolute_path(path);
        if resolved.exists() && !resolved.is_dir() {
            return Err(DkError::InvalidConfig {
                details: format!("managed root is not a directory: {}", resolved.display()),
            });
        }
        fs::create_dir_all(&resolved).map_err(|source| DkError::io(&resolved, source))?;
        // Canonicalize now that it exists.
        self.root = resolve_absolute_path(&resolved);
        Ok(())
    }

    /// Make an existing directory the managed root. Nothing is created.
    pub fn attach_root(&mut self, path: &Path) -> Result<()> {
        let resolved = resolve_absolute_path(path);
        if resolved.is_dir() {
            self.root = resolved;
            return Ok(());
        }
        if resolved.exists() {
            return Err(DkError::InvalidConfig {
                details: format!("managed root is not a directory: {}", resolved.display()),
            });
        }
        Err(DkError::precondition(&resolved, "managed root does not exist"))
    }

    /// Set the size cap in megabytes. Rejects values that overflow in bytes.
    pub fn set_max_size_mb(&mut self, max_size_mb: u64) -> Result<()> {
        let max_size_bytes =
            max_size_mb
                .checked_mul(BYTES_PER_MB)
                .ok_or_else(|| DkError::InvalidConfig {
                    details: format!("max size of {max_size_mb} MB overflows when converted to bytes"),
                })?;
        self.limits.max_size_bytes = max_size_bytes;
        Ok(())
    }

    pub fn set_max_count(&mut self, max_count: usize) {
        self.limits.max_count = max_count;
    }

    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    /// Scan, evict, then prune. Recovered failures are in the report.
    pub fn run_pass(&self) -> PassReport {
        let start = Instant::now();
        let limits = self.limits;

        let scan = DirectoryScanner::new(self.suffix.clone())
            .with_logger(self.logger.clone())
            .scan(&self.root);
        let scanned_count = scan.entries.len();
        let scanned_size_bytes = scan.total_size_bytes();

        let eviction = Evictor::new(limits)
            .dry_run(self.dry_run)
            .with_logger(self.logger.clone())
            .evict(scan.entries);

        let prune = (self.prune_empty_dirs && !self.dry_run)
            .then(|| prune_empty_dirs(&self.root, self.logger.as_ref()));

        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = start.elapsed().as_millis() as u64;

        emit(
            self.logger.as_ref(),
            &ActivityEvent::PassCompleted {
                root: self.root.clone(),
                evicted: eviction.evicted.len(),
                bytes_evicted: eviction.bytes_evicted,
                remaining_count: eviction.remaining_count,
                remaining_size_bytes: eviction.remaining_size_bytes,
                dry_run: self.dry_run,
                duration_ms,
            },
        );

        PassReport {
            root: self.root.clone(),
            limits,
            scanned_count,
            scanned_size_bytes,
            scan_failures: scan.failures,
            eviction,
            prune,
            duration_ms,
        }
    }

    /// Current artifacts under the root, oldest first. Read-only.
    pub fn list_artifacts(&self) -> Vec<crate::retention::ManagedEntry> {
        let mut entries = DirectoryScanner::new(self.suffix.clone())
            .with_logger(self.logger.clone())
            .scan(&self.root)
            .entries;
        sort_oldest_first(&mut entries);
        entries
    }

    /// Prune empty directories without evicting anything.
    pub fn prune(&self) -> PruneReport {
        prune_empty_dirs(&self.root, self.logger.as_ref())
    }
}
