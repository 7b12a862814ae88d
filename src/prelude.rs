//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use dumpkeeper::prelude::*;
//! ```

// Core
pub use crate::core::config::{Config, LoggingConfig, RetentionConfig};
pub use crate::core::errors::{DkError, FailureRecord, Result};

// Logging
pub use crate::logger::activity::{ActivityEvent, ActivityLogger};

// Locking
pub use crate::lock::{LockMode, LockOpenOptions, LockableFile};
pub use crate::platform::lock::{DefaultLockBackend, LockBackend};

// Retention
pub use crate::retention::{
    ArtifactRemover, DirectoryScanner, EvictionOutcome, Evictor, ManagedEntry, PassReport,
    PruneReport, RetentionEngine, RetentionLimits, prune_empty_dirs,
};
