#![forbid(unsafe_code)]

//! dumpkeeper (dk): bounded retention for directories of generated artifacts
//! such as crash dumps, plus an advisory-lock state machine for files shared
//! between cooperating processes.
//!
//! Two independent pieces:
//! 1. **Retention engine**: scan a managed root, evict oldest-first until a
//!    size cap and a count cap both hold (never below one artifact), then
//!    prune directories left empty.
//! 2. **Lockable files**: an open file moves between unlocked, shared (read)
//!    and exclusive (write) advisory locks with explicit failure reporting.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use dumpkeeper::prelude::*;
//!
//! let config = Config::load(None)?;
//! let engine = RetentionEngine::from_config(&config.retention, None)?;
//! let report = engine.run_pass();
//! println!("evicted {} artifacts", report.evicted_count());
//! # Ok::<(), DkError>(())
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use dumpkeeper::lock::{LockMode, LockOpenOptions, LockableFile};
//! ```

pub mod prelude;

pub mod core;
pub mod lock;
pub mod logger;
pub mod platform;
pub mod retention;
