//! DK-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::lock::LockMode;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, DkError>;

/// Top-level error type for dumpkeeper.
#[derive(Debug, Error)]
pub enum DkError {
    #[error("[DK-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[DK-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[DK-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[DK-1101] unsupported platform: {details}")]
    UnsupportedPlatform { details: String },

    #[error("[DK-2001] traversal failure at {path}: {source}")]
    Traversal {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[DK-2002] could not delete {path}: {source}")]
    Deletion {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[DK-2101] {operation} failed on {path}: {source}")]
    Lock {
        path: PathBuf,
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("[DK-2102] {mode} lock on {path} is held by another owner")]
    LockContended { path: PathBuf, mode: LockMode },

    #[error("[DK-2201] precondition failed for {path}: {details}")]
    Precondition { path: PathBuf, details: String },

    #[error("[DK-2301] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[DK-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[DK-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl DkError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "DK-1001",
            Self::MissingConfig { .. } => "DK-1002",
            Self::ConfigParse { .. } => "DK-1003",
            Self::UnsupportedPlatform { .. } => "DK-1101",
            Self::Traversal { .. } => "DK-2001",
            Self::Deletion { .. } => "DK-2002",
            Self::Lock { .. } => "DK-2101",
            Self::LockContended { .. } => "DK-2102",
            Self::Precondition { .. } => "DK-2201",
            Self::Serialization { .. } => "DK-2301",
            Self::Io { .. } => "DK-3002",
            Self::Runtime { .. } => "DK-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Traversal { .. }
                | Self::Deletion { .. }
                | Self::Lock { .. }
                | Self::LockContended { .. }
                | Self::Io { .. }
                | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for precondition failures.
    #[must_use]
    pub fn precondition(path: impl AsRef<Path>, details: impl Into<String>) -> Self {
        Self::Precondition {
            path: path.as_ref().to_path_buf(),
            details: details.into(),
        }
    }
}

impl From<serde_json::Error> for DkError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for DkError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

/// A failure that was recovered from locally and kept for the caller to inspect.
///
/// Traversal and deletion failures never abort a retention pass; they are
/// flattened into these records because `DkError` itself is not `Clone`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub path: PathBuf,
    pub error_code: String,
    pub error: String,
    pub recoverable: bool,
}

impl From<&DkError> for FailureRecord {
    fn from(err: &DkError) -> Self {
        let path = match err {
            DkError::MissingConfig { path }
            | DkError::Traversal { path, .. }
            | DkError::Deletion { path, .. }
            | DkError::Lock { path, .. }
            | DkError::LockContended { path, .. }
            | DkError::Precondition { path, .. }
            | DkError::Io { path, .. } => path.clone(),
            _ => PathBuf::new(),
        };
        Self {
            path,
            error_code: err.code().to_string(),
            error: err.to_string(),
            recoverable: err.is_retryable(),
        }
    }
}
