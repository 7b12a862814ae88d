//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{DkError, Result};
use crate::core::paths::{expand_tilde, home_dir};
use crate::retention::{BYTES_PER_MB, RetentionLimits};

/// Full dumpkeeper configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub retention: RetentionConfig,
    pub logging: LoggingConfig,
    pub paths: PathsConfig,
}

/// Managed directory and its capacity budget.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetentionConfig {
    /// Directory whose artifacts are kept within budget.
    pub root: PathBuf,
    /// Only regular files whose name ends with this suffix are managed.
    pub suffix: String,
    /// Size cap in megabytes (1 MB = 1,048,576 bytes).
    pub max_size_mb: u64,
    /// Count cap.
    pub max_count: usize,
    /// Remove directories left empty after eviction.
    pub prune_empty_dirs: bool,
    /// Report what would be evicted without deleting anything.
    pub dry_run: bool,
}

impl RetentionConfig {
    /// Limits in bytes; the MB conversion happens here and nowhere else.
    #[must_use]
    pub fn limits(&self) -> RetentionLimits {
        RetentionLimits::from_megabytes(self.max_size_mb, self.max_count)
    }
}

/// Activity-log sink settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    pub jsonl_path: PathBuf,
    pub fallback_path: Option<PathBuf>,
    pub max_size_bytes: u64,
    pub max_rotated_files: u32,
}

/// Filesystem paths used by dumpkeeper itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
}

fn data_dir() -> PathBuf {
    home_dir().join(".local").join("share").join("dumpkeeper")
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            root: data_dir().join("dumps"),
            suffix: ".dmp".to_string(),
            max_size_mb: 5,
            max_count: 5,
            prune_empty_dirs: true,
            dry_run: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            jsonl_path: data_dir().join("activity.jsonl"),
            fallback_path: None,
            max_size_bytes: 10 * 1024 * 1024,
            max_rotated_files: 3,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            config_file: home_dir()
                .join(".config")
                .join("dumpkeeper")
                .join("config.toml"),
        }
    }
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| DkError::Io {
                path: path_buf.clone(),
                source,
            })?;
            toml::from_str::<Self>(&raw)?
        } else if is_explicit_path {
            return Err(DkError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.normalize_paths();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over the canonical JSON form, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("DK_RETENTION_ROOT") {
            self.retention.root = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("DK_RETENTION_SUFFIX") {
            self.retention.suffix = raw;
        }
        if let Some(raw) = lookup("DK_RETENTION_MAX_SIZE_MB") {
            self.retention.max_size_mb = parse_env("DK_RETENTION_MAX_SIZE_MB", &raw)?;
        }
        if let Some(raw) = lookup("DK_RETENTION_MAX_COUNT") {
            self.retention.max_count = parse_env("DK_RETENTION_MAX_COUNT", &raw)?;
        }
        if let Some(raw) = lookup("DK_RETENTION_PRUNE_EMPTY_DIRS") {
            self.retention.prune_empty_dirs = parse_env("DK_RETENTION_PRUNE_EMPTY_DIRS", &raw)?;
        }
        if let Some(raw) = lookup("DK_RETENTION_DRY_RUN") {
            self.retention.dry_run = parse_env("DK_RETENTION_DRY_RUN", &raw)?;
        }
        if let Some(raw) = lookup("DK_LOGGING_ENABLED") {
            self.logging.enabled = parse_env("DK_LOGGING_ENABLED", &raw)?;
        }
        if let Some(raw) = lookup("DK_LOGGING_JSONL_PATH") {
            self.logging.jsonl_path = PathBuf::from(raw);
        }
        Ok(())
    }

    /// Expand `~` and strip trailing slashes so paths compare consistently.
    fn normalize_paths(&mut self) {
        self.retention.root = strip_trailing_slash(&expand_tilde(&self.retention.root));
        self.logging.jsonl_path = expand_tilde(&self.logging.jsonl_path);
        if let Some(fallback) = self.logging.fallback_path.as_mut() {
            *fallback = expand_tilde(fallback);
        }
    }

    fn validate(&self) -> Result<()> {
        let suffix = &self.retention.suffix;
        if suffix.is_empty() {
            return Err(DkError::InvalidConfig {
                details: "retention.suffix must not be empty".to_string(),
            });
        }
        if suffix.contains('/') || suffix.contains(std::path::MAIN_SEPARATOR) {
            return Err(DkError::InvalidConfig {
                details: format!("retention.suffix must not contain a path separator: {suffix:?}"),
            });
        }

        if self.retention.max_size_mb.checked_mul(BYTES_PER_MB).is_none() {
            return Err(DkError::InvalidConfig {
                details: format!(
                    "retention.max_size_mb ({}) overflows when converted to bytes",
                    self.retention.max_size_mb
                ),
            });
        }

        if self.retention.root.as_os_str().is_empty() {
            return Err(DkError::InvalidConfig {
                details: "retention.root must not be empty".to_string(),
            });
        }

        if self.logging.max_size_bytes == 0 {
            return Err(DkError::InvalidConfig {
                details: "logging.max_size_bytes must be > 0".to_string(),
            });
        }
        if self.logging.max_rotated_files == 0 {
            return Err(DkError::InvalidConfig {
                details: "logging.max_rotated_files must be >= 1".to_string(),
            });
        }

        Ok(())
    }
}

fn strip_trailing_slash(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    match s.strip_suffix('/') {
        Some(stripped) if s.len() > 1 => PathBuf::from(stripped),
        _ => path.to_path_buf(),
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|error| DkError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}
