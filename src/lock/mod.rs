//! Advisory lock state for a single open file.
//!
//! The lock is advisory: it constrains only cooperating processes that take
//! it too. It does not stop a non-cooperating writer from changing the file.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod file;

pub use file::{LockOpenOptions, LockableFile};

/// Lock currently held (or requested) on a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockMode {
    #[default]
    Unlocked,
    /// Shared: any number of readers.
    Read,
    /// Exclusive: one writer, no readers.
    Write,
}

impl LockMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unlocked => "unlocked",
            Self::Read => "read",
            Self::Write => "write",
        }
    }

    #[must_use]
    pub const fn is_locked(self) -> bool {
        !matches!(self, Self::Unlocked)
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
