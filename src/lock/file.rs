//! A file handle paired with its advisory lock state.
//!
//! `acquire(target, blocking)`:
//! - `Unlocked` behaves as `release()`;
//! - the current mode is a no-op success;
//! - anything else releases a held lock first, then asks the backend.
//!
//! A failed acquire leaves the file unlocked (the previous lock is already
//! gone). A failed release leaves the lock in place so the caller can retry.

#![allow(missing_docs)]

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::core::errors::{DkError, Result};
use crate::lock::LockMode;
use crate::logger::activity::{ActivityEvent, ActivityLogger, emit};
use crate::platform::lock::{DefaultLockBackend, LockBackend};

/// How to open a [`LockableFile`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockOpenOptions {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub truncate: bool,
    pub create: bool,
}

impl LockOpenOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read and write, creating the file if missing.
    #[must_use]
    pub fn read_write() -> Self {
        Self::new().read(true).write(true)
    }

    #[must_use]
    pub fn read(mut self, read: bool) -> Self {
        self.read = read;
        self
    }

    #[must_use]
    pub fn write(mut self, write: bool) -> Self {
        self.write = write;
        self
    }

    #[must_use]
    pub fn append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    #[must_use]
    pub fn truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }

    #[must_use]
    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    fn check(&self, path: &Path) -> Result<OpenOptions> {
        if self.append && self.truncate {
            return Err(DkError::precondition(
                path,
                "append and truncate cannot be combined",
            ));
        }
        // Truncating before the lock is held would clobber data another
        // cooperating holder may be using.
        if self.truncate {
            return Err(DkError::precondition(
                path,
                "truncate is not allowed when opening a lockable file",
            ));
        }
        if !self.read && !self.write && !self.append {
            return Err(DkError::precondition(
                path,
                "open requires at least one of read, write, append",
            ));
        }

        let writable = self.write || self.append;
        let mut options = OpenOptions::new();
        options
            .read(self.read)
            .write(self.write)
            .append(self.append)
            .create(writable && (self.create || (self.read && self.write)));
        Ok(options)
    }
}

enum FileState<G> {
    Unlocked(File),
    Locked { guard: G, mode: LockMode },
}

/// A lockable file. `None` state means closed.
pub struct LockableFile<B: LockBackend = DefaultLockBackend> {
    path: PathBuf,
    backend: B,
    state: Option<FileState<B::Guard>>,
    logger: Option<ActivityLogger>,
}

impl<B: LockBackend> fmt::Debug for LockableFile<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockableFile")
            .field("path", &self.path)
            .field("backend", &self.backend.name())
            .field("open", &self.is_open())
            .field("mode", &self.mode())
            .finish()
    }
}

impl<B: LockBackend + Default> LockableFile<B> {
    /// A closed handle for `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_backend(path, B::default())
    }

    /// Construct and open in one step.
    pub fn open_path(path: impl Into<PathBuf>, options: &LockOpenOptions) -> Result<Self> {
        let mut file = Self::new(path);
        file.open(options)?;
        Ok(file)
    }
}

impl<B: LockBackend> LockableFile<B> {
    pub fn with_backend(path: impl Into<PathBuf>, backend: B) -> Self {
        Self {
            path: path.into(),
            backend,
            state: None,
            logger: None,
        }
    }

    #[must_use]
    pub fn with_logger(mut self, logger: Option<ActivityLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn is_open(&self) -> bool {
        self.state.is_some()
    }

    /// Current lock mode. Never fails, never blocks.
    pub fn mode(&self) -> LockMode {
        match &self.state {
            Some(FileState::Locked { mode, .. }) => *mode,
            _ => LockMode::Unlocked,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.mode().is_locked()
    }

    /// Open the file. The handle starts unlocked.
    pub fn open(&mut self, options: &LockOpenOptions) -> Result<()> {
        if self.is_open() {
            return Err(DkError::precondition(&self.path, "file is already open"));
        }
        let file = options
            .check(&self.path)?
            .open(&self.path)
            .map_err(|source| DkError::io(&self.path, source))?;
        self.state = Some(FileState::Unlocked(file));
        Ok(())
    }

    /// Close the file. A held lock goes away with the descriptor.
    pub fn close(&mut self) {
        if let Some(FileState::Locked { mode, .. }) = self.state.take() {
            self.log_change(mode, LockMode::Unlocked);
        }
    }

    /// Move to `target`, blocking until granted when `blocking` is set.
    pub fn acquire(&mut self, target: LockMode, blocking: bool) -> Result<()> {
        if !self.is_open() {
            return Err(DkError::precondition(
                &self.path,
                format!("cannot take a {target} lock on a file that is not open"),
            ));
        }
        if target == LockMode::Unlocked {
            return self.release();
        }
        let current = self.mode();
        if target == current {
            return Ok(());
        }
        if current.is_locked() {
            self.release()?;
        }

        let file = match self.state.take() {
            Some(FileState::Unlocked(file)) => file,
            other => {
                self.state = other;
                return Err(DkError::precondition(
                    &self.path,
                    "file must be open and unlocked before locking",
                ));
            }
        };

        match self.backend.lock(file, target, blocking) {
            Ok(guard) => {
                self.state = Some(FileState::Locked {
                    guard,
                    mode: target,
                });
                self.log_change(LockMode::Unlocked, target);
                Ok(())
            }
            Err((file, source)) => {
                self.state = Some(FileState::Unlocked(file));
                let err = match source.kind() {
                    ErrorKind::WouldBlock => DkError::LockContended {
                        path: self.path.clone(),
                        mode: target,
                    },
                    ErrorKind::Unsupported => DkError::UnsupportedPlatform {
                        details: format!("{}: {source}", self.backend.name()),
                    },
                    _ => DkError::Lock {
                        path: self.path.clone(),
                        operation: "lock",
                        source,
                    },
                };
                self.log_failure(target, &err);
                Err(err)
            }
        }
    }

    /// Drop the held lock. No-op when unlocked or closed.
    pub fn release(&mut self) -> Result<()> {
        match self.state.take() {
            Some(FileState::Locked { guard, mode }) => match self.backend.unlock(guard) {
                Ok(file) => {
                    self.state = Some(FileState::Unlocked(file));
                    self.log_change(mode, LockMode::Unlocked);
                    Ok(())
                }
                Err((guard, source)) => {
                    self.state = Some(FileState::Locked { guard, mode });
                    let err = DkError::Lock {
                        path: self.path.clone(),
                        operation: "unlock",
                        source,
                    };
                    self.log_failure(mode, &err);
                    Err(err)
                }
            },
            other => {
                self.state = other;
                Ok(())
            }
        }
    }

    /// Read the whole file from the start.
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        let mut file = self.handle()?;
        let mut buf = Vec::new();
        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.read_to_end(&mut buf))
            .map_err(|source| DkError::io(&self.path, source))?;
        Ok(buf)
    }

    pub fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let mut file = self.handle()?;
        file.write_all(data)
            .map_err(|source| DkError::io(&self.path, source))
    }

    pub fn flush(&mut self) -> Result<()> {
        let mut file = self.handle()?;
        file.flush()
            .map_err(|source| DkError::io(&self.path, source))
    }

    /// Flush file contents and metadata to disk.
    pub fn sync(&mut self) -> Result<()> {
        self.handle()?
            .sync_all()
            .map_err(|source| DkError::io(&self.path, source))
    }

    fn handle(&self) -> Result<&File> {
        match &self.state {
            Some(FileState::Unlocked(file)) => Ok(file),
            Some(FileState::Locked { guard, .. }) => Ok(&**guard),
            None => Err(DkError::precondition(&self.path, "file is not open")),
        }
    }

    fn log_change(&self, from: LockMode, to: LockMode) {
        emit(
            self.logger.as_ref(),
            &ActivityEvent::LockChanged {
                path: self.path.clone(),
                from,
                to,
            },
        );
    }

    fn log_failure(&self, mode: LockMode, err: &DkError) {
        emit(
            self.logger.as_ref(),
            &ActivityEvent::LockFailed {
                path: self.path.clone(),
                mode,
                error_code: err.code().to_string(),
                message: err.to_string(),
            },
        );
    }
}
