//! Whole-file advisory locks, one backend per platform.
//!
//! [`DefaultLockBackend`] is chosen by `cfg`: `flock(2)` on Unix, and a
//! backend that refuses every request elsewhere. Backends take ownership of
//! the file while it is locked and hand it back on unlock, so a locked file
//! cannot be reached except through its guard. Dropping a guard closes the
//! file and the OS releases the lock with it.
//!
//! Locks are per open file description: two independent `open` calls on the
//! same path contend even inside one process.

#![allow(missing_docs)]

use std::fs::File;
use std::io;
use std::ops::Deref;

use crate::lock::LockMode;

/// Result of a lock attempt; on failure the unlocked file is returned.
pub type LockAttempt<G> = std::result::Result<G, (File, io::Error)>;

/// Result of an unlock attempt; on failure the still-locked guard is returned.
pub type UnlockAttempt<G> = std::result::Result<File, (G, io::Error)>;

/// Acquire/release capability for one platform.
pub trait LockBackend {
    /// Holds the file while the lock is in place.
    type Guard: Deref<Target = File>;

    /// Lock the whole file shared (`Read`) or exclusive (`Write`).
    ///
    /// With `blocking == false` an unavailable lock fails immediately with
    /// [`io::ErrorKind::WouldBlock`]. An interrupted call is reported as a
    /// failure, never retried here.
    fn lock(&self, file: File, mode: LockMode, blocking: bool) -> LockAttempt<Self::Guard>;

    fn unlock(&self, guard: Self::Guard) -> UnlockAttempt<Self::Guard>;

    fn name(&self) -> &'static str;
}

#[cfg(unix)]
pub type DefaultLockBackend = FlockBackend;

#[cfg(not(unix))]
pub type DefaultLockBackend = UnsupportedBackend;

/// `flock(2)` through `nix`.
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct FlockBackend;

#[cfg(unix)]
impl LockBackend for FlockBackend {
    type Guard = nix::fcntl::Flock<File>;

    fn lock(&self, file: File, mode: LockMode, blocking: bool) -> LockAttempt<Self::Guard> {
        use nix::fcntl::{Flock, FlockArg};

        #[allow(deprecated)]
        let arg = match (mode, blocking) {
            (LockMode::Read, true) => FlockArg::LockShared,
            (LockMode::Read, false) => FlockArg::LockSharedNonblock,
            (LockMode::Write, true) => FlockArg::LockExclusive,
            (LockMode::Write, false) => FlockArg::LockExclusiveNonblock,
            (LockMode::Unlocked, _) => {
                return Err((file, not_a_lock_mode()));
            }
        };

        Flock::lock(file, arg).map_err(|(file, errno)| (file, io::Error::from(errno)))
    }

    fn unlock(&self, guard: Self::Guard) -> UnlockAttempt<Self::Guard> {
        guard
            .unlock()
            .map_err(|(guard, errno)| (guard, io::Error::from(errno)))
    }

    fn name(&self) -> &'static str {
        "flock"
    }
}

/// Wraps the file for [`UnsupportedBackend`]; never actually locked.
#[derive(Debug)]
pub struct PlainGuard(File);

impl Deref for PlainGuard {
    type Target = File;

    fn deref(&self) -> &File {
        &self.0
    }
}

/// For platforms without advisory locks: every request fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedBackend;

impl LockBackend for UnsupportedBackend {
    type Guard = PlainGuard;

    fn lock(&self, file: File, _mode: LockMode, _blocking: bool) -> LockAttempt<Self::Guard> {
        Err((
            file,
            io::Error::new(
                io::ErrorKind::Unsupported,
                "advisory file locks are not available on this platform",
            ),
        ))
    }

    fn unlock(&self, guard: Self::Guard) -> UnlockAttempt<Self::Guard> {
        Ok(guard.0)
    }

    fn name(&self) -> &'static str {
        "unsupported"
    }
}

#[cfg(unix)]
fn not_a_lock_mode() -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        "unlocked is not a lock request",
    )
}
