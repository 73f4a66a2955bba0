//! Mutual exclusion keyed by canonical path.
//!
//! Readers share, writers exclude. Acquisition blocks (awaits) until the lock
//! is available; no fairness or ordering is promised. `try_lock` is the
//! non-waiting variant.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{LockStateError, StorageError};
use crate::storage::CanonicalUri;

pub mod file;
pub mod memory;

pub use file::FileLockManager;
pub use memory::InMemoryPathLockManager;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LockMode {
    Read,
    Write,
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Read => f.write_str("read"),
            LockMode::Write => f.write_str("write"),
        }
    }
}

type Release = Box<dyn FnOnce() + Send + Sync>;

/// A held path lock. Dropping the handle releases the lock;
/// [`PathLockManager::unlock`] releases it explicitly and checks ownership.
pub struct LockHandle {
    uri: CanonicalUri,
    mode: LockMode,
    owner: usize,
    release: Option<Release>,
}

impl LockHandle {
    pub(crate) fn new(
        uri: CanonicalUri,
        mode: LockMode,
        owner: usize,
        release: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        LockHandle {
            uri,
            mode,
            owner,
            release: Some(Box::new(release)),
        }
    }

    pub fn uri(&self) -> &CanonicalUri {
        &self.uri
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub(crate) fn owner(&self) -> usize {
        self.owner
    }

    pub(crate) fn state_error(&self) -> LockStateError {
        LockStateError {
            uri: self.uri.to_string(),
            mode: self.mode,
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockHandle")
            .field("uri", &self.uri)
            .field("mode", &self.mode)
            .finish()
    }
}

#[async_trait::async_trait]
pub trait PathLockManager: Send + Sync {
    async fn lock(&self, uri: &CanonicalUri, mode: LockMode) -> Result<LockHandle, StorageError>;

    /// Takes the lock only if it is free right now, `None` otherwise.
    async fn try_lock(
        &self,
        uri: &CanonicalUri,
        mode: LockMode,
    ) -> Result<Option<LockHandle>, StorageError>;

    /// Releasing a handle this manager did not grant is a [`LockStateError`].
    fn unlock(&self, handle: LockHandle) -> Result<(), LockStateError>;
}

pub(crate) fn next_manager_id() -> usize {
    static NEXT: AtomicUsize = AtomicUsize::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}
