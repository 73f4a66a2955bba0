use std::fs::{DirBuilder, File, OpenOptions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, MetadataExt};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{LockStateError, StorageError};
use crate::lock::{LockHandle, LockMode, PathLockManager, next_manager_id};
use crate::storage::CanonicalUri;

/// Cross-process lock manager built on `flock(2)`.
///
/// Every canonical URI maps to `<dir>/<sha256(uri)>.lock`. Processes sharing
/// the directory exclude each other the same way tasks of one process do.
///
/// Releasing a write lock unlinks its file while still holding it, and every
/// acquisition re-checks that the file it locked is still the linked one.
/// Files released by readers stay behind until the next writer of the same
/// URI, so the directory holds at most one file per URI last locked for
/// reading.
pub struct FileLockManager {
    id: usize,
    dir: PathBuf,
}

impl FileLockManager {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        DirBuilder::new()
            .recursive(true)
            .mode(0o755)
            .create(&dir)
            .map_err(|err| StorageError::io("mkdir", dir.clone(), err))?;
        Ok(FileLockManager {
            id: next_manager_id(),
            dir,
        })
    }

    fn lock_file(&self, uri: &CanonicalUri) -> PathBuf {
        let digest = Sha256::digest(uri.as_str().as_bytes());
        self.dir.join(format!("{}.lock", hex::encode(digest)))
    }
}

fn flock_file(path: &Path, mode: LockMode, wait: bool) -> io::Result<Option<Flock<File>>> {
    let arg = match (mode, wait) {
        (LockMode::Read, true) => FlockArg::LockShared,
        (LockMode::Write, true) => FlockArg::LockExclusive,
        (LockMode::Read, false) => FlockArg::LockSharedNonblock,
        (LockMode::Write, false) => FlockArg::LockExclusiveNonblock,
    };
    loop {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;
        let flock = match Flock::lock(file, arg) {
            Ok(flock) => flock,
            Err((_file, errno)) if errno == Errno::EWOULDBLOCK => return Ok(None),
            Err((_file, errno)) => return Err(io::Error::from(errno)),
        };
        // the previous writer unlinked this inode on release; lock the new one
        if still_linked(path, &flock)? {
            return Ok(Some(flock));
        }
    }
}

fn still_linked(path: &Path, file: &File) -> io::Result<bool> {
    let held = file.metadata()?;
    match std::fs::metadata(path) {
        Ok(current) => Ok(current.dev() == held.dev() && current.ino() == held.ino()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

impl FileLockManager {
    async fn grant(
        &self,
        uri: &CanonicalUri,
        mode: LockMode,
        wait: bool,
    ) -> Result<Option<LockHandle>, StorageError> {
        let path = self.lock_file(uri);
        let blocking_path = path.clone();
        let flock = tokio::task::spawn_blocking(move || flock_file(&blocking_path, mode, wait))
            .await
            .map_err(|err| StorageError::io("lock", path.clone(), io::Error::other(err)))?
            .map_err(|err| StorageError::io("lock", path.clone(), err))?;
        let Some(flock) = flock else {
            return Ok(None);
        };
        debug!("acquired {mode} file lock on {uri} ({})", path.display());

        let key = uri.clone();
        Ok(Some(LockHandle::new(uri.clone(), mode, self.id, move || {
            if mode == LockMode::Write {
                if let Err(err) = std::fs::remove_file(&path) {
                    debug!("could not remove lock file {}: {err}", path.display());
                }
            }
            drop(flock);
            debug!("released {mode} file lock on {key}");
        })))
    }
}

#[async_trait::async_trait]
impl PathLockManager for FileLockManager {
    async fn lock(&self, uri: &CanonicalUri, mode: LockMode) -> Result<LockHandle, StorageError> {
        match self.grant(uri, mode, true).await? {
            Some(handle) => Ok(handle),
            None => Err(StorageError::io(
                "lock",
                self.lock_file(uri),
                io::Error::from(io::ErrorKind::WouldBlock),
            )),
        }
    }

    async fn try_lock(
        &self,
        uri: &CanonicalUri,
        mode: LockMode,
    ) -> Result<Option<LockHandle>, StorageError> {
        self.grant(uri, mode, false).await
    }

    fn unlock(&self, handle: LockHandle) -> Result<(), LockStateError> {
        if handle.owner() != self.id {
            return Err(handle.state_error());
        }
        drop(handle);
        Ok(())
    }
}
