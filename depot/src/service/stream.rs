//! Lock-guarded read and write streams.
//!
//! Streams start `Created`, open lazily on first byte access (lock, then the
//! `before` hook), and end `Closed`. `close` always runs the `after` hook and
//! always releases the lock; the first failure is reported afterwards.

use std::sync::Arc;

use tokio::io::{self, AsyncReadExt};
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::lock::{LockHandle, LockMode, PathLockManager};
use crate::service::record::{RecordStore, StreamKind};
use crate::service::sink::ByteSink;
use crate::storage::provider::CommitOutcome;
use crate::storage::{AtomicStorageProvider, BoxedReader, StagedWrite, VirtualPath};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Created,
    Open,
    Closed,
}

#[derive(Clone)]
pub struct StreamLifecycleManager {
    provider: Arc<AtomicStorageProvider>,
    locks: Arc<dyn PathLockManager>,
    records: Arc<dyn RecordStore>,
}

impl StreamLifecycleManager {
    pub fn new(
        provider: Arc<AtomicStorageProvider>,
        locks: Arc<dyn PathLockManager>,
        records: Arc<dyn RecordStore>,
    ) -> Self {
        StreamLifecycleManager {
            provider,
            locks,
            records,
        }
    }

    pub fn provider(&self) -> &Arc<AtomicStorageProvider> {
        &self.provider
    }

    pub fn locks(&self) -> &Arc<dyn PathLockManager> {
        &self.locks
    }

    pub fn reader(&self, path: VirtualPath) -> ArtifactReader {
        ArtifactReader {
            manager: self.clone(),
            path,
            state: StreamState::Created,
            lock: None,
            reader: None,
            read: 0,
        }
    }

    pub fn writer(&self, path: VirtualPath) -> ArtifactWriter {
        ArtifactWriter {
            manager: self.clone(),
            path,
            state: StreamState::Created,
            lock: None,
            staged: None,
            poisoned: false,
        }
    }

    /// A writer that adopts a write lock the caller already holds instead of
    /// acquiring its own. The lock is released when the writer closes.
    pub fn writer_with_lock(&self, path: VirtualPath, lock: LockHandle) -> ArtifactWriter {
        let mut writer = self.writer(path);
        writer.lock = Some(lock);
        writer
    }

    fn release(&self, lock: Option<LockHandle>) -> Result<(), StorageError> {
        match lock {
            Some(handle) => self.locks.unlock(handle).map_err(StorageError::from),
            None => Ok(()),
        }
    }
}

pub struct ArtifactWriter {
    manager: StreamLifecycleManager,
    path: VirtualPath,
    state: StreamState,
    lock: Option<LockHandle>,
    staged: Option<StagedWrite>,
    poisoned: bool,
}

impl ArtifactWriter {
    pub fn path(&self) -> &VirtualPath {
        &self.path
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn written(&self) -> u64 {
        self.staged.as_ref().map(StagedWrite::written).unwrap_or(0)
    }

    async fn open(&mut self) -> Result<(), StorageError> {
        match self.state {
            StreamState::Open => return Ok(()),
            StreamState::Closed => return Err(StorageError::StreamClosed(self.path.to_string())),
            StreamState::Created => {}
        }

        if self.lock.is_none() {
            let uri = self.path.canonical_uri();
            self.lock = Some(self.manager.locks.lock(&uri, LockMode::Write).await?);
        }

        let opened = async {
            self.manager
                .records
                .on_before_open(&self.path, StreamKind::Write)
                .await?;
            self.manager.provider.open_for_write(&self.path).await
        }
        .await;

        match opened {
            Ok(staged) => {
                self.staged = Some(staged);
                self.state = StreamState::Open;
                debug!("opened write stream for {}", self.path);
                Ok(())
            }
            Err(err) => {
                self.state = StreamState::Closed;
                if let Err(release_err) = self.manager.release(self.lock.take()) {
                    warn!("releasing lock of {} failed: {release_err}", self.path);
                }
                Err(err)
            }
        }
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> Result<(), StorageError> {
        self.open().await?;
        let staged = self
            .staged
            .as_mut()
            .ok_or_else(|| StorageError::StreamClosed(self.path.to_string()))?;
        if let Err(err) = staged.write_all(buf).await {
            self.poisoned = true;
            return Err(err);
        }
        Ok(())
    }

    /// Flushes buffered bytes and lets the record store persist progress.
    /// A writer that never opened has nothing to flush.
    pub async fn flush(&mut self) -> Result<(), StorageError> {
        if self.state != StreamState::Open {
            return Ok(());
        }
        let Some(staged) = self.staged.as_mut() else {
            return Ok(());
        };
        if let Err(err) = staged.flush().await {
            self.poisoned = true;
            return Err(err);
        }
        let written = staged.written();
        self.manager.records.on_commit(&self.path, written).await
    }

    /// Commits the staged bytes at the final path. A writer closed before
    /// any write commits an empty file. A writer whose writes failed is
    /// discarded instead of committed.
    pub async fn close(&mut self) -> Result<CommitOutcome, StorageError> {
        if self.state == StreamState::Closed {
            return Err(StorageError::StreamClosed(self.path.to_string()));
        }
        self.open().await?;

        let staged = self.staged.take();
        let written = staged.as_ref().map(StagedWrite::written).unwrap_or(0);
        let committed = match staged {
            Some(staged) if !self.poisoned => self.manager.provider.commit(staged).await,
            Some(staged) => {
                self.manager.provider.discard(staged).await;
                Err(StorageError::StreamClosed(self.path.to_string()))
            }
            None => Err(StorageError::StreamClosed(self.path.to_string())),
        };

        let after = self
            .manager
            .records
            .on_after_close(&self.path, StreamKind::Write, written)
            .await;
        let released = self.manager.release(self.lock.take());
        self.state = StreamState::Closed;
        debug!("closed write stream for {} ({written} bytes)", self.path);

        let outcome = committed?;
        after?;
        released?;
        Ok(outcome)
    }

    /// Drops everything written so far and releases the lock. No hooks run.
    pub async fn abort(&mut self) {
        if let Some(staged) = self.staged.take() {
            self.manager.provider.discard(staged).await;
        }
        if let Err(err) = self.manager.release(self.lock.take()) {
            warn!("releasing lock of {} failed: {err}", self.path);
        }
        self.state = StreamState::Closed;
        debug!("aborted write stream for {}", self.path);
    }
}

impl Drop for ArtifactWriter {
    fn drop(&mut self) {
        let Some(staged) = self.staged.take() else {
            return;
        };
        let lock = self.lock.take();
        let provider = self.manager.provider.clone();
        warn!("write stream for {} dropped without close, discarding", self.path);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    provider.discard(staged).await;
                    drop(lock);
                });
            }
            Err(_) => {
                // no runtime left to drive the discard, unlink the staging file here
                let staging = staged.temp().path().physical();
                drop(staged);
                if let Err(err) = std::fs::remove_file(&staging) {
                    warn!("failed to remove staging file {}: {err}", staging.display());
                }
                drop(lock);
            }
        }
    }
}

#[async_trait::async_trait]
impl ByteSink for ArtifactWriter {
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        ArtifactWriter::write_all(self, buf).await.map_err(io::Error::from)
    }

    async fn flush(&mut self) -> io::Result<()> {
        ArtifactWriter::flush(self).await.map_err(io::Error::from)
    }
}

pub struct ArtifactReader {
    manager: StreamLifecycleManager,
    path: VirtualPath,
    state: StreamState,
    lock: Option<LockHandle>,
    reader: Option<BoxedReader>,
    read: u64,
}

impl ArtifactReader {
    pub fn path(&self) -> &VirtualPath {
        &self.path
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    async fn open(&mut self) -> Result<(), StorageError> {
        match self.state {
            StreamState::Open => return Ok(()),
            StreamState::Closed => return Err(StorageError::StreamClosed(self.path.to_string())),
            StreamState::Created => {}
        }

        let uri = self.path.canonical_uri();
        self.lock = Some(self.manager.locks.lock(&uri, LockMode::Read).await?);

        let opened = async {
            self.manager
                .records
                .on_before_open(&self.path, StreamKind::Read)
                .await?;
            self.manager.provider.open_read(&self.path).await
        }
        .await;

        match opened {
            Ok(reader) => {
                self.reader = Some(reader);
                self.state = StreamState::Open;
                debug!("opened read stream for {}", self.path);
                Ok(())
            }
            Err(err) => {
                self.state = StreamState::Closed;
                if let Err(release_err) = self.manager.release(self.lock.take()) {
                    warn!("releasing lock of {} failed: {release_err}", self.path);
                }
                Err(err)
            }
        }
    }

    /// Reads into `buf`; `Ok(0)` at end of file.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, StorageError> {
        self.open().await?;
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| StorageError::StreamClosed(self.path.to_string()))?;
        let n = reader
            .read(buf)
            .await
            .map_err(|err| StorageError::io("read", self.path.physical(), err))?;
        self.read += n as u64;
        Ok(n)
    }

    pub async fn read_to_end(&mut self) -> Result<Vec<u8>, StorageError> {
        let mut body = Vec::new();
        let mut buf = vec![0u8; 8 * 1024];
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                return Ok(body);
            }
            body.extend_from_slice(&buf[..n]);
        }
    }

    /// Streams the remaining content into `sink`.
    pub async fn copy_to(&mut self, sink: &mut dyn ByteSink) -> Result<u64, StorageError> {
        let mut buf = vec![0u8; 8 * 1024];
        let mut copied = 0u64;
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                sink.flush()
                    .await
                    .map_err(|err| StorageError::io("flush", self.path.physical(), err))?;
                return Ok(copied);
            }
            sink.write_all(&buf[..n])
                .await
                .map_err(|err| StorageError::io("write", self.path.physical(), err))?;
            copied += n as u64;
        }
    }

    /// Closing a reader that never opened does nothing.
    pub async fn close(&mut self) -> Result<u64, StorageError> {
        match self.state {
            StreamState::Closed => return Ok(self.read),
            StreamState::Created => {
                self.state = StreamState::Closed;
                return Ok(0);
            }
            StreamState::Open => {}
        }
        self.reader = None;
        let after = self
            .manager
            .records
            .on_after_close(&self.path, StreamKind::Read, self.read)
            .await;
        let released = self.manager.release(self.lock.take());
        self.state = StreamState::Closed;
        debug!("closed read stream for {} ({} bytes)", self.path, self.read);

        after?;
        released?;
        Ok(self.read)
    }
}
