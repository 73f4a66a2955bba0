use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};

use crate::error::StorageError;
use crate::storage::{CanonicalUri, VirtualPath};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamKind {
    Read,
    Write,
}

/// Hooks through which the external artifact metadata store follows stream
/// usage. The storage core never persists these records itself.
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    async fn on_before_open(
        &self,
        path: &VirtualPath,
        kind: StreamKind,
    ) -> Result<(), StorageError>;

    /// Called on every explicit flush of a write stream.
    async fn on_commit(&self, path: &VirtualPath, bytes_so_far: u64) -> Result<(), StorageError>;

    async fn on_after_close(
        &self,
        path: &VirtualPath,
        kind: StreamKind,
        total_bytes: u64,
    ) -> Result<(), StorageError>;
}

pub struct NoopRecordStore;

#[async_trait::async_trait]
impl RecordStore for NoopRecordStore {
    async fn on_before_open(
        &self,
        _path: &VirtualPath,
        _kind: StreamKind,
    ) -> Result<(), StorageError> {
        Ok(())
    }

    async fn on_commit(&self, _path: &VirtualPath, _bytes_so_far: u64) -> Result<(), StorageError> {
        Ok(())
    }

    async fn on_after_close(
        &self,
        _path: &VirtualPath,
        _kind: StreamKind,
        _total_bytes: u64,
    ) -> Result<(), StorageError> {
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArtifactRecord {
    pub size: u64,
    pub last_used: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub download_count: u64,
}

/// Keeps records in memory, keyed by canonical URI.
#[derive(Default)]
pub struct InMemoryRecordStore {
    records: Mutex<HashMap<CanonicalUri, ArtifactRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, uri: &CanonicalUri) -> Option<ArtifactRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uri)
            .cloned()
    }

    fn update(&self, path: &VirtualPath, apply: impl FnOnce(&mut ArtifactRecord)) {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        apply(records.entry(path.canonical_uri()).or_default());
    }
}

#[async_trait::async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn on_before_open(
        &self,
        path: &VirtualPath,
        kind: StreamKind,
    ) -> Result<(), StorageError> {
        if kind == StreamKind::Read {
            self.update(path, |record| record.last_used = Some(Utc::now()));
        }
        Ok(())
    }

    async fn on_commit(&self, path: &VirtualPath, bytes_so_far: u64) -> Result<(), StorageError> {
        self.update(path, |record| {
            record.size = bytes_so_far;
            record.last_updated = Some(Utc::now());
        });
        Ok(())
    }

    async fn on_after_close(
        &self,
        path: &VirtualPath,
        kind: StreamKind,
        total_bytes: u64,
    ) -> Result<(), StorageError> {
        let now = Utc::now();
        self.update(path, |record| match kind {
            StreamKind::Read => {
                record.download_count += 1;
                record.last_used = Some(now);
            }
            StreamKind::Write => {
                record.size = total_bytes;
                record.last_updated = Some(now);
            }
        });
        Ok(())
    }
}
