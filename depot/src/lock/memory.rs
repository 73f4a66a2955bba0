use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::debug;

use crate::error::{LockStateError, StorageError};
use crate::lock::{LockHandle, LockMode, PathLockManager, next_manager_id};
use crate::storage::CanonicalUri;

struct Entry {
    lock: Arc<RwLock<()>>,
    // holders and waiters; the entry goes away when this drops to zero
    users: usize,
}

type Table = Arc<Mutex<HashMap<CanonicalUri, Entry>>>;

fn table_guard(table: &Table) -> MutexGuard<'_, HashMap<CanonicalUri, Entry>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

fn forget(table: &Table, uri: &CanonicalUri) {
    let mut entries = table_guard(table);
    if let Some(entry) = entries.get_mut(uri) {
        entry.users = entry.users.saturating_sub(1);
        if entry.users == 0 {
            entries.remove(uri);
        }
    }
}

enum Guard {
    Read(#[allow(dead_code)] OwnedRwLockReadGuard<()>),
    Write(#[allow(dead_code)] OwnedRwLockWriteGuard<()>),
}

/// Unregisters a waiter whose acquisition was cancelled.
struct Waiting {
    table: Table,
    uri: CanonicalUri,
    armed: bool,
}

impl Drop for Waiting {
    fn drop(&mut self) {
        if self.armed {
            forget(&self.table, &self.uri);
        }
    }
}

/// Single-process lock manager: one `tokio::sync::RwLock` per canonical URI,
/// created on demand and dropped once nobody holds or waits for it.
pub struct InMemoryPathLockManager {
    id: usize,
    table: Table,
}

impl InMemoryPathLockManager {
    pub fn new() -> Self {
        InMemoryPathLockManager {
            id: next_manager_id(),
            table: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of URIs currently locked or awaited.
    pub fn active_keys(&self) -> usize {
        table_guard(&self.table).len()
    }

    fn register(&self, uri: &CanonicalUri) -> Arc<RwLock<()>> {
        let mut entries = table_guard(&self.table);
        let entry = entries.entry(uri.clone()).or_insert_with(|| Entry {
            lock: Arc::new(RwLock::new(())),
            users: 0,
        });
        entry.users += 1;
        entry.lock.clone()
    }

    fn grant(&self, uri: &CanonicalUri, mode: LockMode, guard: Guard) -> LockHandle {
        debug!("acquired {mode} lock on {uri}");
        let table = self.table.clone();
        let key = uri.clone();
        LockHandle::new(uri.clone(), mode, self.id, move || {
            drop(guard);
            forget(&table, &key);
            debug!("released {mode} lock on {key}");
        })
    }
}

impl Default for InMemoryPathLockManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PathLockManager for InMemoryPathLockManager {
    async fn lock(&self, uri: &CanonicalUri, mode: LockMode) -> Result<LockHandle, StorageError> {
        let lock = self.register(uri);
        let mut waiting = Waiting {
            table: self.table.clone(),
            uri: uri.clone(),
            armed: true,
        };
        let guard = match mode {
            LockMode::Read => Guard::Read(lock.read_owned().await),
            LockMode::Write => Guard::Write(lock.write_owned().await),
        };
        waiting.armed = false;
        Ok(self.grant(uri, mode, guard))
    }

    async fn try_lock(
        &self,
        uri: &CanonicalUri,
        mode: LockMode,
    ) -> Result<Option<LockHandle>, StorageError> {
        let lock = self.register(uri);
        let guard = match mode {
            LockMode::Read => lock.try_read_owned().map(Guard::Read),
            LockMode::Write => lock.try_write_owned().map(Guard::Write),
        };
        match guard {
            Ok(guard) => Ok(Some(self.grant(uri, mode, guard))),
            Err(_) => {
                forget(&self.table, uri);
                Ok(None)
            }
        }
    }

    fn unlock(&self, handle: LockHandle) -> Result<(), LockStateError> {
        if handle.owner() != self.id {
            return Err(handle.state_error());
        }
        let held = table_guard(&self.table)
            .get(handle.uri())
            .is_some_and(|entry| entry.users > 0);
        if !held {
            return Err(handle.state_error());
        }
        drop(handle);
        Ok(())
    }
}
