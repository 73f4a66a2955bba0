use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::domain::{RemoteRepository, Repository};
use crate::error::StorageError;
use crate::lock::{FileLockManager, InMemoryPathLockManager, PathLockManager};
use crate::remote::{HeartbeatCache, RemoteHeartbeat};
use crate::service::record::{InMemoryRecordStore, RecordStore};
use crate::service::repository::ProxyRepositoryService;
use crate::service::stream::StreamLifecycleManager;
use crate::storage::AtomicStorageProvider;

/// Everything a request handler needs, wired from one [`Config`].
#[derive(Clone)]
pub struct DepotState {
    pub config: Arc<Config>,
    pub provider: Arc<AtomicStorageProvider>,
    pub locks: Arc<dyn PathLockManager>,
    pub records: Arc<dyn RecordStore>,
    pub heartbeat: Arc<dyn RemoteHeartbeat>,
    pub streams: StreamLifecycleManager,
    pub service: Arc<ProxyRepositoryService>,
}

impl DepotState {
    pub fn new(config: Config) -> Result<Self, StorageError> {
        let locks: Arc<dyn PathLockManager> = match &config.lock_dir {
            Some(dir) => {
                info!("using file locks in {}", dir.display());
                Arc::new(FileLockManager::new(dir)?)
            }
            None => Arc::new(InMemoryPathLockManager::new()),
        };
        let records = Arc::new(InMemoryRecordStore::new());
        Ok(Self::with_parts(config, locks, records))
    }

    pub fn with_parts(
        config: Config,
        locks: Arc<dyn PathLockManager>,
        records: Arc<dyn RecordStore>,
    ) -> Self {
        let provider = Arc::new(AtomicStorageProvider::filesystem().with_locks(locks.clone()));
        let heartbeat: Arc<dyn RemoteHeartbeat> =
            Arc::new(HeartbeatCache::new(config.fetch.heartbeat_ttl()));
        let streams = StreamLifecycleManager::new(provider.clone(), locks.clone(), records.clone());
        let service = Arc::new(ProxyRepositoryService::new(
            streams.clone(),
            heartbeat.clone(),
            config.fetch.clone(),
        ));

        DepotState {
            config: Arc::new(config),
            provider,
            locks,
            records,
            heartbeat,
            streams,
            service,
        }
    }

    /// A hosted repository rooted at `<root_dir>/<storage_id>/<id>` with the
    /// configured policy.
    pub fn repository(&self, id: &str) -> Arc<Repository> {
        Arc::new(self.repository_with(id, None))
    }

    pub fn proxy_repository(&self, id: &str, remote: RemoteRepository) -> Arc<Repository> {
        Arc::new(self.repository_with(id, Some(remote)))
    }

    fn repository_with(&self, id: &str, remote: Option<RemoteRepository>) -> Repository {
        let root = self.config.root_dir.join(&self.config.storage_id).join(id);
        let repository = Repository::new(self.config.storage_id.clone(), id, root)
            .with_policy(self.config.policy.clone());
        match remote {
            Some(remote) => repository.with_remote(remote),
            None => repository,
        }
    }
}
