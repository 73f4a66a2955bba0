use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info, warn};

use crate::config::FetchConfig;
use crate::domain::RemoteRepository;
use crate::error::{FetchError, StorageError};
use crate::lock::LockMode;
use crate::remote::{HttpRemoteClient, RemoteArtifactClient, RemoteHeartbeat};
use crate::service::proxy::ProxyFetchEngine;
use crate::service::sink::{ByteSink, TeeSink};
use crate::service::stream::{ArtifactReader, StreamLifecycleManager};
use crate::storage::VirtualPath;

/// Serves artifacts of hosted and proxy repositories. A proxy miss is
/// fetched once under the artifact's write lock; concurrent requesters wait
/// on that lock and then find the artifact stored.
pub struct ProxyRepositoryService {
    streams: StreamLifecycleManager,
    heartbeat: Arc<dyn RemoteHeartbeat>,
    config: FetchConfig,
    remotes: RwLock<HashMap<String, Arc<dyn RemoteArtifactClient>>>,
}

impl ProxyRepositoryService {
    pub fn new(
        streams: StreamLifecycleManager,
        heartbeat: Arc<dyn RemoteHeartbeat>,
        config: FetchConfig,
    ) -> Self {
        ProxyRepositoryService {
            streams,
            heartbeat,
            config,
            remotes: RwLock::new(HashMap::new()),
        }
    }

    pub fn streams(&self) -> &StreamLifecycleManager {
        &self.streams
    }

    /// Uses `client` for the remote it identifies instead of a plain HTTP
    /// client built from the repository's URL.
    pub fn register_remote(&self, client: Arc<dyn RemoteArtifactClient>) {
        let id = client.remote_id().to_string();
        self.remotes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, client);
    }

    fn client_for(
        &self,
        path: &VirtualPath,
        remote: &RemoteRepository,
    ) -> Result<Arc<dyn RemoteArtifactClient>, FetchError> {
        if let Some(client) = self
            .remotes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&remote.id)
        {
            return Ok(client.clone());
        }

        let http = HttpRemoteClient::new(remote).map_err(|source| FetchError::RemoteUnavailable {
            path: path.relative(),
            remote: remote.id.clone(),
            source,
        })?;
        let client: Arc<dyn RemoteArtifactClient> = Arc::new(http);
        let mut remotes = self.remotes.write().unwrap_or_else(PoisonError::into_inner);
        Ok(remotes.entry(remote.id.clone()).or_insert(client).clone())
    }

    /// Opens `path` for reading, fetching it from the remote first when a
    /// proxy repository does not hold it yet.
    pub async fn resolve(&self, path: &VirtualPath) -> Result<ArtifactReader, FetchError> {
        if !self.stored(path).await? {
            self.materialize(path, None).await?;
        }
        Ok(self.streams.reader(path.clone()))
    }

    /// Streams `path` into `sink`. A proxy miss is written to local storage
    /// and to `sink` in one pass; a sink that fails midway is dropped and
    /// the local copy still completes.
    pub async fn fetch_to(
        &self,
        path: &VirtualPath,
        sink: &mut dyn ByteSink,
    ) -> Result<u64, FetchError> {
        if !self.stored(path).await? {
            if let Some(delivered) = self.materialize(path, Some(&mut *sink)).await? {
                return Ok(delivered);
            }
        }

        let mut reader = self.streams.reader(path.clone());
        let copied = reader.copy_to(sink).await;
        let closed = reader.close().await;
        let copied = copied.map_err(|err| FetchError::storage(path.relative(), err))?;
        closed.map_err(|err| FetchError::storage(path.relative(), err))?;
        Ok(copied)
    }

    async fn stored(&self, path: &VirtualPath) -> Result<bool, FetchError> {
        self.streams
            .provider()
            .exists(path)
            .await
            .map_err(|err| FetchError::storage(path.relative(), err))
    }

    /// Fetches `path` under its write lock. `None` when another requester
    /// stored it while we waited for the lock.
    async fn materialize(
        &self,
        path: &VirtualPath,
        client: Option<&mut dyn ByteSink>,
    ) -> Result<Option<u64>, FetchError> {
        if path.is_hidden() {
            let missing = StorageError::NotFound(path.relative());
            return Err(FetchError::storage(path.relative(), missing));
        }
        let Some(remote) = path.repository().remote.clone() else {
            return Err(FetchError::NotProxied { path: path.relative() });
        };
        let client_for_remote = self.client_for(path, &remote)?;

        let lock = self
            .streams
            .locks()
            .lock(&path.canonical_uri(), LockMode::Write)
            .await
            .map_err(|err| FetchError::storage(path.relative(), err))?;

        if self.stored(path).await? {
            debug!("{path} was fetched while waiting for its lock");
            self.streams
                .locks()
                .unlock(lock)
                .map_err(|err| FetchError::storage(path.relative(), err.into()))?;
            return Ok(None);
        }

        let engine = ProxyFetchEngine::new(
            client_for_remote,
            self.heartbeat.clone(),
            self.config.clone(),
        );
        let resource = path.resource_uri();
        let mut writer = self.streams.writer_with_lock(path.clone(), lock);
        let fetched = match client {
            Some(client) => {
                let mut tee = TeeSink::new(&mut writer, client);
                engine.fetch(&resource, &mut tee).await
            }
            None => engine.fetch(&resource, &mut writer).await,
        };

        match fetched {
            Ok(delivered) => {
                let outcome = writer
                    .close()
                    .await
                    .map_err(|err| FetchError::storage(path.relative(), err))?;
                self.heartbeat.record(&remote.id, true).await;
                info!("cached {path} from remote {} ({} bytes)", remote.id, outcome.bytes);
                Ok(Some(delivered))
            }
            Err(err) => {
                writer.abort().await;
                if matches!(
                    err,
                    FetchError::AttemptsExhausted { .. } | FetchError::TimedOut { .. }
                ) {
                    warn!("marking remote {} dead after failing to fetch {path}", remote.id);
                    self.heartbeat.record(&remote.id, false).await;
                }
                Err(err)
            }
        }
    }
}
