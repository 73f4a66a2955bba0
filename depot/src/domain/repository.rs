use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::RepositoryPolicy;
use crate::domain::layout::{GenericLayout, LayoutProvider};

/// Upstream source a proxy repository mirrors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteRepository {
    pub id: String,
    pub url: String,
}

impl RemoteRepository {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        RemoteRepository {
            id: id.into(),
            url: url.into(),
        }
    }
}

/// One repository: a single logical root on the physical backend.
pub struct Repository {
    pub storage_id: String,
    pub id: String,
    pub root: PathBuf,
    pub policy: RepositoryPolicy,
    pub remote: Option<RemoteRepository>,
    pub layout: Arc<dyn LayoutProvider>,
}

impl Repository {
    pub fn new(
        storage_id: impl Into<String>,
        id: impl Into<String>,
        root: impl Into<PathBuf>,
    ) -> Self {
        Repository {
            storage_id: storage_id.into(),
            id: id.into(),
            root: root.into(),
            policy: RepositoryPolicy::default(),
            remote: None,
            layout: Arc::new(GenericLayout::new()),
        }
    }

    pub fn with_policy(mut self, policy: RepositoryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_remote(mut self, remote: RemoteRepository) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_layout(mut self, layout: Arc<dyn LayoutProvider>) -> Self {
        self.layout = layout;
        self
    }

    pub fn is_proxy(&self) -> bool {
        self.remote.is_some()
    }

    /// `<storage>/<repository>`, used in log lines and canonical URIs.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.storage_id, self.id)
    }
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("storage_id", &self.storage_id)
            .field("id", &self.id)
            .field("root", &self.root)
            .field("policy", &self.policy)
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}
