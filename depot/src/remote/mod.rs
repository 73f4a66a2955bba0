//! Upstream side of a proxy repository.

pub mod heartbeat;
pub mod http;

pub use heartbeat::{HeartbeatCache, RemoteHeartbeat};
pub use http::HttpRemoteClient;

use crate::error::TransportError;
use crate::storage::BoxedReader;

/// An opened remote body. `status` is the HTTP-like status the remote
/// answered with; 206 marks a partial body.
pub struct RemoteResponse {
    pub status: u16,
    pub accept_ranges: Option<String>,
    pub content_length: Option<u64>,
    pub body: BoxedReader,
}

impl RemoteResponse {
    pub fn supports_ranges(&self) -> bool {
        accepts_byte_ranges(self.accept_ranges.as_deref())
    }

    pub fn is_partial(&self) -> bool {
        self.status == 206
    }
}

impl std::fmt::Debug for RemoteResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteResponse")
            .field("status", &self.status)
            .field("accept_ranges", &self.accept_ranges)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

fn accepts_byte_ranges(header: Option<&str>) -> bool {
    header.is_some_and(|value| {
        value
            .split(',')
            .any(|unit| unit.trim().eq_ignore_ascii_case("bytes"))
    })
}

/// Headers of a remote resource without its body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RemoteProbe {
    pub status: u16,
    pub accept_ranges: Option<String>,
    pub content_length: Option<u64>,
}

impl RemoteProbe {
    pub fn supports_ranges(&self) -> bool {
        accepts_byte_ranges(self.accept_ranges.as_deref())
    }
}

/// Client for one remote repository. `resource` is the path relative to the
/// remote's base URL.
#[async_trait::async_trait]
pub trait RemoteArtifactClient: Send + Sync {
    /// Identifier of the remote, used as the heartbeat key.
    fn remote_id(&self) -> &str;

    async fn get(&self, resource: &str) -> Result<RemoteResponse, TransportError> {
        self.get_from(resource, 0).await
    }

    /// Opens the resource starting at byte `offset`. An offset of zero asks
    /// for the whole body.
    async fn get_from(&self, resource: &str, offset: u64) -> Result<RemoteResponse, TransportError>;

    async fn head(&self, resource: &str) -> Result<RemoteProbe, TransportError>;
}
