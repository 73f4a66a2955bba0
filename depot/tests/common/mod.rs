#![allow(dead_code)]

use std::io;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use depot::config::{Config, FetchConfig, RepositoryPolicy};
use depot::error::TransportError;
use depot::remote::{RemoteArtifactClient, RemoteProbe, RemoteResponse};
use depot::utils::state::DepotState;
use tempfile::TempDir;
use tokio_util::io::StreamReader;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("depot=debug")),
        )
        .with_test_writer()
        .try_init();
}

pub struct TestDepot {
    pub dir: TempDir,
    pub state: DepotState,
}

pub fn depot_with(fetch: FetchConfig, policy: RepositoryPolicy) -> TestDepot {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let config = Config {
        root_dir: dir.path().to_path_buf(),
        storage_id: "storage0".to_string(),
        lock_dir: None,
        fetch,
        policy,
    };
    let state = DepotState::new(config).expect("state");
    TestDepot { dir, state }
}

pub fn depot() -> TestDepot {
    depot_with(FetchConfig::default(), RepositoryPolicy::default())
}

pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

/// In-memory remote serving one body, optionally dropping the connection
/// after a number of bytes on selected attempts.
pub struct FakeRemote {
    id: String,
    data: Vec<u8>,
    delay: Duration,
    missing: bool,
    fail_at: Mutex<Vec<Option<usize>>>,
    gets: AtomicUsize,
    offsets: Mutex<Vec<u64>>,
}

impl FakeRemote {
    pub fn new(id: &str, data: Vec<u8>) -> Self {
        FakeRemote {
            id: id.to_string(),
            data,
            delay: Duration::ZERO,
            missing: false,
            fail_at: Mutex::new(Vec::new()),
            gets: AtomicUsize::new(0),
            offsets: Mutex::new(Vec::new()),
        }
    }

    /// Holds every response back for `delay` so concurrent callers overlap.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// The n-th GET is cut after `fail_at[n]` bytes when that entry is set.
    pub fn failing(self, fail_at: Vec<Option<usize>>) -> Self {
        *self.fail_at.lock().unwrap() = fail_at;
        self
    }

    pub fn missing(mut self) -> Self {
        self.missing = true;
        self
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn offsets(&self) -> Vec<u64> {
        self.offsets.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl RemoteArtifactClient for FakeRemote {
    fn remote_id(&self) -> &str {
        &self.id
    }

    async fn get_from(
        &self,
        resource: &str,
        offset: u64,
    ) -> Result<RemoteResponse, TransportError> {
        let attempt = self.gets.fetch_add(1, Ordering::SeqCst);
        self.offsets.lock().unwrap().push(offset);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.missing {
            return Err(TransportError::Status {
                resource: resource.to_string(),
                status: 404,
            });
        }

        let remaining = &self.data[offset as usize..];
        let cut = self.fail_at.lock().unwrap().get(attempt).copied().flatten();
        let mut chunks: Vec<io::Result<Bytes>> = remaining
            .chunks(1024)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        if let Some(cut) = cut {
            chunks = remaining[..cut]
                .chunks(1024)
                .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
                .collect();
            let dropped = io::Error::new(io::ErrorKind::ConnectionAborted, "connection dropped");
            chunks.push(Err(dropped));
        }

        Ok(RemoteResponse {
            status: if offset > 0 { 206 } else { 200 },
            accept_ranges: Some("bytes".to_string()),
            content_length: Some(remaining.len() as u64),
            body: Box::pin(StreamReader::new(futures::stream::iter(chunks))),
        })
    }

    async fn head(&self, _resource: &str) -> Result<RemoteProbe, TransportError> {
        Ok(RemoteProbe {
            status: 200,
            accept_ranges: Some("bytes".to_string()),
            content_length: Some(self.data.len() as u64),
        })
    }
}
