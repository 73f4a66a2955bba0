use std::path::Path;
use std::pin::Pin;

use tokio::io::{self, AsyncRead, AsyncWrite};

pub mod checksum;
pub mod driver;
pub mod paths;
pub mod provider;

pub use paths::{CanonicalUri, TempPath, TrashPath, VirtualPath};
pub use provider::{AtomicStorageProvider, StagedWrite};

pub type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;
pub type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryMetadata {
    pub is_dir: bool,
    pub len: u64,
}

/// Raw calls against one physical backend. Paths are physical; containment,
/// temp and trash semantics live in [`AtomicStorageProvider`].
#[async_trait::async_trait]
pub trait StorageDriver: Send + Sync {
    async fn open_read(&self, path: &Path) -> io::Result<BoxedReader>;
    /// Creates a new file, failing with `AlreadyExists` if one is there. The
    /// parent directory must exist.
    async fn create(&self, path: &Path) -> io::Result<BoxedWriter>;
    /// Makes the bytes of a closed file durable.
    async fn sync(&self, path: &Path) -> io::Result<()>;
    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
    async fn remove_file(&self, path: &Path) -> io::Result<()>;
    /// Removes an empty directory.
    async fn remove_dir(&self, path: &Path) -> io::Result<()>;
    async fn create_dir_all(&self, path: &Path) -> io::Result<()>;
    /// `None` when nothing exists at `path`.
    async fn metadata(&self, path: &Path) -> io::Result<Option<EntryMetadata>>;
    /// Sorted entry names of a directory.
    async fn read_dir(&self, path: &Path) -> io::Result<Vec<String>>;
}
