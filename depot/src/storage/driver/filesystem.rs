use std::path::Path;

use crate::storage::{BoxedReader, BoxedWriter, EntryMetadata, StorageDriver};

use tokio::{
    fs::{
        File, OpenOptions, create_dir_all, read_dir, remove_dir, remove_file, rename,
        symlink_metadata,
    },
    io::{self, BufWriter},
};

/// Local disk backend.
#[derive(Clone, Debug, Default)]
pub struct FilesystemDriver;

impl FilesystemDriver {
    pub fn new() -> Self {
        FilesystemDriver
    }
}

#[async_trait::async_trait]
impl StorageDriver for FilesystemDriver {
    async fn open_read(&self, path: &Path) -> io::Result<BoxedReader> {
        let file = File::open(path).await?;
        Ok(Box::pin(file))
    }

    async fn create(&self, path: &Path) -> io::Result<BoxedWriter> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await?;
        Ok(Box::pin(BufWriter::new(file)))
    }

    async fn sync(&self, path: &Path) -> io::Result<()> {
        let file = OpenOptions::new().write(true).open(path).await?;
        file.sync_all().await
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        rename(from, to).await
    }

    async fn remove_file(&self, path: &Path) -> io::Result<()> {
        remove_file(path).await
    }

    async fn remove_dir(&self, path: &Path) -> io::Result<()> {
        remove_dir(path).await
    }

    async fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        create_dir_all(path).await
    }

    async fn metadata(&self, path: &Path) -> io::Result<Option<EntryMetadata>> {
        match symlink_metadata(path).await {
            Ok(meta) => Ok(Some(EntryMetadata {
                is_dir: meta.is_dir(),
                len: meta.len(),
            })),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn read_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        let mut entries = vec![];
        let mut read_dir = read_dir(path).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            if let Some(file_name) = entry.file_name().to_str() {
                entries.push(file_name.to_string());
            }
        }
        entries.sort();
        Ok(entries)
    }
}
