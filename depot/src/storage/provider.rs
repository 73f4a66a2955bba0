use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::lock::{LockMode, PathLockManager};
use crate::storage::checksum::{ChecksumStatus, DigestAlgorithm, DigestSet, parse_checksum_file};
use crate::storage::driver::FilesystemDriver;
use crate::storage::paths::{TEMP_DIR, TRASH_DIR, TempPath, VirtualPath};
use crate::storage::{BoxedReader, BoxedWriter, EntryMetadata, StorageDriver};

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// An open write against a private staging file in the `.temp` mirror of its
/// target.
///
/// Nothing is visible at the target until [`AtomicStorageProvider::commit`].
pub struct StagedWrite {
    temp: TempPath,
    writer: BoxedWriter,
    digests: DigestSet,
    written: u64,
}

impl StagedWrite {
    pub fn temp(&self) -> &TempPath {
        &self.temp
    }

    pub fn target(&self) -> &VirtualPath {
        self.temp.target()
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> Result<(), StorageError> {
        self.writer
            .write_all(buf)
            .await
            .map_err(|err| StorageError::io("write", self.temp.path().physical(), err))?;
        self.digests.update(buf);
        self.written += buf.len() as u64;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), StorageError> {
        self.writer
            .flush()
            .await
            .map_err(|err| StorageError::io("flush", self.temp.path().physical(), err))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitOutcome {
    pub bytes: u64,
    pub digests: BTreeMap<DigestAlgorithm, String>,
}

/// Crash-safe writes, soft delete and checksum bookkeeping on top of a
/// [`StorageDriver`].
#[derive(Clone)]
pub struct AtomicStorageProvider {
    driver: Arc<dyn StorageDriver>,
    locks: Option<Arc<dyn PathLockManager>>,
}

impl AtomicStorageProvider {
    pub fn new(driver: Arc<dyn StorageDriver>) -> Self {
        AtomicStorageProvider {
            driver,
            locks: None,
        }
    }

    pub fn filesystem() -> Self {
        Self::new(Arc::new(FilesystemDriver::new()))
    }

    /// Checksum siblings written on commit take their write lock from
    /// `locks`, and a sibling some stream holds is left to that stream.
    pub fn with_locks(mut self, locks: Arc<dyn PathLockManager>) -> Self {
        self.locks = Some(locks);
        self
    }

    async fn metadata(&self, path: &VirtualPath) -> Result<Option<EntryMetadata>, StorageError> {
        let physical = path.physical();
        self.driver
            .metadata(&physical)
            .await
            .map_err(|err| StorageError::io("stat", physical, err))
    }

    pub async fn exists(&self, path: &VirtualPath) -> Result<bool, StorageError> {
        Ok(self.metadata(path).await?.is_some())
    }

    pub async fn is_directory(&self, path: &VirtualPath) -> Result<bool, StorageError> {
        Ok(self.metadata(path).await?.is_some_and(|m| m.is_dir))
    }

    pub async fn size(&self, path: &VirtualPath) -> Result<u64, StorageError> {
        match self.metadata(path).await? {
            None => Err(StorageError::NotFound(path.to_string())),
            Some(meta) if meta.is_dir => Err(StorageError::IsDirectory(path.to_string())),
            Some(meta) => Ok(meta.len),
        }
    }

    /// Children of a directory. The hidden `.temp` and `.trash` subtrees are
    /// never listed.
    pub async fn list(&self, dir: &VirtualPath) -> Result<Vec<VirtualPath>, StorageError> {
        let physical = dir.physical();
        let names = self
            .driver
            .read_dir(&physical)
            .await
            .map_err(|err| StorageError::io("list", physical, err))?;

        let mut children = Vec::with_capacity(names.len());
        for name in names {
            if dir.is_root() && (name == TEMP_DIR || name == TRASH_DIR) {
                continue;
            }
            match dir.resolve(&name) {
                Ok(child) => children.push(child),
                Err(err) => warn!("skipping entry `{name}` of {dir}: {err}"),
            }
        }
        Ok(children)
    }

    pub async fn open_read(&self, path: &VirtualPath) -> Result<BoxedReader, StorageError> {
        match self.metadata(path).await? {
            None => return Err(StorageError::NotFound(path.to_string())),
            Some(meta) if meta.is_dir => return Err(StorageError::IsDirectory(path.to_string())),
            Some(_) => {}
        }
        let physical = path.physical();
        self.driver
            .open_read(&physical)
            .await
            .map_err(|err| StorageError::io("open", physical, err))
    }

    pub async fn read_to_end(&self, path: &VirtualPath) -> Result<Vec<u8>, StorageError> {
        let mut reader = self.open_read(path).await?;
        let mut body = Vec::new();
        reader
            .read_to_end(&mut body)
            .await
            .map_err(|err| StorageError::io("read", path.physical(), err))?;
        Ok(body)
    }

    /// Opens a write whose bytes go to a fresh staging file in the `.temp`
    /// mirror of `path`.
    pub async fn open_for_write(&self, path: &VirtualPath) -> Result<StagedWrite, StorageError> {
        if path.is_root() {
            return Err(StorageError::IsDirectory(path.to_string()));
        }
        let temp = path.staging_path();
        self.ensure_parent(temp.path()).await?;
        let physical = temp.path().physical();
        let writer = self
            .driver
            .create(&physical)
            .await
            .map_err(|err| StorageError::io("create", physical, err))?;

        let target = temp.target();
        let algorithms = if target.is_artifact() {
            target.repository().policy.digest_algorithms.clone()
        } else {
            Vec::new()
        };
        debug!("staging write for {target} in {}", temp.path());

        Ok(StagedWrite {
            digests: DigestSet::new(&algorithms),
            temp,
            writer,
            written: 0,
        })
    }

    /// Moves a staged write to its final location with a single rename, then
    /// writes the checksum siblings of artifacts. The temp file never
    /// outlives a failed commit.
    pub async fn commit(&self, staged: StagedWrite) -> Result<CommitOutcome, StorageError> {
        let StagedWrite {
            temp,
            mut writer,
            digests,
            written,
        } = staged;

        let shutdown = writer
            .shutdown()
            .await
            .map_err(|err| StorageError::io("close", temp.path().physical(), err));
        drop(writer);

        let moved = match shutdown {
            Ok(()) => self.move_into_place(&temp).await,
            Err(err) => Err(err),
        };
        if let Err(err) = moved {
            self.remove_stray(&temp).await;
            return Err(err);
        }
        info!("committed {} ({written} bytes)", temp.target());

        let digests = digests.finish();
        self.write_checksums(temp.target(), &digests).await;
        Ok(CommitOutcome {
            bytes: written,
            digests,
        })
    }

    /// Abandons a staged write and removes its temp file.
    pub async fn discard(&self, staged: StagedWrite) {
        let StagedWrite {
            temp, mut writer, ..
        } = staged;
        if let Err(err) = writer.shutdown().await {
            debug!("closing discarded write {} failed: {err}", temp.path());
        }
        drop(writer);
        self.remove_stray(&temp).await;
        debug!("discarded staged write for {}", temp.target());
    }

    async fn move_into_place(&self, temp: &TempPath) -> Result<(), StorageError> {
        let source = temp.path().physical();
        self.driver
            .sync(&source)
            .await
            .map_err(|err| StorageError::io("sync", source.clone(), err))?;

        let target = temp.target();
        self.ensure_parent(target).await?;
        let destination = target.physical();
        match self.metadata(target).await? {
            Some(meta) if meta.is_dir => {
                return Err(StorageError::IsDirectory(target.to_string()));
            }
            Some(_) => {
                self.driver
                    .remove_file(&destination)
                    .await
                    .map_err(|err| StorageError::io("remove", destination.clone(), err))?;
            }
            None => {}
        }
        self.driver
            .rename(&source, &destination)
            .await
            .map_err(|err| StorageError::io("rename", source, err))
    }

    async fn remove_stray(&self, temp: &TempPath) {
        let physical = temp.path().physical();
        if let Err(err) = self.driver.remove_file(&physical).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to remove stray temp file {}: {err}", physical.display());
            }
        }
    }

    async fn ensure_parent(&self, path: &VirtualPath) -> Result<(), StorageError> {
        let physical = path.physical();
        if let Some(parent) = physical.parent() {
            self.driver
                .create_dir_all(parent)
                .await
                .map_err(|err| StorageError::io("mkdir", parent, err))?;
        }
        Ok(())
    }

    async fn write_checksums(
        &self,
        path: &VirtualPath,
        digests: &BTreeMap<DigestAlgorithm, String>,
    ) {
        let Some(name) = path.file_name() else {
            return;
        };
        for (algorithm, hex) in digests {
            let extension = algorithm.extension();
            let sibling = match path.resolve_sibling(&format!("{name}.{extension}")) {
                Ok(sibling) => sibling,
                Err(err) => {
                    warn!("cannot place {algorithm} checksum of {path}: {err}");
                    continue;
                }
            };
            let uri = sibling.canonical_uri();
            let _guard = match &self.locks {
                None => None,
                Some(locks) => match locks.try_lock(&uri, LockMode::Write).await {
                    Ok(Some(handle)) => Some(handle),
                    Ok(None) => {
                        warn!("{sibling} is being written by another stream, not replacing it");
                        continue;
                    }
                    Err(err) => {
                        warn!("failed to lock {algorithm} checksum {sibling}: {err}");
                        continue;
                    }
                },
            };
            if let Err(err) = self.store_small(&sibling, hex.as_bytes()).await {
                warn!("failed to write {algorithm} checksum {sibling}: {err}");
            }
        }
    }

    /// Atomic write of a small body without checksum bookkeeping.
    async fn store_small(&self, path: &VirtualPath, body: &[u8]) -> Result<(), StorageError> {
        let temp = path.staging_path();
        self.ensure_parent(temp.path()).await?;
        let physical = temp.path().physical();
        let result = async {
            let mut writer = self
                .driver
                .create(&physical)
                .await
                .map_err(|err| StorageError::io("create", physical.clone(), err))?;
            writer
                .write_all(body)
                .await
                .map_err(|err| StorageError::io("write", physical.clone(), err))?;
            writer
                .shutdown()
                .await
                .map_err(|err| StorageError::io("close", physical.clone(), err))?;
            drop(writer);
            self.move_into_place(&temp).await
        }
        .await;
        if result.is_err() {
            self.remove_stray(&temp).await;
        }
        result
    }

    /// Convenience for small bodies: stage, write and commit.
    pub async fn write_bytes(
        &self,
        path: &VirtualPath,
        body: &[u8],
    ) -> Result<CommitOutcome, StorageError> {
        let mut staged = self.open_for_write(path).await?;
        if let Err(err) = staged.write_all(body).await {
            self.discard(staged).await;
            return Err(err);
        }
        self.commit(staged).await
    }

    /// Deletes a file (with its checksum siblings) or a directory tree.
    ///
    /// With trash enabled the content moves to `.trash`; `force` purges that
    /// copy right away when the repository allows force deletion. Deleting a
    /// missing path is a no-op.
    pub async fn delete(&self, path: &VirtualPath, force: bool) -> Result<(), StorageError> {
        match self.metadata(path).await? {
            None => {
                debug!("nothing to delete at {path}");
                Ok(())
            }
            Some(meta) if meta.is_dir => self.delete_directory(path, force).await,
            Some(_) => self.delete_file(path, force).await,
        }
    }

    async fn delete_file(&self, path: &VirtualPath, force: bool) -> Result<(), StorageError> {
        self.delete_single(path, force).await?;

        for sibling in path.checksum_siblings() {
            match self.metadata(&sibling).await {
                Ok(Some(meta)) if !meta.is_dir => {
                    if let Err(err) = self.delete_single(&sibling, force).await {
                        warn!("failed to delete checksum {sibling}: {err}");
                    }
                }
                Ok(_) => {}
                Err(err) => warn!("failed to inspect checksum {sibling}: {err}"),
            }
        }
        info!("deleted {path} (force: {force})");
        Ok(())
    }

    async fn delete_single(&self, path: &VirtualPath, force: bool) -> Result<(), StorageError> {
        let policy = &path.repository().policy;
        let physical = path.physical();

        if !policy.trash_enabled || path.is_hidden() {
            return self
                .driver
                .remove_file(&physical)
                .await
                .map_err(|err| StorageError::io("remove", physical, err));
        }

        let trash = path.trash_path();
        self.ensure_parent(trash.path()).await?;
        let trashed = trash.path().physical();
        match self.metadata(trash.path()).await? {
            Some(meta) if meta.is_dir => self.remove_tree(trash.path()).await?,
            Some(_) => self
                .driver
                .remove_file(&trashed)
                .await
                .map_err(|err| StorageError::io("remove", trashed.clone(), err))?,
            None => {}
        }
        self.driver
            .rename(&physical, &trashed)
            .await
            .map_err(|err| StorageError::io("rename", physical, err))?;

        if force && policy.force_deletion_allowed {
            self.driver
                .remove_file(&trashed)
                .await
                .map_err(|err| StorageError::io("remove", trashed, err))?;
        }
        Ok(())
    }

    async fn delete_directory(&self, dir: &VirtualPath, force: bool) -> Result<(), StorageError> {
        let (files, dirs) = self.walk(dir).await?;
        for file in &files {
            self.delete_single(file, force).await?;
        }
        for sub in dirs.iter().rev() {
            if sub.is_root() {
                continue;
            }
            let physical = sub.physical();
            self.driver
                .remove_dir(&physical)
                .await
                .map_err(|err| StorageError::io("rmdir", physical, err))?;
        }

        if dir.is_root() {
            self.remove_tree(&dir.temp_root()).await?;
            self.remove_tree(&dir.trash_root()).await?;
            let physical = dir.physical();
            self.driver
                .remove_dir(&physical)
                .await
                .map_err(|err| StorageError::io("rmdir", physical, err))?;
        }
        info!("deleted directory {dir} ({} files, force: {force})", files.len());
        Ok(())
    }

    /// Files and directories below `dir`; directories come parents first,
    /// `dir` included.
    async fn walk(
        &self,
        dir: &VirtualPath,
    ) -> Result<(Vec<VirtualPath>, Vec<VirtualPath>), StorageError> {
        let mut files = Vec::new();
        let mut dirs = Vec::new();
        let mut stack = vec![dir.clone()];
        while let Some(current) = stack.pop() {
            for child in self.list(&current).await? {
                match self.metadata(&child).await? {
                    Some(meta) if meta.is_dir => stack.push(child),
                    Some(_) => files.push(child),
                    None => {}
                }
            }
            dirs.push(current);
        }
        Ok((files, dirs))
    }

    async fn remove_tree(&self, path: &VirtualPath) -> Result<(), StorageError> {
        match self.metadata(path).await? {
            None => Ok(()),
            Some(meta) if !meta.is_dir => {
                let physical = path.physical();
                self.driver
                    .remove_file(&physical)
                    .await
                    .map_err(|err| StorageError::io("remove", physical, err))
            }
            Some(_) => {
                let (files, dirs) = self.walk(path).await?;
                for file in files {
                    let physical = file.physical();
                    self.driver
                        .remove_file(&physical)
                        .await
                        .map_err(|err| StorageError::io("remove", physical, err))?;
                }
                for sub in dirs.iter().rev() {
                    let physical = sub.physical();
                    self.driver
                        .remove_dir(&physical)
                        .await
                        .map_err(|err| StorageError::io("rmdir", physical, err))?;
                }
                Ok(())
            }
        }
    }

    /// Moves soft-deleted content back to its live location, overwriting
    /// whatever is there. A path with nothing in trash is a no-op.
    pub async fn undelete(&self, path: &VirtualPath) -> Result<(), StorageError> {
        let trash = path.trash_path();
        match self.metadata(trash.path()).await? {
            None => {
                debug!("nothing to undelete for {path}");
                return Ok(());
            }
            Some(meta) if meta.is_dir => {
                let (files, dirs) = self.walk(trash.path()).await?;
                for file in &files {
                    self.restore(file).await?;
                }
                for sub in dirs.iter().rev() {
                    if sub == &path.trash_root() {
                        continue;
                    }
                    let physical = sub.physical();
                    self.driver
                        .remove_dir(&physical)
                        .await
                        .map_err(|err| StorageError::io("rmdir", physical, err))?;
                }
            }
            Some(_) => {
                self.restore(trash.path()).await?;
                for sibling in path.checksum_siblings() {
                    let trashed = sibling.trash_path();
                    match self.exists(trashed.path()).await {
                        Ok(true) => {
                            if let Err(err) = self.restore(trashed.path()).await {
                                warn!("failed to undelete checksum {sibling}: {err}");
                            }
                        }
                        Ok(false) => {}
                        Err(err) => warn!("failed to inspect trashed checksum {sibling}: {err}"),
                    }
                }
            }
        }
        info!("undeleted {path}");
        Ok(())
    }

    async fn restore(&self, trashed: &VirtualPath) -> Result<(), StorageError> {
        let target = trashed.live();
        self.ensure_parent(&target).await?;
        let destination = target.physical();
        match self.metadata(&target).await? {
            Some(meta) if meta.is_dir => {
                return Err(StorageError::IsDirectory(target.to_string()));
            }
            Some(_) => self
                .driver
                .remove_file(&destination)
                .await
                .map_err(|err| StorageError::io("remove", destination.clone(), err))?,
            None => {}
        }
        let source = trashed.physical();
        self.driver
            .rename(&source, &destination)
            .await
            .map_err(|err| StorageError::io("rename", source, err))
    }

    /// Permanently removes trashed content for `path` (the whole trash when
    /// `path` is the root) and leaves an empty trash root behind.
    pub async fn purge_trash(&self, path: &VirtualPath) -> Result<(), StorageError> {
        let target = if path.is_root() {
            path.trash_root()
        } else {
            path.trash_path().path().clone()
        };
        self.remove_tree(&target).await?;
        let root = path.trash_root().physical();
        self.driver
            .create_dir_all(&root)
            .await
            .map_err(|err| StorageError::io("mkdir", root, err))?;
        info!("purged trash for {path}");
        Ok(())
    }

    /// Staging files of writes to `path` that have not been committed or
    /// discarded yet.
    pub async fn staged_writes(
        &self,
        path: &VirtualPath,
    ) -> Result<Vec<VirtualPath>, StorageError> {
        let Some(dir) = path.temp_path().path().parent() else {
            return Ok(Vec::new());
        };
        if !self.is_directory(&dir).await? {
            return Ok(Vec::new());
        }
        Ok(self
            .list(&dir)
            .await?
            .into_iter()
            .filter(|entry| entry.file_name().is_some_and(|name| path.is_staging_name(name)))
            .collect())
    }

    /// Drops leftover staged writes, e.g. after a crash.
    pub async fn purge_temp(&self, path: &VirtualPath) -> Result<(), StorageError> {
        if path.is_root() {
            self.remove_tree(&path.temp_root()).await?;
        } else {
            for staged in self.staged_writes(path).await? {
                self.remove_tree(&staged).await?;
            }
            self.remove_tree(path.temp_path().path()).await?;
        }
        let root = path.temp_root().physical();
        self.driver
            .create_dir_all(&root)
            .await
            .map_err(|err| StorageError::io("mkdir", root, err))?;
        info!("purged temp for {path}");
        Ok(())
    }

    /// Recomputes the digests of a stored file and compares them against its
    /// checksum siblings.
    pub async fn verify_checksums(
        &self,
        path: &VirtualPath,
    ) -> Result<BTreeMap<DigestAlgorithm, ChecksumStatus>, StorageError> {
        let algorithms = path.repository().policy.digest_algorithms.clone();
        let mut digests = DigestSet::new(&algorithms);
        let mut reader = self.open_read(path).await?;
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            let n = reader
                .read(&mut buf)
                .await
                .map_err(|err| StorageError::io("read", path.physical(), err))?;
            if n == 0 {
                break;
            }
            digests.update(&buf[..n]);
        }

        let mut report = BTreeMap::new();
        for (algorithm, actual) in digests.finish() {
            let name = path.file_name().unwrap_or_default();
            let sibling = path.resolve_sibling(&format!("{name}.{}", algorithm.extension()))?;
            let status = match self.read_to_end(&sibling).await {
                Ok(body) => {
                    let body = String::from_utf8_lossy(&body);
                    match parse_checksum_file(&body) {
                        Some(expected) if expected == actual => ChecksumStatus::Match,
                        Some(expected) => ChecksumStatus::Mismatch { expected, actual },
                        None => ChecksumStatus::Mismatch {
                            expected: String::new(),
                            actual,
                        },
                    }
                }
                Err(err) if err.is_not_found() => ChecksumStatus::Missing,
                Err(err) => return Err(err),
            };
            report.insert(algorithm, status);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RepositoryPolicy;
    use crate::domain::Repository;
    use crate::lock::InMemoryPathLockManager;
    use crate::storage::checksum::digest_hex;

    fn repository(root: &std::path::Path, policy: RepositoryPolicy) -> Arc<Repository> {
        Arc::new(
            Repository::new("storage0", "releases", root.join("releases")).with_policy(policy),
        )
    }

    #[tokio::test]
    async fn staged_bytes_invisible_until_commit() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = repository(tmp.path(), RepositoryPolicy::default());
        let provider = AtomicStorageProvider::filesystem();
        let jar = VirtualPath::new(repo, "a/b/1.0/b-1.0.jar").unwrap();

        let mut staged = provider.open_for_write(&jar).await.unwrap();
        staged.write_all(b"0123456789").await.unwrap();
        staged.flush().await.unwrap();
        assert!(!provider.exists(&jar).await.unwrap());
        assert!(provider.exists(staged.temp().path()).await.unwrap());

        let outcome = provider.commit(staged).await.unwrap();
        assert_eq!(outcome.bytes, 10);
        assert_eq!(provider.read_to_end(&jar).await.unwrap(), b"0123456789");
        assert!(provider.staged_writes(&jar).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn writes_of_one_path_never_share_a_staging_file() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = repository(tmp.path(), RepositoryPolicy::default());
        let provider = AtomicStorageProvider::filesystem();
        let pom = VirtualPath::new(repo, "a/b/1.0/b-1.0.pom").unwrap();

        let mut first = provider.open_for_write(&pom).await.unwrap();
        let mut second = provider.open_for_write(&pom).await.unwrap();
        assert_ne!(first.temp().path(), second.temp().path());
        first.write_all(b"first").await.unwrap();
        second.write_all(b"second").await.unwrap();
        assert_eq!(provider.staged_writes(&pom).await.unwrap().len(), 2);

        provider.commit(first).await.unwrap();
        second.write_all(b" writer").await.unwrap();
        assert_eq!(provider.read_to_end(&pom).await.unwrap(), b"first");
        provider.commit(second).await.unwrap();
        assert_eq!(provider.read_to_end(&pom).await.unwrap(), b"second writer");
        assert!(provider.staged_writes(&pom).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn checksum_held_by_a_stream_is_left_alone() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = repository(tmp.path(), RepositoryPolicy::default());
        let locks = Arc::new(InMemoryPathLockManager::new());
        let provider = AtomicStorageProvider::filesystem().with_locks(locks.clone());
        let jar = VirtualPath::new(repo, "a/b/1.0/b-1.0.jar").unwrap();
        let sha1 = jar.resolve_sibling("b-1.0.jar.sha1").unwrap();
        let md5 = jar.resolve_sibling("b-1.0.jar.md5").unwrap();

        let held = locks.lock(&sha1.canonical_uri(), LockMode::Write).await.unwrap();
        provider.write_bytes(&jar, b"jar bytes").await.unwrap();
        assert!(!provider.exists(&sha1).await.unwrap());
        assert!(provider.exists(&md5).await.unwrap());
        assert_eq!(locks.active_keys(), 1);

        drop(held);
        provider.write_bytes(&jar, b"jar bytes").await.unwrap();
        assert_eq!(
            provider.read_to_end(&sha1).await.unwrap(),
            digest_hex(DigestAlgorithm::Sha1, b"jar bytes").as_bytes()
        );
        assert_eq!(locks.active_keys(), 0);
    }

    #[tokio::test]
    async fn purge_temp_drops_abandoned_staging_files() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = repository(tmp.path(), RepositoryPolicy::default());
        let provider = AtomicStorageProvider::filesystem();
        let jar = VirtualPath::new(repo, "a/b.jar").unwrap();
        let other = jar.resolve_sibling("c.jar").unwrap();

        for path in [&jar, &jar, &other] {
            let mut staged = provider.open_for_write(path).await.unwrap();
            staged.write_all(b"abandoned").await.unwrap();
            staged.flush().await.unwrap();
        }
        assert_eq!(provider.staged_writes(&jar).await.unwrap().len(), 2);

        provider.purge_temp(&jar).await.unwrap();
        assert!(provider.staged_writes(&jar).await.unwrap().is_empty());
        assert_eq!(provider.staged_writes(&other).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn commit_writes_checksum_siblings() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = repository(tmp.path(), RepositoryPolicy::default());
        let provider = AtomicStorageProvider::filesystem();
        let jar = VirtualPath::new(repo, "a/b/1.0/b-1.0.jar").unwrap();

        let outcome = provider.write_bytes(&jar, b"jar bytes").await.unwrap();
        let sha1 = jar.resolve_sibling("b-1.0.jar.sha1").unwrap();
        let md5 = jar.resolve_sibling("b-1.0.jar.md5").unwrap();
        assert_eq!(
            provider.read_to_end(&sha1).await.unwrap(),
            digest_hex(DigestAlgorithm::Sha1, b"jar bytes").as_bytes()
        );
        assert_eq!(
            outcome.digests[&DigestAlgorithm::Md5],
            digest_hex(DigestAlgorithm::Md5, b"jar bytes")
        );
        assert!(provider.exists(&md5).await.unwrap());

        let report = provider.verify_checksums(&jar).await.unwrap();
        assert!(report.values().all(|s| *s == ChecksumStatus::Match));
    }

    #[tokio::test]
    async fn overwrite_replaces_existing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = repository(tmp.path(), RepositoryPolicy::default());
        let provider = AtomicStorageProvider::filesystem();
        let pom = VirtualPath::new(repo, "a/b/1.0/b-1.0.pom").unwrap();

        provider.write_bytes(&pom, b"first version").await.unwrap();
        provider.write_bytes(&pom, b"v2").await.unwrap();
        assert_eq!(provider.read_to_end(&pom).await.unwrap(), b"v2");
    }

    #[tokio::test]
    async fn discard_leaves_nothing_behind() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = repository(tmp.path(), RepositoryPolicy::default());
        let provider = AtomicStorageProvider::filesystem();
        let jar = VirtualPath::new(repo, "x.jar").unwrap();

        let mut staged = provider.open_for_write(&jar).await.unwrap();
        staged.write_all(b"partial").await.unwrap();
        let temp = staged.temp().path().clone();
        provider.discard(staged).await;
        assert!(!provider.exists(&temp).await.unwrap());
        assert!(!provider.exists(&jar).await.unwrap());
    }

    #[tokio::test]
    async fn commit_onto_directory_fails_and_cleans_temp() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = repository(tmp.path(), RepositoryPolicy::default());
        let provider = AtomicStorageProvider::filesystem();
        let dir = VirtualPath::new(repo, "x/y").unwrap();
        std::fs::create_dir_all(dir.physical()).unwrap();

        let mut staged = provider.open_for_write(&dir).await.unwrap();
        staged.write_all(b"not a dir").await.unwrap();
        let temp = staged.temp().path().clone();
        let err = provider.commit(staged).await.unwrap_err();
        assert!(matches!(err, StorageError::IsDirectory(_)));
        assert!(!provider.exists(&temp).await.unwrap());
    }

    #[tokio::test]
    async fn listing_hides_temp_and_trash() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = repository(tmp.path(), RepositoryPolicy::default());
        let provider = AtomicStorageProvider::filesystem();
        let root = VirtualPath::root(repo);
        let jar = root.resolve("a.jar").unwrap();
        provider.write_bytes(&jar, b"a").await.unwrap();
        provider.delete(&jar, false).await.unwrap();
        provider.write_bytes(&root.resolve("b.pom").unwrap(), b"b").await.unwrap();

        let names: Vec<String> = provider
            .list(&root)
            .await
            .unwrap()
            .iter()
            .map(VirtualPath::relative)
            .collect();
        assert_eq!(names, vec!["b.pom", "b.pom.md5", "b.pom.sha1"]);
    }
}
