mod common;

use std::sync::Arc;
use std::time::Duration;

use depot::config::{Config, FetchConfig, RepositoryPolicy};
use depot::lock::{LockMode, PathLockManager};
use depot::service::record::InMemoryRecordStore;
use depot::service::stream::StreamState;
use depot::storage::VirtualPath;
use depot::storage::checksum::{DigestAlgorithm, digest_hex};
use depot::utils::state::DepotState;

#[tokio::test]
async fn records_follow_stream_usage() -> anyhow::Result<()> {
    let depot = common::depot();
    let records = Arc::new(InMemoryRecordStore::new());
    let state = DepotState::with_parts(
        (*depot.state.config).clone(),
        depot.state.locks.clone(),
        records.clone(),
    );
    let jar = VirtualPath::root(state.repository("releases"))
        .resolve("org/lib/1.0/lib-1.0.jar")?;

    let mut writer = state.streams.writer(jar.clone());
    writer.write_all(&common::payload(3000)).await?;
    writer.flush().await?;
    writer.write_all(&common::payload(1000)).await?;
    writer.close().await?;

    for _ in 0..2 {
        let mut reader = state.streams.reader(jar.clone());
        assert_eq!(reader.read_to_end().await?.len(), 4000);
        reader.close().await?;
    }

    let record = records.record(&jar.canonical_uri()).expect("record");
    assert_eq!(record.size, 4000);
    assert_eq!(record.download_count, 2);
    assert!(record.last_used.is_some());
    assert!(record.last_updated.is_some());
    Ok(())
}

#[tokio::test]
async fn concurrent_writers_serialize() -> anyhow::Result<()> {
    let depot = common::depot();
    let jar = VirtualPath::root(depot.state.repository("releases")).resolve("a/b.jar")?;

    let mut tasks = Vec::new();
    for i in 0..8u8 {
        let streams = depot.state.streams.clone();
        let jar = jar.clone();
        tasks.push(tokio::spawn(async move {
            let mut writer = streams.writer(jar);
            for _ in 0..16 {
                writer.write_all(&[i; 512]).await?;
                tokio::task::yield_now().await;
            }
            writer.close().await
        }));
    }
    for task in tasks {
        task.await??;
    }

    let body = depot.state.provider.read_to_end(&jar).await?;
    assert_eq!(body.len(), 16 * 512);
    assert!(body.iter().all(|b| *b == body[0]), "one writer's content, never a mix");
    Ok(())
}

#[tokio::test]
async fn dropped_writer_cleans_up_and_unlocks() -> anyhow::Result<()> {
    let depot = common::depot();
    let jar = VirtualPath::root(depot.state.repository("releases")).resolve("a/b.jar")?;

    {
        let mut writer = depot.state.streams.writer(jar.clone());
        writer.write_all(b"never committed").await?;
        assert_eq!(writer.state(), StreamState::Open);
    }

    let handle = tokio::time::timeout(
        Duration::from_secs(5),
        depot.state.locks.lock(&jar.canonical_uri(), LockMode::Write),
    )
    .await??;
    depot.state.locks.unlock(handle)?;

    assert!(!depot.state.provider.exists(&jar).await?);
    assert!(depot.state.provider.staged_writes(&jar).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn checksum_upload_survives_a_concurrent_artifact_commit() -> anyhow::Result<()> {
    let depot = common::depot();
    let root = VirtualPath::root(depot.state.repository("releases"));
    let jar = root.resolve("org/lib/1.0/lib-1.0.jar")?;
    let sha1 = root.resolve("org/lib/1.0/lib-1.0.jar.sha1")?;
    let md5 = root.resolve("org/lib/1.0/lib-1.0.jar.md5")?;

    let mut upload = depot.state.streams.writer(sha1.clone());
    upload.write_all(b"uploaded-sha1-content").await?;

    let body = common::payload(5000);
    let mut writer = depot.state.streams.writer(jar.clone());
    writer.write_all(&body).await?;
    writer.close().await?;

    assert!(!depot.state.provider.exists(&sha1).await?, "nothing visible before close");
    upload.write_all(b"-tail").await?;
    upload.close().await?;

    let provider = &depot.state.provider;
    assert_eq!(provider.read_to_end(&sha1).await?, b"uploaded-sha1-content-tail");
    assert_eq!(
        String::from_utf8(provider.read_to_end(&md5).await?)?,
        digest_hex(DigestAlgorithm::Md5, &body)
    );
    assert_eq!(provider.read_to_end(&jar).await?, body);
    assert!(provider.staged_writes(&sha1).await?.is_empty());
    assert!(provider.staged_writes(&jar).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn file_locks_guard_streams() -> anyhow::Result<()> {
    common::init_tracing();
    let dir = tempfile::tempdir()?;
    let config = Config {
        root_dir: dir.path().join("data"),
        storage_id: "storage0".to_string(),
        lock_dir: Some(dir.path().join("locks")),
        fetch: FetchConfig::default(),
        policy: RepositoryPolicy::default(),
    };
    let first = DepotState::new(config.clone())?;
    let second = DepotState::new(config)?;
    let jar = VirtualPath::root(first.repository("releases")).resolve("a/b.jar")?;

    let mut writer = first.streams.writer(jar.clone());
    writer.write_all(b"v1").await?;

    let other = VirtualPath::root(second.repository("releases")).resolve("a/b.jar")?;
    let mut reader = second.streams.reader(other.clone());
    let blocked = tokio::time::timeout(Duration::from_millis(100), reader.read_to_end()).await;
    assert!(blocked.is_err(), "reader waits for the writer in the other state");

    writer.close().await?;
    let mut reader = second.streams.reader(other);
    assert_eq!(reader.read_to_end().await?, b"v1");
    reader.close().await?;
    Ok(())
}
