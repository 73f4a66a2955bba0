mod common;

use std::sync::Arc;
use std::time::Duration;

use common::FakeRemote;
use depot::config::{FetchConfig, RepositoryPolicy};
use depot::domain::RemoteRepository;
use depot::error::{FetchError, TerminalReason};
use depot::remote::RemoteHeartbeat;
use depot::service::sink::WriteSink;
use depot::storage::VirtualPath;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn central() -> RemoteRepository {
    RemoteRepository::new("central", "https://repo.example.org/maven2")
}

fn fetch_config() -> FetchConfig {
    FetchConfig {
        max_attempts: 5,
        timeout_seconds: 60,
        min_attempts_interval_seconds: 5,
        ..FetchConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn interrupted_fetch_resumes_into_an_identical_file() -> anyhow::Result<()> {
    let depot = common::depot_with(fetch_config(), RepositoryPolicy::default());
    let data = common::payload(10_000);
    let remote = Arc::new(FakeRemote::new("central", data.clone()).failing(vec![Some(4000)]));
    depot.state.service.register_remote(remote.clone());

    let repo = depot.state.proxy_repository("maven-central", central());
    let jar = VirtualPath::root(repo).resolve("a/b/1.0/b-1.0.jar")?;

    let mut reader = depot.state.service.resolve(&jar).await?;
    assert_eq!(reader.read_to_end().await?, data);
    reader.close().await?;

    assert_eq!(remote.offsets(), vec![0, 4000]);
    let report = depot.state.provider.verify_checksums(&jar).await?;
    assert_eq!(report.len(), 2);
    assert!(depot.state.provider.staged_writes(&jar).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn concurrent_misses_fetch_once() -> anyhow::Result<()> {
    let depot = common::depot();
    let data = common::payload(64 * 1024);
    let remote = Arc::new(
        FakeRemote::new("central", data.clone()).with_delay(Duration::from_millis(50)),
    );
    depot.state.service.register_remote(remote.clone());

    let repo = depot.state.proxy_repository("maven-central", central());
    let jar = VirtualPath::root(repo).resolve("org/lib/2.0/lib-2.0.jar")?;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let service = depot.state.service.clone();
        let jar = jar.clone();
        tasks.push(tokio::spawn(async move {
            let mut reader = service.resolve(&jar).await?;
            let body = reader.read_to_end().await.map_err(|err| FetchError::Storage {
                path: jar.relative(),
                source: err,
            })?;
            Ok::<_, FetchError>(body)
        }));
    }
    for task in tasks {
        assert_eq!(task.await??, data);
    }

    assert_eq!(remote.gets(), 1);
    Ok(())
}

#[tokio::test]
async fn fetch_to_feeds_client_and_cache() -> anyhow::Result<()> {
    let depot = common::depot();
    let data = common::payload(20_000);
    let remote = Arc::new(FakeRemote::new("central", data.clone()));
    depot.state.service.register_remote(remote.clone());

    let repo = depot.state.proxy_repository("maven-central", central());
    let pom = VirtualPath::root(repo).resolve("org/lib/2.0/lib-2.0.pom")?;

    let mut client = WriteSink(Vec::new());
    assert_eq!(depot.state.service.fetch_to(&pom, &mut client).await?, 20_000);
    assert_eq!(client.into_inner(), data);
    assert_eq!(depot.state.provider.read_to_end(&pom).await?, data);

    let mut again = WriteSink(Vec::new());
    assert_eq!(depot.state.service.fetch_to(&pom, &mut again).await?, 20_000);
    assert_eq!(again.into_inner(), data);
    assert_eq!(remote.gets(), 1, "second request is served locally");
    Ok(())
}

#[tokio::test]
async fn remote_miss_is_not_found_and_leaves_nothing() -> anyhow::Result<()> {
    let depot = common::depot();
    let remote = Arc::new(FakeRemote::new("central", Vec::new()).missing());
    depot.state.service.register_remote(remote.clone());

    let repo = depot.state.proxy_repository("maven-central", central());
    let jar = VirtualPath::root(repo).resolve("org/none/1.0/none-1.0.jar")?;

    let err = depot.state.service.resolve(&jar).await.err().expect("fetch fails");
    assert_eq!(err.reason(), TerminalReason::NotFound);
    assert_eq!(err.path(), "org/none/1.0/none-1.0.jar");
    assert_eq!(remote.gets(), 1);
    assert!(!depot.state.provider.exists(&jar).await?);
    assert!(depot.state.provider.staged_writes(&jar).await?.is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn exhausted_fetch_leaves_no_partial_artifact() -> anyhow::Result<()> {
    let config = FetchConfig {
        max_attempts: 3,
        ..fetch_config()
    };
    let depot = common::depot_with(config, RepositoryPolicy::default());
    let remote = Arc::new(
        FakeRemote::new("central", common::payload(10_000))
            .failing(vec![Some(100), Some(100), Some(100)]),
    );
    depot.state.service.register_remote(remote.clone());

    let repo = depot.state.proxy_repository("maven-central", central());
    let jar = VirtualPath::root(repo).resolve("a/b/1.0/b-1.0.jar")?;

    let err = depot.state.service.resolve(&jar).await.err().expect("fetch fails");
    assert!(matches!(err, FetchError::AttemptsExhausted { attempts: 3, .. }));
    assert_eq!(remote.offsets(), vec![0, 100, 200]);
    assert!(!depot.state.provider.exists(&jar).await?);
    assert!(depot.state.provider.staged_writes(&jar).await?.is_empty());
    assert!(!depot.state.heartbeat.is_alive("central").await);
    Ok(())
}

#[tokio::test]
async fn hosted_repository_is_not_proxied() -> anyhow::Result<()> {
    let depot = common::depot();
    let jar = VirtualPath::root(depot.state.repository("releases")).resolve("a/b.jar")?;
    let err = depot.state.service.resolve(&jar).await.err().expect("nothing to fetch from");
    assert_eq!(err.reason(), TerminalReason::NotProxied);

    depot.state.provider.write_bytes(&jar, b"hosted").await?;
    let mut reader = depot.state.service.resolve(&jar).await?;
    assert_eq!(reader.read_to_end().await?, b"hosted");
    reader.close().await?;
    Ok(())
}

#[tokio::test]
async fn http_remote_end_to_end() -> anyhow::Result<()> {
    let depot = common::depot();
    let server = MockServer::start().await;
    let data = common::payload(30_000);
    Mock::given(method("GET"))
        .and(path("/maven2/org/lib/1.0/lib-1.0.jar"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("accept-ranges", "bytes")
                .set_body_bytes(data.clone()),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(header("range", "bytes=0-"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let remote = RemoteRepository::new("mock-central", format!("{}/maven2", server.uri()));
    let repo = depot.state.proxy_repository("maven-central", remote);
    let jar = VirtualPath::root(repo).resolve("org/lib/1.0/lib-1.0.jar")?;

    let mut reader = depot.state.service.resolve(&jar).await?;
    assert_eq!(reader.read_to_end().await?, data);
    reader.close().await?;
    assert!(depot.state.heartbeat.is_alive("mock-central").await);
    Ok(())
}
