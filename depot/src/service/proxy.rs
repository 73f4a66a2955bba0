//! Resumable remote-to-local copy.
//!
//! ```text
//!            success
//! Attempting ────────> Done
//!     │  ▲
//!     │  │ alive, range ok
//!     ▼  │
//! WaitingHeartbeat
//!     │
//!     └──> Failed   (attempts, timeout, range unsupported, dead remote)
//! ```
//!
//! `offset` only ever grows by bytes the sink accepted, so a resumed attempt
//! neither repeats nor skips bytes.

use std::io;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::config::FetchConfig;
use crate::error::{FetchError, StorageError, TransportError};
use crate::remote::{RemoteArtifactClient, RemoteHeartbeat, RemoteResponse};
use crate::service::sink::ByteSink;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchPhase {
    Attempting,
    WaitingHeartbeat,
    Done,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RangeSupport {
    Unknown,
    Supported,
    Unsupported,
}

impl RangeSupport {
    fn from_header(response: &RemoteResponse) -> RangeSupport {
        match response.accept_ranges {
            None => RangeSupport::Unknown,
            Some(_) if response.supports_ranges() => RangeSupport::Supported,
            Some(_) => RangeSupport::Unsupported,
        }
    }
}

/// Progress of one `fetch` invocation.
#[derive(Debug)]
pub struct RetryState {
    pub attempts: u32,
    pub offset: u64,
    pub range_support: RangeSupport,
    pub phase: FetchPhase,
    started: Instant,
}

impl RetryState {
    fn new() -> Self {
        RetryState {
            attempts: 1,
            offset: 0,
            range_support: RangeSupport::Unknown,
            phase: FetchPhase::Attempting,
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.started.elapsed()
    }
}

enum AttemptError {
    /// Remote side failed; retried under the policy.
    Transport(TransportError),
    /// The sink refused bytes; local storage is broken, nothing to retry.
    Sink(io::Error),
    Terminal(FetchError),
}

/// Copies one remote resource into a [`ByteSink`] with retries, range
/// resumption and heartbeat-aware waiting.
pub struct ProxyFetchEngine {
    client: Arc<dyn RemoteArtifactClient>,
    heartbeat: Arc<dyn RemoteHeartbeat>,
    config: FetchConfig,
}

impl ProxyFetchEngine {
    pub fn new(
        client: Arc<dyn RemoteArtifactClient>,
        heartbeat: Arc<dyn RemoteHeartbeat>,
        config: FetchConfig,
    ) -> Self {
        ProxyFetchEngine {
            client,
            heartbeat,
            config,
        }
    }

    pub fn remote_id(&self) -> &str {
        self.client.remote_id()
    }

    /// Fetches `resource` from the start. Returns the number of bytes
    /// delivered to `sink`.
    pub async fn fetch(&self, resource: &str, sink: &mut dyn ByteSink) -> Result<u64, FetchError> {
        self.run(resource, None, sink).await
    }

    /// Continues from a response the caller already opened. That response
    /// is the first attempt.
    pub async fn copy_with_retry(
        &self,
        resource: &str,
        initial: RemoteResponse,
        sink: &mut dyn ByteSink,
    ) -> Result<u64, FetchError> {
        self.run(resource, Some(initial), sink).await
    }

    async fn run(
        &self,
        resource: &str,
        mut pending: Option<RemoteResponse>,
        sink: &mut dyn ByteSink,
    ) -> Result<u64, FetchError> {
        let mut state = RetryState::new();
        info!("fetching {resource} from remote {}", self.remote_id());

        loop {
            let outcome = match pending.take() {
                Some(response) => self.copy(&mut state, resource, response, sink).await,
                None => match self.open(&mut state, resource).await {
                    Ok(response) => self.copy(&mut state, resource, response, sink).await,
                    Err(err) => Err(err),
                },
            };

            match outcome {
                Ok(()) => {
                    state.phase = FetchPhase::Done;
                    info!(
                        "fetched {resource} ({} bytes, {} attempts)",
                        state.offset, state.attempts
                    );
                    return Ok(state.offset);
                }
                Err(AttemptError::Terminal(err)) => {
                    state.phase = FetchPhase::Failed;
                    warn!("fetch of {resource} failed: {err}");
                    return Err(err);
                }
                Err(AttemptError::Sink(err)) => {
                    state.phase = FetchPhase::Failed;
                    warn!("fetch of {resource} failed locally after {} bytes: {err}", state.offset);
                    return Err(FetchError::storage(
                        resource,
                        StorageError::io("write", resource, err),
                    ));
                }
                Err(AttemptError::Transport(err)) => {
                    warn!(
                        "attempt {} for {resource} failed at byte {}: {err}",
                        state.attempts, state.offset
                    );
                    if let Err(terminal) = self.wait_for_retry(&mut state, resource, err).await {
                        state.phase = FetchPhase::Failed;
                        warn!("fetch of {resource} failed: {terminal}");
                        return Err(terminal);
                    }
                    state.attempts += 1;
                }
            }
        }
    }

    async fn open(
        &self,
        state: &mut RetryState,
        resource: &str,
    ) -> Result<RemoteResponse, AttemptError> {
        if state.offset == 0 {
            return self
                .client
                .get(resource)
                .await
                .map_err(|err| self.classify(resource, err));
        }

        if state.range_support == RangeSupport::Unknown {
            let probe = self
                .client
                .head(resource)
                .await
                .map_err(|err| self.classify(resource, err))?;
            state.range_support = if probe.supports_ranges() {
                RangeSupport::Supported
            } else {
                RangeSupport::Unsupported
            };
            debug!("remote range support for {resource}: {:?}", state.range_support);
        }
        if state.range_support == RangeSupport::Unsupported {
            return Err(self.range_unsupported(state, resource, None));
        }

        let response = self
            .client
            .get_from(resource, state.offset)
            .await
            .map_err(|err| self.classify(resource, err))?;
        if !response.is_partial() {
            // the remote ignored the range and restarted from zero
            state.range_support = RangeSupport::Unsupported;
            return Err(self.range_unsupported(state, resource, Some(response.status)));
        }
        Ok(response)
    }

    fn classify(&self, resource: &str, err: TransportError) -> AttemptError {
        if err.status() == Some(404) {
            return AttemptError::Terminal(FetchError::NotFound {
                path: resource.to_string(),
                remote: self.remote_id().to_string(),
            });
        }
        AttemptError::Transport(err)
    }

    fn range_unsupported(
        &self,
        state: &RetryState,
        resource: &str,
        status: Option<u16>,
    ) -> AttemptError {
        let source = match status {
            Some(status) => TransportError::Status {
                resource: resource.to_string(),
                status,
            },
            None => TransportError::Request {
                resource: resource.to_string(),
                message: "remote does not accept byte ranges".to_string(),
            },
        };
        AttemptError::Terminal(FetchError::RangeUnsupported {
            path: resource.to_string(),
            offset: state.offset,
            source,
        })
    }

    async fn copy(
        &self,
        state: &mut RetryState,
        resource: &str,
        mut response: RemoteResponse,
        sink: &mut dyn ByteSink,
    ) -> Result<(), AttemptError> {
        if state.range_support == RangeSupport::Unknown {
            state.range_support = RangeSupport::from_header(&response);
        }

        let mut buf = vec![0u8; self.config.buffer_size.max(1)];
        let mut copied = 0u64;
        let result = loop {
            match response.body.read(&mut buf).await {
                Ok(0) => match response.content_length {
                    Some(expected) if copied < expected => {
                        break Err(AttemptError::Transport(TransportError::Io {
                            resource: resource.to_string(),
                            source: io::Error::new(
                                io::ErrorKind::UnexpectedEof,
                                format!("body ended after {copied} of {expected} bytes"),
                            ),
                        }));
                    }
                    _ => break Ok(()),
                },
                Ok(n) => {
                    if let Err(err) = sink.write_all(&buf[..n]).await {
                        break Err(AttemptError::Sink(err));
                    }
                    copied += n as u64;
                    state.offset += n as u64;
                }
                Err(err) => {
                    break Err(AttemptError::Transport(TransportError::Io {
                        resource: resource.to_string(),
                        source: err,
                    }));
                }
            }
        };

        match result {
            Err(AttemptError::Sink(err)) => Err(AttemptError::Sink(err)),
            other => {
                sink.flush().await.map_err(AttemptError::Sink)?;
                other
            }
        }
    }

    async fn wait_for_retry(
        &self,
        state: &mut RetryState,
        resource: &str,
        err: TransportError,
    ) -> Result<(), FetchError> {
        if state.attempts >= self.config.max_attempts {
            return Err(FetchError::AttemptsExhausted {
                path: resource.to_string(),
                attempts: state.attempts,
                source: err,
            });
        }
        if state.elapsed() > self.config.timeout() {
            return Err(FetchError::TimedOut {
                path: resource.to_string(),
                elapsed: state.elapsed(),
                source: err,
            });
        }

        state.phase = FetchPhase::WaitingHeartbeat;
        loop {
            sleep(self.config.min_attempts_interval()).await;
            if self.heartbeat.is_alive(self.remote_id()).await {
                break;
            }
            warn!(
                "remote {} is down, holding {resource} at byte {}",
                self.remote_id(),
                state.offset
            );
            if state.elapsed() > self.config.timeout() {
                return Err(FetchError::RemoteUnavailable {
                    path: resource.to_string(),
                    remote: self.remote_id().to_string(),
                    source: err,
                });
            }
        }
        state.phase = FetchPhase::Attempting;
        Ok(())
    }
}
