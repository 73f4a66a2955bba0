use std::io;
use std::time::Duration;

use futures::TryStreamExt;
use reqwest::header::{ACCEPT_RANGES, RANGE};
use reqwest::{Client, Response, StatusCode};
use tokio_util::io::StreamReader;
use tracing::debug;

use crate::domain::RemoteRepository;
use crate::error::TransportError;
use crate::remote::{RemoteArtifactClient, RemoteProbe, RemoteResponse};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Plain HTTP(S) remote. Resumes through `Range: bytes=<offset>-`.
pub struct HttpRemoteClient {
    id: String,
    base_url: String,
    client: Client,
}

impl HttpRemoteClient {
    pub fn new(remote: &RemoteRepository) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|err| TransportError::Request {
                resource: remote.url.clone(),
                message: err.to_string(),
            })?;
        Ok(Self::with_client(remote, client))
    }

    pub fn with_client(remote: &RemoteRepository, client: Client) -> Self {
        HttpRemoteClient {
            id: remote.id.clone(),
            base_url: remote.url.trim_end_matches('/').to_string(),
            client,
        }
    }

    fn url(&self, resource: &str) -> String {
        format!("{}/{}", self.base_url, resource.trim_start_matches('/'))
    }

    fn request_error(resource: &str, err: reqwest::Error) -> TransportError {
        TransportError::Request {
            resource: resource.to_string(),
            message: err.to_string(),
        }
    }
}

fn accept_ranges(res: &Response) -> Option<String> {
    res.headers()
        .get(ACCEPT_RANGES)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

#[async_trait::async_trait]
impl RemoteArtifactClient for HttpRemoteClient {
    fn remote_id(&self) -> &str {
        &self.id
    }

    async fn get_from(
        &self,
        resource: &str,
        offset: u64,
    ) -> Result<RemoteResponse, TransportError> {
        let url = self.url(resource);
        let mut request = self.client.get(&url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }
        debug!("GET {url} from byte {offset}");
        let res = request
            .send()
            .await
            .map_err(|err| Self::request_error(resource, err))?;

        let status = res.status();
        if status != StatusCode::OK && status != StatusCode::PARTIAL_CONTENT {
            return Err(TransportError::Status {
                resource: resource.to_string(),
                status: status.as_u16(),
            });
        }

        let accept_ranges = accept_ranges(&res);
        let content_length = res.content_length();
        let stream = res.bytes_stream().map_err(io::Error::other);
        Ok(RemoteResponse {
            status: status.as_u16(),
            accept_ranges,
            content_length,
            body: Box::pin(StreamReader::new(stream)),
        })
    }

    async fn head(&self, resource: &str) -> Result<RemoteProbe, TransportError> {
        let url = self.url(resource);
        let res = self
            .client
            .head(&url)
            .send()
            .await
            .map_err(|err| Self::request_error(resource, err))?;
        if !res.status().is_success() {
            return Err(TransportError::Status {
                resource: resource.to_string(),
                status: res.status().as_u16(),
            });
        }
        Ok(RemoteProbe {
            status: res.status().as_u16(),
            accept_ranges: accept_ranges(&res),
            content_length: res.content_length(),
        })
    }
}
