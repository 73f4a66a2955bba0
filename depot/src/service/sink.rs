//! Destinations for fetched bytes.

use tokio::io::{self, AsyncWrite, AsyncWriteExt};
use tracing::warn;

/// Where a fetch delivers its bytes. `write_all` either hands over the whole
/// buffer or fails.
#[async_trait::async_trait]
pub trait ByteSink: Send {
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    async fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Adapts any [`AsyncWrite`] into a [`ByteSink`].
pub struct WriteSink<W>(pub W);

impl<W> WriteSink<W> {
    pub fn into_inner(self) -> W {
        self.0
    }
}

#[async_trait::async_trait]
impl<W: AsyncWrite + Unpin + Send> ByteSink for WriteSink<W> {
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.0.write_all(buf).await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.0.flush().await
    }
}

/// Feeds local storage and a waiting client at once.
///
/// A failing client is detached and the local copy keeps going; a failing
/// primary fails the write.
pub struct TeeSink<'a> {
    primary: &'a mut dyn ByteSink,
    client: Option<&'a mut dyn ByteSink>,
}

impl<'a> TeeSink<'a> {
    pub fn new(primary: &'a mut dyn ByteSink, client: &'a mut dyn ByteSink) -> Self {
        TeeSink {
            primary,
            client: Some(client),
        }
    }

    pub fn client_attached(&self) -> bool {
        self.client.is_some()
    }
}

#[async_trait::async_trait]
impl ByteSink for TeeSink<'_> {
    async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.primary.write_all(buf).await?;
        if let Some(client) = self.client.as_mut() {
            if let Err(err) = client.write_all(buf).await {
                warn!("client went away during fetch, continuing to cache: {err}");
                self.client = None;
            }
        }
        Ok(())
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.primary.flush().await?;
        if let Some(client) = self.client.as_mut() {
            if let Err(err) = client.flush().await {
                warn!("client flush failed, detaching: {err}");
                self.client = None;
            }
        }
        Ok(())
    }
}
