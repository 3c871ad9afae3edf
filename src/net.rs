//! HTTP access: connectivity probes and file downloads.

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{ProvisionError, Result};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Whether `url` answers at all (any HTTP status counts)
    async fn reachable(&self, url: &str) -> bool;

    /// GET `url` and return the body as text
    async fn fetch_text(&self, url: &str) -> Result<String>;

    /// GET `url` into `dest`, replacing it atomically. Returns bytes written.
    async fn download(&self, url: &str, dest: &Path) -> Result<u64>;
}

/// [`Fetcher`] backed by `reqwest`
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("nvprep/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn reachable(&self, url: &str) -> bool {
        match self.client.head(url).send().await {
            Ok(response) => {
                debug!("{} answered {}", url, response.status());
                true
            }
            Err(e) => {
                debug!("{} unreachable: {}", url, e);
                false
            }
        }
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        let body = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(body)
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        info!("⬇️  Downloading {}", url);
        let response = self.client.get(url).send().await?.error_for_status()?;
        let written = stream_to_file(response.bytes_stream(), dest).await?;
        debug!("  wrote {} bytes to {}", written, dest.display());
        Ok(written)
    }
}

/// Write `stream` to `<dest>.partial` and rename it over `dest` once complete.
/// The partial file is removed if anything fails on the way.
pub async fn stream_to_file<S, B, E>(stream: S, dest: &Path) -> Result<u64>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    ProvisionError: From<E>,
{
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let partial = dest.with_extension("partial");

    let result = async {
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut written = 0u64;
        let mut stream = std::pin::pin!(stream);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(chunk.as_ref()).await?;
            written += chunk.as_ref().len() as u64;
        }
        file.flush().await?;
        drop(file);
        tokio::fs::rename(&partial, dest).await?;
        Ok::<_, ProvisionError>(written)
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(&partial).await;
    }
    result
}
