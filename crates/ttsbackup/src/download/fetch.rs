//! HTTP fetch seam for the download engine
//!
//! The engine talks to origins through the [`AssetFetcher`] trait so tests
//! can count fetches with a mock; [`HttpFetcher`] is the production
//! implementation on top of reqwest with a streamed body.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("download cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, DownloadError>;

/// Transport configuration for asset fetches.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub timeout: Duration,
    pub user_agent: String,
    pub max_retries: usize,
    /// Initial delay between retries (doubles each retry).
    pub retry_delay: Duration,
    /// Cap for the exponential backoff.
    pub max_retry_delay: Duration,
}

impl DownloadConfig {
    /// Delay before the given retry attempt (1-based).
    pub fn retry_delay_for(&self, attempt: usize) -> Duration {
        let base = self.retry_delay.as_millis() as u64;
        let delay = base.saturating_mul(1 << (attempt.saturating_sub(1)).min(5));
        Duration::from_millis(delay.min(self.max_retry_delay.as_millis() as u64))
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            user_agent: "ttsbackup/0.1.0".to_string(),
            max_retries: 2,
            retry_delay: Duration::from_millis(500),
            max_retry_delay: Duration::from_secs(30),
        }
    }
}

/// Fetches one URL to bytes. Implementations must be safe to call
/// concurrently; the engine bounds the in-flight count.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// reqwest-backed fetcher used for real exports.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        debug!(%url, "fetching asset");
        let response = self.client.get(url).send().await?;
        response.error_for_status_ref()?;

        let mut stream = response.bytes_stream();
        let mut payload = Vec::new();
        while let Some(chunk) = stream.next().await {
            payload.extend_from_slice(&chunk?);
        }
        debug!(%url, bytes = payload.len(), "fetch complete");
        Ok(payload)
    }
}
