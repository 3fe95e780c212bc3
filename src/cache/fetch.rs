use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::{CACHE_CONTROL, PRAGMA};

pub const IMAGE_FETCH_TIMEOUT: Duration = Duration::from_secs(15);

#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Network fetcher for images and shell resources.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    require_image: bool,
}

impl HttpFetcher {
    /// Fetcher whose payloads must sniff as an image format.
    pub fn images() -> Result<Self> {
        Self::build(IMAGE_FETCH_TIMEOUT, true)
    }

    pub fn resources(timeout: Duration) -> Result<Self> {
        Self::build(timeout, false)
    }

    fn build(timeout: Duration, require_image: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            require_image,
        })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .header(CACHE_CONTROL, "no-cache")
            .header(PRAGMA, "no-cache")
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;

        let status = response.status();
        if !status.is_success() {
            bail!("HTTP {status} for {url}");
        }

        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("failed to read body of {url}"))?
            .to_vec();

        if self.require_image {
            ensure_image_payload(&bytes).with_context(|| format!("rejected payload from {url}"))?;
        }

        Ok(bytes)
    }
}

pub fn ensure_image_payload(bytes: &[u8]) -> Result<image::ImageFormat> {
    if bytes.is_empty() {
        bail!("empty body");
    }
    image::guess_format(bytes).map_err(|err| anyhow!("not an image: {err}"))
}
