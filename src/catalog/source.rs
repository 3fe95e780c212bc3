use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use super::RawProduct;

const DOCUMENT_TIMEOUT: Duration = Duration::from_secs(15);

#[async_trait]
pub trait ProductSource: Send + Sync {
    /// `version` is the app version the image URLs are built for.
    async fn fetch_products(&self, version: &str) -> Result<Vec<RawProduct>>;
}

/// Product document served over HTTP, cache-busted by app version.
pub struct HttpProductSource {
    client: reqwest::Client,
    url: String,
}

impl HttpProductSource {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DOCUMENT_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    fn versioned_url(&self, version: &str) -> String {
        let version = version.replace('.', "");
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{separator}v={version}", self.url)
    }
}

#[async_trait]
impl ProductSource for HttpProductSource {
    async fn fetch_products(&self, version: &str) -> Result<Vec<RawProduct>> {
        let url = self.versioned_url(version);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;

        let status = response.status();
        if !status.is_success() {
            bail!("HTTP {status} for {url}");
        }

        response
            .json::<Vec<RawProduct>>()
            .await
            .with_context(|| format!("invalid product document at {url}"))
    }
}
