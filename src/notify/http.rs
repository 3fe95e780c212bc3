use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;

use crate::{catalog::format_price, queue::Deliver};

use super::{ConsultEvent, SheetRow};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(15);

fn client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(WEBHOOK_TIMEOUT)
        .build()
        .context("failed to build HTTP client")
}

async fn post_json<T: Serialize + ?Sized>(
    client: &reqwest::Client,
    url: Option<&str>,
    body: &T,
) -> Result<()> {
    let Some(url) = url else {
        bail!("endpoint not configured");
    };

    let response = client
        .post(url)
        .json(body)
        .send()
        .await
        .with_context(|| format!("request to {url} failed"))?;

    let status = response.status();
    if !status.is_success() {
        bail!("HTTP {status} from {url}");
    }
    Ok(())
}

/// Email relay reached through a JSON webhook.
pub struct EmailWebhook {
    client: reqwest::Client,
    url: Option<String>,
    vendor_name: String,
    to_email: String,
}

impl EmailWebhook {
    pub fn new(url: Option<String>, vendor_name: String, to_email: String) -> Result<Self> {
        Ok(Self {
            client: client()?,
            url,
            vendor_name,
            to_email,
        })
    }
}

#[async_trait]
impl Deliver<ConsultEvent> for EmailWebhook {
    async fn deliver(&self, event: &ConsultEvent) -> Result<()> {
        let body = json!({
            "vendor": self.vendor_name,
            "to_email": self.to_email,
            "product_id": event.product.id,
            "product_name": event.product.name,
            "product_price": format_price(event.product.price_min, event.product.price_max),
            "product_category": event.product.category,
            "contact_type": event.channel.label(),
            "session_id": event.user.session_id,
            "platform": event.user.platform,
            "language": event.user.language,
            "user_agent": event.user.user_agent,
            "timestamp": event.timestamp.to_rfc3339(),
            "device": event.device.as_ref().map(|device| device.summary()),
        });
        post_json(&self.client, self.url.as_deref(), &body).await
    }
}

/// Spreadsheet append endpoint (one row per consult).
pub struct SheetWebhook {
    client: reqwest::Client,
    url: Option<String>,
}

impl SheetWebhook {
    pub fn new(url: Option<String>) -> Result<Self> {
        Ok(Self {
            client: client()?,
            url,
        })
    }
}

#[async_trait]
impl Deliver<SheetRow> for SheetWebhook {
    async fn deliver(&self, row: &SheetRow) -> Result<()> {
        post_json(&self.client, self.url.as_deref(), row).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_endpoint_fails_delivery() {
        let sheet = SheetWebhook::new(None).unwrap();
        let err = post_json(&sheet.client, None, &json!({})).await.unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }
}
