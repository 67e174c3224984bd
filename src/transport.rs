use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;

use crate::{models::BatchPayload, settings::CollectorConfig};

/// Delivers one batch to the ingestion endpoint. `Ok` means the endpoint
/// acknowledged it; anything else keeps the events buffered for a retry.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, batch: &BatchPayload) -> Result<()>;
}

/// JSON-over-HTTP delivery with a bounded request timeout, so a final flush at
/// shutdown cannot hang the host.
pub struct HttpTransport {
    client: Client,
    endpoint: Option<String>,
    auth_token: Option<String>,
    anonymize_ip: bool,
}

impl HttpTransport {
    pub fn new(config: &CollectorConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            auth_token: config.auth_token.clone(),
            anonymize_ip: config.anonymize_ip,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, batch: &BatchPayload) -> Result<()> {
        let endpoint = self
            .endpoint
            .as_deref()
            .ok_or_else(|| anyhow!("no ingestion endpoint configured"))?;

        let mut request = self.client.post(endpoint).json(batch);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }
        if self.anonymize_ip {
            request = request.header("X-Anonymize-Ip", "1");
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("failed to reach ingestion endpoint {endpoint}"))?;

        let status = response.status();
        if !status.is_success() {
            bail!("ingestion endpoint responded with HTTP {status}");
        }

        Ok(())
    }
}
