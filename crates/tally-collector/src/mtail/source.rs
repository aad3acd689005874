use super::exposition;
use crate::error::{CollectorError, Result};
use crate::normalize::MetricFamily;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Pull source exposing a snapshot of a metric registry.
#[async_trait]
pub trait RegistrySource: Send + Sync {
    /// Returns every metric family currently in the registry, in registry
    /// order.
    async fn snapshot(&self) -> Result<Vec<MetricFamily>>;
}

/// Registry snapshot read from the engine's HTTP exposition endpoint.
pub struct HttpRegistrySource {
    client: Client,
    url: String,
}

impl HttpRegistrySource {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RegistrySource for HttpRegistrySource {
    async fn snapshot(&self) -> Result<Vec<MetricFamily>> {
        let response = self
            .client
            .get(&self.url)
            .header("Accept", "text/plain; version=0.0.4")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(CollectorError::Api {
                status: status.as_u16(),
                body,
            });
        }

        exposition::parse(&body)
    }
}
