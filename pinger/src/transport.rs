use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use model::{PingResultsRef, ProbeResult};
use std::time::Duration;

pub const PING_RESULTS_PATH: &str = "/ping-results";

/// Delivers one batch of probe results to the collector.
///
/// A call either reports success or an error; the caller decides what to do
/// with a failed batch. Implementations must not retry on their own.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn deliver(&self, batch: &[ProbeResult]) -> Result<()>;

    /// Returns the name of this transport for logging purposes.
    fn name(&self) -> &'static str;
}

/// Transport that POSTs batches as JSON to the collector.
///
/// Any 2xx status is a success; every other status, a timeout or a
/// connection error is a failure.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    /// Creates a new HttpTransport.
    ///
    /// # Arguments
    /// * `collector_url` - Base URL of the collector
    /// * `timeout` - Deadline of a single delivery request
    pub fn new(collector_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::ClientBuilder::new()
            .timeout(timeout)
            .build()
            .context("Failed to build reqwest client")?;

        Ok(Self {
            client,
            url: format!(
                "{}{}",
                collector_url.trim_end_matches('/'),
                PING_RESULTS_PATH
            ),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn deliver(&self, batch: &[ProbeResult]) -> Result<()> {
        let body = PingResultsRef {
            ping_results: batch,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to send batch to {}", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("collector returned {}: {}", status, text.trim());
        }

        tracing::debug!("Delivered batch of {} results ({})", batch.len(), status);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
