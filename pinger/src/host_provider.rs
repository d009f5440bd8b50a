use anyhow::{Context, Result, bail};
use model::{Host, HostsBody};
use std::time::Duration;
use tokio::time::{self, Instant};

const READY_PATH: &str = "/ping";
const HOSTS_PATH: &str = "/hosts";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Source of the monitored host set: the collector owns host identities.
pub struct HostProvider {
    client: reqwest::Client,
    base_url: String,
    initial_backoff: Duration,
}

impl HostProvider {
    pub fn new(collector_url: &str) -> Result<Self> {
        let client = reqwest::ClientBuilder::new()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build reqwest client")?;

        Ok(Self {
            client,
            base_url: collector_url.trim_end_matches('/').to_string(),
            initial_backoff: INITIAL_BACKOFF,
        })
    }

    /// Polls the collector's liveness endpoint until it answers, doubling the
    /// pause between attempts. Fails with the last error once `wait_timeout`
    /// is spent.
    pub async fn wait_ready(&self, wait_timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + wait_timeout;
        let mut backoff = self.initial_backoff;

        loop {
            let err = match self.ping().await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            let now = Instant::now();
            if now >= deadline {
                return Err(err.context(format!(
                    "collector not ready after {}",
                    humantime::format_duration(wait_timeout)
                )));
            }

            tracing::info!("Collector not ready ({:#}), retrying in {:?}", err, backoff);
            time::sleep(backoff.min(deadline - now)).await;
            backoff *= 2;
        }
    }

    /// Fetches the full host set.
    pub async fn fetch_hosts(&self) -> Result<Vec<Host>> {
        let url = format!("{}{}", self.base_url, HOSTS_PATH);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch hosts from {}", url))?;

        let status = response.status();
        if !status.is_success() {
            bail!("collector returned {} for {}", status, url);
        }

        let body: HostsBody = response
            .json()
            .await
            .context("Failed to decode host list")?;
        tracing::debug!("Fetched {} hosts", body.hosts.len());
        Ok(body.hosts)
    }

    async fn ping(&self) -> Result<()> {
        let url = format!("{}{}", self.base_url, READY_PATH);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            bail!("liveness probe returned {}", response.status());
        }
        Ok(())
    }
}
