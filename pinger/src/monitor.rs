use crate::{
    aggregator::BatchAggregator,
    config::Config,
    host_provider::HostProvider,
    prober::{Probe, ProberPool},
    transport::Transport,
};
use anyhow::{Context, Result};
use model::Host;
use std::sync::Arc;
use tokio::{
    signal::unix::{SignalKind, signal},
    time,
};

/// Wires hosts, probers, the aggregator and the transport together and owns
/// the process lifecycle.
pub struct Monitor {
    conf: Config,
    probe: Arc<dyn Probe>,
    transport: Arc<dyn Transport>,
}

impl Monitor {
    pub fn new(conf: Config, probe: Arc<dyn Probe>, transport: Arc<dyn Transport>) -> Self {
        Self {
            conf,
            probe,
            transport,
        }
    }

    /// Runs until SIGINT or SIGTERM, then drains.
    ///
    /// Returns an error if the collector never became reachable or the drain
    /// overran the shutdown deadline.
    pub async fn start(&self) -> Result<()> {
        let provider = HostProvider::new(&self.conf.collector_url)?;

        tracing::info!(
            "Waiting for collector at {} (timeout {:?})",
            self.conf.collector_url,
            self.conf.startup.wait_timeout
        );
        provider.wait_ready(self.conf.startup.wait_timeout).await?;
        let hosts = provider.fetch_hosts().await?;
        tracing::info!("Monitoring {} hosts", hosts.len());

        let mut sigint_stream = signal(SignalKind::interrupt()).context("watch SIGINT failed")?;
        let mut sigterm_stream =
            signal(SignalKind::terminate()).context("watch SIGTERM failed")?;
        let shutdown = async move {
            tokio::select! {
                _ = sigint_stream.recv() => tracing::info!("SIGINT received, shutdown initiated..."),
                _ = sigterm_stream.recv() => tracing::info!("SIGTERM received, shutdown initiated..."),
            }
        };

        self.run(hosts, shutdown).await?;
        tracing::info!("Shutdown complete");
        Ok(())
    }

    /// Probes `hosts` until `shutdown` resolves, then stops the probers,
    /// flushes the aggregator and returns. The drain is bounded by the
    /// configured shutdown timeout.
    pub async fn run(&self, hosts: Vec<Host>, shutdown: impl Future<Output = ()>) -> Result<()> {
        let aggregator = BatchAggregator::new(&self.conf.batch, self.transport.clone());
        let pool = ProberPool::start(
            hosts,
            self.conf.ping_interval,
            self.conf.ping_timeout,
            self.probe.clone(),
            aggregator.sender(),
        );

        shutdown.await;

        let drain = async {
            pool.shutdown().await;
            aggregator.close().await;
        };

        time::timeout(self.conf.startup.shutdown_timeout, drain)
            .await
            .with_context(|| {
                format!(
                    "shutdown did not finish within {:?}",
                    self.conf.startup.shutdown_timeout
                )
            })
    }
}
