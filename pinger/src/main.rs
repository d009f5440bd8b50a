/// Pinger: probes every host known to the collector and ships the results in
/// batches.
///
/// One prober task per host feeds a single aggregation loop, which delivers
/// size/time-bounded batches to the collector over HTTP.
mod aggregator;
mod config;
mod host_provider;
mod logger;
mod monitor;
mod prober;
mod transport;

use anyhow::{Context, Result};
use clap::Parser;
use config::Config;
use monitor::Monitor;
use prober::SystemPing;
use std::{path::PathBuf, process::ExitCode, sync::Arc};
use transport::HttpTransport;

/// Define command line arguments using clap
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE", env = "PINGER_CONFIG")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // held until main returns so buffered log lines are flushed
    let _logger = logger::init();

    let cli = Cli::parse();
    tracing::debug!("Config path: {:?}", cli.config);

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let conf = Config::new(&cli.config).context("Failed to load configuration")?;
    let transport = HttpTransport::new(&conf.collector_url, conf.batch.deliver_timeout)?;

    Monitor::new(conf, Arc::new(SystemPing), Arc::new(transport))
        .start()
        .await
}
