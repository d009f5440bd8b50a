/// Collector: stores probe results reported by pingers and serves the latest
/// state of every host.
mod cache;
mod config;
mod error;
mod http;
mod logger;
mod store;

use anyhow::{Context, Result, bail};
use cache::Cache;
use clap::Parser;
use config::Config;
use http::AppState;
use std::{path::PathBuf, process::ExitCode, sync::Arc};
use store::{SqliteStore, Store};
use tokio::{
    net::TcpListener,
    signal::unix::{SignalKind, signal},
    sync::oneshot,
    time,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE", env = "COLLECTOR_CONFIG")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

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

    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(
        &conf.database_path,
        conf.log_tail_limit,
    )?);
    store.add_hosts(&conf.hosts).await?;

    let cache = Arc::new(Cache::new(store.clone()));
    cache.warm_up().await.context("Failed to warm up cache")?;

    let app = http::router(AppState { cache, store });
    let listener = TcpListener::bind(conf.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", conf.listen_addr))?;
    tracing::info!("Listening on {}", conf.listen_addr);

    let mut sigint_stream = signal(SignalKind::interrupt()).context("watch SIGINT failed")?;
    let mut sigterm_stream = signal(SignalKind::terminate()).context("watch SIGTERM failed")?;

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = stop_rx.await;
            })
            .await
    });

    tokio::select! {
        joined = &mut server => {
            joined.context("server task failed")?.context("server stopped")?;
            bail!("server stopped unexpectedly");
        }
        _ = sigint_stream.recv() => tracing::info!("SIGINT received, shutdown initiated..."),
        _ = sigterm_stream.recv() => tracing::info!("SIGTERM received, shutdown initiated..."),
    }

    let _ = stop_tx.send(());
    match time::timeout(conf.shutdown_timeout, &mut server).await {
        Ok(joined) => {
            joined.context("server task failed")?.context("server stopped")?;
            tracing::info!("Shutdown complete");
            Ok(())
        }
        Err(_) => {
            server.abort();
            bail!(
                "shutdown did not finish within {}",
                humantime::format_duration(conf.shutdown_timeout)
            )
        }
    }
}
