use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "pinger=info";
const DEBUG_FILTER: &str = "pinger=debug";

pub fn init() -> tracing_appender::non_blocking::WorkerGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        // DEBUG=<anything> turns on debug output without spelling out RUST_LOG
        if std::env::var_os("DEBUG").is_some() {
            EnvFilter::new(DEBUG_FILTER)
        } else {
            EnvFilter::new(DEFAULT_FILTER)
        }
    });

    let (non_blocking_writer, guard) = tracing_appender::non_blocking(std::io::stdout());

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_line_number(true)
                .with_writer(non_blocking_writer),
        )
        .with(filter)
        .init();

    // The guard must be held onto to ensure logs are flushed when the application exits.
    guard
}
