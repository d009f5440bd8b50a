use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "collector=info";
const DEBUG_FILTER: &str = "collector=debug";

/// Installs the global subscriber.
///
/// `RUST_LOG` selects the filter (DEBUG=1 is a shortcut for debug output) and
/// `RUST_LOG_FORMAT=json` switches to one JSON object per line.
pub fn init() -> tracing_appender::non_blocking::WorkerGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if std::env::var_os("DEBUG").is_some() {
            EnvFilter::new(DEBUG_FILTER)
        } else {
            EnvFilter::new(DEFAULT_FILTER)
        }
    });

    let (non_blocking_writer, guard) = tracing_appender::non_blocking(std::io::stdout());

    let json = std::env::var("RUST_LOG_FORMAT").is_ok_and(|format| format == "json");
    let layer = if json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(non_blocking_writer)
            .boxed()
    } else {
        fmt::layer()
            .with_line_number(true)
            .with_writer(non_blocking_writer)
            .boxed()
    };

    tracing_subscriber::registry().with(layer).with(filter).init();

    guard
}
