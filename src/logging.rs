use std::fs;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initializes logging with console output and a JSON file rotated daily
/// under `directory`. `RUST_LOG` overrides the default `argo_ingest=info`.
pub fn init_logging(directory: &str) {
    // Ensure logs directory exists
    let _ = fs::create_dir_all(directory);

    let file_appender = tracing_appender::rolling::daily(directory, "argo-ingest.log");
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer().json().with_writer(non_blocking_writer);
    let console_layer = fmt::layer().with_writer(std::io::stdout);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("argo_ingest=info"));

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init();

    if installed.is_ok() {
        // Keep the writer alive for the whole process so logs are flushed
        std::mem::forget(guard);
    }
}
