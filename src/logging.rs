use std::fs;
use std::path::Path;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initializes logging: JSON lines to a daily rolling file under `log_dir`
/// (when given) plus human-readable output on stderr.
///
/// Filtering follows `RUST_LOG`, defaulting to `cleanflow=info`.
pub fn init_logging(log_dir: Option<&Path>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cleanflow=info"));

    // stdout is reserved for command results
    let console_layer = fmt::layer().with_writer(std::io::stderr);

    let file_layer = log_dir.and_then(|dir| {
        fs::create_dir_all(dir).ok()?;
        let file_appender = tracing_appender::rolling::daily(dir, "cleanflow.log");
        let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);
        // Keep the worker alive for the life of the process so logs flush on exit
        std::mem::forget(guard);
        Some(fmt::layer().json().with_writer(non_blocking_writer))
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();
}
