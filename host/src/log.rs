//! Tracing bootstrap driven by the `log` config section.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

/// Install the global subscriber. Returns a guard that must stay alive for
/// the life of the process when logging to a file.
pub fn init_tracing(config: &LogConfig) -> Option<WorkerGuard> {
    // RUST_LOG wins over the config level when set.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match config.output.as_str() {
        "stdout" | "" => {
            if config.format == "json" {
                builder.json().init();
            } else {
                builder.init();
            }
            None
        }
        path => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .unwrap_or_else(|err| panic!("failed to open log file {path}: {err}"));
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            let builder = builder.with_writer(non_blocking).with_ansi(false);
            if config.format == "json" {
                builder.json().init();
            } else {
                builder.init();
            }
            Some(guard)
        }
    }
}
