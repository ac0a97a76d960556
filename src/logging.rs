use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

use crate::config::LogConfig;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides `config.level`. Stdout logging is always on; the
/// rolling file layer is added when `config.to_file` is set, and its guard
/// is returned and must be kept alive until exit.
pub fn init_logging(config: &LogConfig) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let (file_writer, guard) = if config.to_file {
        let appender = match config.rotation.as_str() {
            "hourly" => tracing_appender::rolling::hourly(&config.dir, &config.file),
            "daily" => tracing_appender::rolling::daily(&config.dir, &config.file),
            _ => tracing_appender::rolling::never(&config.dir, &config.file),
        };
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        (Some(non_blocking), Some(guard))
    } else {
        (None, None)
    };

    let stdout_layer = if config.use_json {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer().with_target(false).with_ansi(true).boxed()
    };

    let file_layer = file_writer.map(|writer| {
        if config.use_json {
            fmt::layer()
                .json()
                .with_target(true) // Keep target in JSON for structured queries
                .with_writer(writer)
                .with_ansi(false)
                .boxed()
        } else {
            fmt::layer()
                .with_target(false)
                .with_writer(writer)
                .with_ansi(false)
                .boxed()
        }
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    guard
}
