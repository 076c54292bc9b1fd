//! Structured logging initialization from `RuntimeConfig` (§2, §6): pretty
//! or JSON format on stdout, plus an optional daily-rotating file sink.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

use super::config::{LogFormat, LoggingConfig};

/// Non-blocking file appender guard; drop it at the end of `main` to flush.
pub struct LoggingGuard(Option<tracing_appender::non_blocking::WorkerGuard>);

pub fn init_logging(config: &LoggingConfig) -> LoggingGuard {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let stdout_layer = match config.format {
        LogFormat::Pretty => fmt::layer().pretty().boxed(),
        LogFormat::Json => fmt::layer().json().boxed(),
    };

    let (file_layer, guard) = match &config.file_directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "taskforge.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(non_blocking).json()), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    LoggingGuard(guard)
}
