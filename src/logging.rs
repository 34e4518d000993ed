use anyhow::Context;
use tracing_appender::{non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{prelude::*, EnvFilter};

use crate::config::{LogRotation, LoggingConfig};

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `logging.level`. The returned guard flushes the file
/// writer on drop and must be held until the process exits.
pub fn init(cfg: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.level))
        .with_context(|| format!("invalid log level {}", cfg.level))?;

    let (file_layer, guard) = match &cfg.dir {
        Some(dir) => {
            let appender = rolling::Builder::new()
                .rotation(rotation(cfg.rotation))
                .filename_prefix(&cfg.file_name)
                .max_log_files(cfg.max_files.max(1))
                .build(dir)
                .with_context(|| format!("unable to open log directory {}", dir.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .try_init()
        .context("global subscriber already set")?;
    Ok(guard)
}

fn rotation(rotation: LogRotation) -> rolling::Rotation {
    match rotation {
        LogRotation::Daily => rolling::Rotation::DAILY,
        LogRotation::Hourly => rolling::Rotation::HOURLY,
        LogRotation::Never => rolling::Rotation::NEVER,
    }
}
