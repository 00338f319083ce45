// Logging setup
// Console output (pretty or JSON) plus an optional daily-rolling JSON file

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::settings::LogFormat;

pub const DEFAULT_LOG_FILTER: &str = "plugin_runtime=info";
pub const LOG_FILE_PREFIX: &str = "plugin-runtime.log";

/// Install the global tracing subscriber
///
/// `RUST_LOG` overrides the default filter. The returned guard flushes the
/// file writer on drop and must be held until exit.
pub fn init(format: LogFormat, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))
        .context("Failed to create env filter")?;

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log dir {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer);

    match format {
        // Production: JSON structured logging
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        // Development: Pretty formatting with colors
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
    }
    .context("Failed to install tracing subscriber")?;

    Ok(guard)
}
