//! Tracing initialization from the `[logging]` config section.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when set. Safe to call once per
/// process; a second call returns an error from the subscriber registry.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(config.console);

    let log_file = match &config.log_file {
        Some(path) => Some(Arc::new(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(Error::Io)?,
        )),
        None => None,
    };

    let result = match (log_file, config.json_format) {
        (Some(file), true) => builder.json().with_writer(file).try_init(),
        (Some(file), false) => builder.with_writer(file).try_init(),
        (None, true) => builder.json().try_init(),
        (None, false) => builder.try_init(),
    };

    result.map_err(|e| Error::Config(format!("initializing tracing: {e}")))
}
