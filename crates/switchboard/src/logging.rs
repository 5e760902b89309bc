//! Logging setup.
//!
//! In the foreground the subscriber writes human-readable (or JSON) lines to
//! stdout. The background child has no terminal, so its events go to the
//! configured log file instead, or nowhere when none is configured.

use crate::config::LoggingSettings;
use anyhow::{anyhow, Context};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Where log output goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    /// Attached to a terminal
    Foreground,
    /// Running as the detached background child
    Background,
}

/// Builds the level filter; `RUST_LOG` wins over the configured level.
pub fn build_filter(config: &LoggingSettings) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Initializes the global subscriber.
pub fn setup_logging(config: &LoggingSettings, target: LogTarget) -> anyhow::Result<()> {
    let filter = build_filter(config);
    let registry = tracing_subscriber::registry().with(filter);

    let result = match target {
        LogTarget::Foreground if config.json_format => registry
            .with(fmt::layer().json().with_file(false).with_line_number(false))
            .try_init(),
        LogTarget::Foreground => registry
            .with(fmt::layer().with_ansi(true).with_target(false))
            .try_init(),
        LogTarget::Background => {
            let Some(path) = &config.file_path else {
                return Ok(());
            };
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {path}"))?;

            if config.json_format {
                registry
                    .with(fmt::layer().json().with_writer(file).with_ansi(false))
                    .try_init()
            } else {
                registry
                    .with(fmt::layer().with_writer(file).with_ansi(false))
                    .try_init()
            }
        }
    };
    result.map_err(|e| anyhow!("failed to initialize logging: {e}"))?;

    info!("Logging initialized with level: {}", config.level);
    Ok(())
}
