//! Logger initialization
//!
//! A thin layer over `tracing-subscriber`: console output with ANSI
//! detection, pretty or JSON formatting, and an `EnvFilter` built from the
//! configured level string.

use std::io::IsTerminal;

use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::LoggerSettings;

/// Initialize the global logger from configuration.
///
/// Safe to call exactly once per process; later calls fail because the
/// global subscriber is already set.
pub fn init_logger(settings: &LoggerSettings) -> anyhow::Result<()> {
    settings.validate()?;

    let filter = EnvFilter::try_new(&settings.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let is_tty = std::io::stdout().is_terminal();
    let use_ansi = settings.colored && is_tty;

    let registry = tracing_subscriber::registry().with(filter);

    if settings.format == "json" {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_current_span(false),
            )
            .try_init()?;
    } else {
        registry
            .with(
                fmt::layer()
                    .with_ansi(use_ansi)
                    .with_target(true)
                    .with_level(true),
            )
            .try_init()?;
    }

    Ok(())
}
