//! Tracing subscriber setup

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `config.level`. Fails if a subscriber is already set.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .with_context(|| format!("Invalid log filter '{}'", config.level))?;

    let json_layer = config
        .json
        .then(|| fmt::layer().json().with_current_span(false));
    let text_layer = (!config.json).then(|| fmt::layer().with_target(false));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::info!(level = %config.level, json = config.json, "📝 Logging initialised");
    Ok(())
}
