//! Tracing setup for the stagehand binary.

use anyhow::{Context, Result};
use stageconf::TelemetryConfig;
use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber. `telemetry.log_level` is the default
/// directive; it already reflects `RUST_LOG` when that is set.
pub fn init(config: &TelemetryConfig) -> Result<()> {
    let filter = EnvFilter::try_new(&config.log_level)
        .with_context(|| format!("Invalid log level '{}'", config.log_level))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
        .context("Failed to install tracing subscriber")
}
