//! Minimal configuration loading for stagehand.
//!
//! Every stagehand crate can depend on this one without pulling in the
//! async stack, so it only knows about plain values.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins, field by field):
//! 1. `/etc/stagehand/config.toml` (system)
//! 2. `~/.config/stagehand/config.toml` (user)
//! 3. `./stagehand.toml` (local override, or the `--config` path)
//! 4. Environment variables (`STAGEHAND_*`)
//!
//! # Example Config
//!
//! ```toml
//! [channel]
//! request_timeout_ms = 10000
//! event_capacity = 256
//!
//! [controller]
//! position_poll_ms = 500
//! mix_with_others = true
//! allow_background_playback = false
//! suppress_duplicate_detections = true
//!
//! [telemetry]
//! log_level = "debug"
//! ```

pub mod loader;
pub mod sections;

pub use loader::{discover_config_files_with_override, ConfigSources};
pub use sections::{ChannelConfig, ControllerConfig, TelemetryConfig};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete stagehand configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StageConfig {
    /// Transport channel tuning.
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Session controller defaults.
    #[serde(default)]
    pub controller: ControllerConfig,

    /// Logging.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl StageConfig {
    /// Load configuration from all standard sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration, letting `config_path` replace the local override.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration from optional path and report where values came from.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = StageConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            loader::apply_file(&mut config, &path)?;
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# stagehand configuration\n\n");

        output.push_str("[channel]\n");
        output.push_str(&format!(
            "request_timeout_ms = {}\n",
            self.channel.request_timeout_ms
        ));
        output.push_str(&format!("event_capacity = {}\n", self.channel.event_capacity));
        output.push_str(&format!(
            "reactor_capacity = {}\n",
            self.channel.reactor_capacity
        ));

        output.push_str("\n[controller]\n");
        output.push_str(&format!(
            "position_poll_ms = {}\n",
            self.controller.position_poll_ms
        ));
        if let Some(mix) = self.controller.mix_with_others {
            output.push_str(&format!("mix_with_others = {}\n", mix));
        }
        output.push_str(&format!(
            "allow_background_playback = {}\n",
            self.controller.allow_background_playback
        ));
        output.push_str(&format!(
            "suppress_duplicate_detections = {}\n",
            self.controller.suppress_duplicate_detections
        ));

        output.push_str("\n[telemetry]\n");
        output.push_str(&format!("log_level = \"{}\"\n", self.telemetry.log_level));

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StageConfig::default();
        assert_eq!(config.controller.position_poll_ms, 500);
        assert_eq!(config.controller.mix_with_others, None);
        assert!(config.controller.suppress_duplicate_detections);
    }

    #[test]
    fn test_to_toml_roundtrips_through_parser() {
        let mut config = StageConfig::default();
        config.controller.mix_with_others = Some(true);
        config.telemetry.log_level = "trace".to_string();

        let rendered = config.to_toml();
        assert!(rendered.contains("[channel]"));
        assert!(rendered.contains("[controller]"));

        let parsed: StageConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
