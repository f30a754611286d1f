//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, StageConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/stagehand/config.toml");
    if system.exists() {
        files.push(system);
    }

    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("stagehand/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("stagehand.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read a TOML file and overlay the keys it sets onto `config`.
pub fn apply_file(config: &mut StageConfig, path: &Path) -> Result<(), ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    apply_toml(config, &contents, path)
}

/// Overlay only the keys present in `contents`; absent keys keep their
/// current value so earlier files are not reset to defaults.
fn apply_toml(config: &mut StageConfig, contents: &str, path: &Path) -> Result<(), ConfigError> {
    let table: toml::Table = contents.parse().map_err(|e: toml::de::Error| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let bad_value = |key: &str| ConfigError::Parse {
        path: path.to_path_buf(),
        message: format!("invalid value for {}", key),
    };

    if let Some(channel) = table.get("channel").and_then(|v| v.as_table()) {
        if let Some(v) = channel.get("request_timeout_ms") {
            config.channel.request_timeout_ms = v
                .as_integer()
                .and_then(|n| u64::try_from(n).ok())
                .ok_or_else(|| bad_value("channel.request_timeout_ms"))?;
        }
        if let Some(v) = channel.get("event_capacity") {
            config.channel.event_capacity = v
                .as_integer()
                .and_then(|n| usize::try_from(n).ok())
                .filter(|n| *n > 0)
                .ok_or_else(|| bad_value("channel.event_capacity"))?;
        }
        if let Some(v) = channel.get("reactor_capacity") {
            config.channel.reactor_capacity = v
                .as_integer()
                .and_then(|n| usize::try_from(n).ok())
                .filter(|n| *n > 0)
                .ok_or_else(|| bad_value("channel.reactor_capacity"))?;
        }
    }

    if let Some(controller) = table.get("controller").and_then(|v| v.as_table()) {
        if let Some(v) = controller.get("position_poll_ms") {
            config.controller.position_poll_ms = v
                .as_integer()
                .and_then(|n| u64::try_from(n).ok())
                .filter(|n| *n > 0)
                .ok_or_else(|| bad_value("controller.position_poll_ms"))?;
        }
        if let Some(v) = controller.get("mix_with_others") {
            config.controller.mix_with_others =
                Some(v.as_bool().ok_or_else(|| bad_value("controller.mix_with_others"))?);
        }
        if let Some(v) = controller.get("allow_background_playback") {
            config.controller.allow_background_playback = v
                .as_bool()
                .ok_or_else(|| bad_value("controller.allow_background_playback"))?;
        }
        if let Some(v) = controller.get("suppress_duplicate_detections") {
            config.controller.suppress_duplicate_detections = v
                .as_bool()
                .ok_or_else(|| bad_value("controller.suppress_duplicate_detections"))?;
        }
    }

    if let Some(telemetry) = table.get("telemetry").and_then(|v| v.as_table()) {
        if let Some(v) = telemetry.get("log_level").and_then(|v| v.as_str()) {
            config.telemetry.log_level = v.to_string();
        }
    }

    Ok(())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut StageConfig, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("STAGEHAND_REQUEST_TIMEOUT_MS") {
        if let Ok(ms) = v.parse() {
            config.channel.request_timeout_ms = ms;
            sources
                .env_overrides
                .push("STAGEHAND_REQUEST_TIMEOUT_MS".to_string());
        }
    }
    if let Ok(v) = env::var("STAGEHAND_POSITION_POLL_MS") {
        if let Ok(ms) = v.parse::<u64>() {
            if ms > 0 {
                config.controller.position_poll_ms = ms;
                sources
                    .env_overrides
                    .push("STAGEHAND_POSITION_POLL_MS".to_string());
            }
        }
    }
    if let Ok(v) = env::var("STAGEHAND_MIX_WITH_OTHERS") {
        if let Some(mix) = parse_bool(&v) {
            config.controller.mix_with_others = Some(mix);
            sources
                .env_overrides
                .push("STAGEHAND_MIX_WITH_OTHERS".to_string());
        }
    }
    if let Ok(v) = env::var("STAGEHAND_ALLOW_BACKGROUND") {
        if let Some(allow) = parse_bool(&v) {
            config.controller.allow_background_playback = allow;
            sources
                .env_overrides
                .push("STAGEHAND_ALLOW_BACKGROUND".to_string());
        }
    }
    if let Ok(v) = env::var("STAGEHAND_LOG_LEVEL") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("STAGEHAND_LOG_LEVEL".to_string());
    }
    // Also support RUST_LOG
    if let Ok(v) = env::var("RUST_LOG") {
        config.telemetry.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn later_file_only_overrides_keys_it_sets() {
        let first = write_config(
            r#"
[controller]
position_poll_ms = 250
mix_with_others = true
"#,
        );
        let second = write_config(
            r#"
[controller]
allow_background_playback = true
"#,
        );

        let mut config = StageConfig::default();
        apply_file(&mut config, first.path()).unwrap();
        apply_file(&mut config, second.path()).unwrap();

        assert_eq!(config.controller.position_poll_ms, 250);
        assert_eq!(config.controller.mix_with_others, Some(true));
        assert!(config.controller.allow_background_playback);
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let file = write_config("[controller]\nposition_poll_ms = 0\n");
        let mut config = StageConfig::default();
        let err = apply_file(&mut config, file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn malformed_toml_reports_path() {
        let file = write_config("[controller\n");
        let mut config = StageConfig::default();
        match apply_file(&mut config, file.path()) {
            Err(ConfigError::Parse { path, .. }) => assert_eq!(path, file.path()),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn missing_file_is_read_error() {
        let mut config = StageConfig::default();
        let err = apply_file(&mut config, Path::new("/nonexistent/stagehand.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead { .. }));
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
