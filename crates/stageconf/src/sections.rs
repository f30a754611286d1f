//! Config sections. Each field carries its own serde default so partial
//! files deserialize cleanly.

use serde::{Deserialize, Serialize};

/// Transport channel tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Per-request deadline before the reactor fails it as a transport error.
    /// Default: 10000
    #[serde(default = "ChannelConfig::default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Buffered events per session before slow listeners start lagging.
    /// Default: 256
    #[serde(default = "ChannelConfig::default_event_capacity")]
    pub event_capacity: usize,

    /// Queue depth between callers and the reactor task.
    /// Default: 256
    #[serde(default = "ChannelConfig::default_reactor_capacity")]
    pub reactor_capacity: usize,
}

impl ChannelConfig {
    fn default_request_timeout_ms() -> u64 {
        10_000
    }

    fn default_event_capacity() -> usize {
        256
    }

    fn default_reactor_capacity() -> usize {
        256
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: Self::default_request_timeout_ms(),
            event_capacity: Self::default_event_capacity(),
            reactor_capacity: Self::default_reactor_capacity(),
        }
    }
}

/// Defaults applied to every session controller built from config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Interval between position queries while playing.
    /// Default: 500
    #[serde(default = "ControllerConfig::default_position_poll_ms")]
    pub position_poll_ms: u64,

    /// Mixing policy sent before session creation. Unset means "don't send".
    #[serde(default)]
    pub mix_with_others: Option<bool>,

    /// Keep playing while the host app is backgrounded.
    /// Default: false
    #[serde(default)]
    pub allow_background_playback: bool,

    /// Drop detections identical to the last one forwarded.
    /// Default: true
    #[serde(default = "ControllerConfig::default_suppress_duplicates")]
    pub suppress_duplicate_detections: bool,
}

impl ControllerConfig {
    fn default_position_poll_ms() -> u64 {
        500
    }

    fn default_suppress_duplicates() -> bool {
        true
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            position_poll_ms: Self::default_position_poll_ms(),
            mix_with_others: None,
            allow_background_playback: false,
            suppress_duplicate_detections: Self::default_suppress_duplicates(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Default `EnvFilter` directive.
    /// Default: "info"
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
        }
    }
}
