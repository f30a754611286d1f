//! Per-controller construction options.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use stageconf::ControllerConfig;
use stageproto::{DataSource, DetectionEvent};

/// Callback invoked for each forwarded detection.
pub type DetectionCallback = Arc<dyn Fn(&DetectionEvent) + Send + Sync>;

/// What to do with a detection identical to the last one forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    #[default]
    Suppress,
    Forward,
}

/// How a session becomes ready after `create` returns a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadinessPolicy {
    /// Wait for the engine's `initialized` event.
    #[default]
    AwaitEngineEvent,
    /// Ready as soon as the handle arrives. Capture engines that never
    /// send `initialized` use this.
    Synthesized,
}

/// Everything a `SessionController` needs besides its transport.
#[derive(Clone)]
pub struct SessionOptions {
    pub data_source: DataSource,
    /// Sent as `setMixWithOthers` before `create` when set.
    pub mix_with_others: Option<bool>,
    /// When false, the controller pauses while the host is backgrounded.
    pub allow_background_playback: bool,
    pub duplicate_policy: DuplicatePolicy,
    pub readiness: ReadinessPolicy,
    pub position_poll_interval: Duration,
    pub(crate) detection_callback: Option<DetectionCallback>,
}

impl SessionOptions {
    /// Options for a playback session with default tuning.
    pub fn playback(data_source: DataSource) -> Self {
        Self {
            data_source,
            mix_with_others: None,
            allow_background_playback: false,
            duplicate_policy: DuplicatePolicy::Suppress,
            readiness: ReadinessPolicy::AwaitEngineEvent,
            position_poll_interval: Duration::from_millis(500),
            detection_callback: None,
        }
    }

    /// Options for a capture session. Readiness is synthesized from the
    /// `create` reply.
    pub fn capture(data_source: DataSource) -> Self {
        Self {
            readiness: ReadinessPolicy::Synthesized,
            ..Self::playback(data_source)
        }
    }

    /// Overlay controller defaults from config.
    pub fn with_config(mut self, config: &ControllerConfig) -> Self {
        self.position_poll_interval = Duration::from_millis(config.position_poll_ms.max(1));
        self.mix_with_others = config.mix_with_others;
        self.allow_background_playback = config.allow_background_playback;
        self.duplicate_policy = if config.suppress_duplicate_detections {
            DuplicatePolicy::Suppress
        } else {
            DuplicatePolicy::Forward
        };
        self
    }

    pub fn with_mixing(mut self, mix_with_others: bool) -> Self {
        self.mix_with_others = Some(mix_with_others);
        self
    }

    pub fn allow_background(mut self, allow: bool) -> Self {
        self.allow_background_playback = allow;
        self
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    pub fn with_readiness(mut self, readiness: ReadinessPolicy) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.position_poll_interval = interval;
        self
    }

    /// Register the detection callback.
    pub fn on_detection<F>(mut self, callback: F) -> Self
    where
        F: Fn(&DetectionEvent) + Send + Sync + 'static,
    {
        self.detection_callback = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for SessionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionOptions")
            .field("data_source", &self.data_source)
            .field("mix_with_others", &self.mix_with_others)
            .field("allow_background_playback", &self.allow_background_playback)
            .field("duplicate_policy", &self.duplicate_policy)
            .field("readiness", &self.readiness)
            .field("position_poll_interval", &self.position_poll_interval)
            .field("detection_callback", &self.detection_callback.is_some())
            .finish()
    }
}
