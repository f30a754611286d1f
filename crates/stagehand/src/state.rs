//! Immutable session snapshots and their subscription handle.
//!
//! Every change produces a whole new `SessionState`; observers never see a
//! half-applied update. Build the next snapshot with struct-update syntax:
//!
//! ```ignore
//! let next = SessionState { is_buffering: true, ..current.clone() };
//! ```

use std::time::Duration;

use serde::Serialize;
use stageproto::DurationRange;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Pixel dimensions reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Point-in-time view of one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionState {
    /// Set once the engine has reported the session ready.
    pub is_initialized: bool,
    /// Present iff the session is in an error state.
    pub error_description: Option<String>,
    pub size: Size,
    /// Clockwise rotation in degrees to apply when rendering.
    pub rotation_correction: i32,
    pub duration: Duration,
    pub position: Duration,
    pub buffered: Vec<DurationRange>,
    pub is_playing: bool,
    pub is_buffering: bool,
    pub is_completed: bool,
    pub is_looping: bool,
    /// In `[0, 1]`.
    pub volume: f64,
    /// Always positive.
    pub playback_speed: f64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::uninitialized()
    }
}

impl SessionState {
    /// The snapshot every controller starts from.
    pub fn uninitialized() -> Self {
        Self {
            is_initialized: false,
            error_description: None,
            size: Size::default(),
            rotation_correction: 0,
            duration: Duration::ZERO,
            position: Duration::ZERO,
            buffered: Vec::new(),
            is_playing: false,
            is_buffering: false,
            is_completed: false,
            is_looping: false,
            volume: 1.0,
            playback_speed: 1.0,
        }
    }

    /// Uninitialized snapshot carrying an error.
    pub fn errored(description: impl Into<String>) -> Self {
        Self {
            error_description: Some(description.into()),
            ..Self::uninitialized()
        }
    }

    pub fn has_error(&self) -> bool {
        self.error_description.is_some()
    }

    /// Width over height, or `1.0` until both are known and positive.
    pub fn aspect_ratio(&self) -> f64 {
        if !self.is_initialized || self.size.width <= 0.0 || self.size.height <= 0.0 {
            return 1.0;
        }
        let ratio = self.size.width / self.size.height;
        if ratio > 0.0 && ratio.is_finite() {
            ratio
        } else {
            1.0
        }
    }

    /// Copy of this snapshot with the error set.
    pub fn with_error(&self, description: impl Into<String>) -> Self {
        Self {
            error_description: Some(description.into()),
            ..self.clone()
        }
    }
}

/// Live view of a controller's snapshots.
///
/// Dropping the subscription (or calling [`unsubscribe`](Self::unsubscribe))
/// stops delivery. Snapshots published while nobody is reading coalesce; a
/// reader always sees the latest one.
pub struct StateSubscription {
    rx: watch::Receiver<SessionState>,
}

impl StateSubscription {
    pub(crate) fn new(rx: watch::Receiver<SessionState>) -> Self {
        Self { rx }
    }

    /// The most recent snapshot, without waiting.
    pub fn current(&self) -> SessionState {
        self.rx.borrow().clone()
    }

    /// Wait for the next snapshot. `None` once the controller is gone.
    pub async fn changed(&mut self) -> Option<SessionState> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Wait until a snapshot satisfies `predicate` (checking the current one
    /// first). `None` if the controller goes away first.
    pub async fn wait_for(
        &mut self,
        mut predicate: impl FnMut(&SessionState) -> bool,
    ) -> Option<SessionState> {
        let state = self.rx.wait_for(|s| predicate(s)).await.ok()?;
        Some(state.clone())
    }

    /// Snapshots as a `Stream`, starting with the current one.
    pub fn into_stream(self) -> WatchStream<SessionState> {
        WatchStream::new(self.rx)
    }

    pub fn unsubscribe(self) {}
}
