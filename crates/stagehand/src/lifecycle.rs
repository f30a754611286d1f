//! Host foreground/background notifications.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::controller::SessionController;

/// Host application visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppLifecycle {
    Foreground,
    Background,
}

/// Broadcasts host lifecycle changes to every registered observer.
#[derive(Debug, Clone)]
pub struct HostLifecycle {
    tx: broadcast::Sender<AppLifecycle>,
}

impl Default for HostLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl HostLifecycle {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    /// Returns how many observers saw the change.
    pub fn notify(&self, state: AppLifecycle) -> usize {
        self.tx.send(state).unwrap_or(0)
    }

    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<AppLifecycle> {
        self.tx.subscribe()
    }
}

/// Pauses a controller in the background and resumes it in the foreground
/// if it had been playing. Ends when dropped.
pub struct LifecycleObserver {
    token: CancellationToken,
}

impl LifecycleObserver {
    pub(crate) fn attach(controller: &Arc<SessionController>, host: &HostLifecycle) -> Self {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let weak = Arc::downgrade(controller);
        let mut rx = host.subscribe();

        tokio::spawn(async move {
            let mut was_playing = false;
            loop {
                let state = tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    state = rx.recv() => state,
                };
                let state = match state {
                    Ok(state) => state,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        debug!("Lifecycle observer missed {} notifications", missed);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(controller) = weak.upgrade() else { break };

                match state {
                    AppLifecycle::Background => {
                        was_playing = controller.value().is_playing;
                        if was_playing {
                            if let Err(e) = controller.pause().await {
                                warn!("Failed to pause on background: {}", e);
                            }
                        }
                    }
                    AppLifecycle::Foreground => {
                        if std::mem::take(&mut was_playing) {
                            if let Err(e) = controller.play().await {
                                warn!("Failed to resume on foreground: {}", e);
                            }
                        }
                    }
                }
            }
            debug!("Lifecycle observer stopped");
        });

        Self { token }
    }
}

impl Drop for LifecycleObserver {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
