//! The session controller.
//!
//! Lifecycle:
//! ```text
//! Uninitialized -> Creating -> Ready <-> Playing / Paused -> Disposing -> Disposed
//! ```
//!
//! One controller owns at most one engine session. Commands go out through
//! the `CommandProtocol`; engine events come back on a per-session stream that
//! a background task folds into the snapshot. Snapshots are published on a
//! `watch` channel.
//!
//! Locking: `inner` is a plain mutex and is never held across an await. Any
//! task that mutates state after an await re-checks the session `epoch` (and
//! the poll generation) so results from a session that has since been
//! disposed or invalidated are dropped.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use stageproto::{DetectionEvent, EventStream, SessionEvent, SessionHandle, Transport};
use tokio::sync::{oneshot, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::detection::DetectionFilter;
use crate::engine::{EngineContext, EngineIdentity};
use crate::error::SessionError;
use crate::lifecycle::{HostLifecycle, LifecycleObserver};
use crate::options::{ReadinessPolicy, SessionOptions};
use crate::protocol::CommandProtocol;
use crate::state::{SessionState, Size, StateSubscription};

/// Where a controller is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Uninitialized,
    Creating,
    Ready,
    Playing,
    Paused,
    Disposing,
    Disposed,
}

impl SessionPhase {
    /// The session exists and accepts commands.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            SessionPhase::Ready | SessionPhase::Playing | SessionPhase::Paused
        )
    }

    pub fn is_disposed(self) -> bool {
        matches!(self, SessionPhase::Disposing | SessionPhase::Disposed)
    }
}

type InitReply = oneshot::Sender<Result<(), SessionError>>;

struct PollTask {
    generation: u64,
    token: CancellationToken,
}

struct Inner {
    phase: SessionPhase,
    handle: SessionHandle,
    /// Engine the current session was created under.
    engine: Option<EngineIdentity>,
    /// Bumped whenever a session is registered or torn down.
    epoch: u64,
    state: SessionState,
    pending_init: Option<InitReply>,
    events_token: Option<CancellationToken>,
    poll: Option<PollTask>,
    poll_generation: u64,
    detections: DetectionFilter,
    lifecycle: Option<LifecycleObserver>,
}

impl Inner {
    fn stop_polling(&mut self) {
        if let Some(poll) = self.poll.take() {
            trace!("Stopping position poll generation {}", poll.generation);
            poll.token.cancel();
        }
    }

    fn stop_events(&mut self) {
        if let Some(token) = self.events_token.take() {
            token.cancel();
        }
    }

    fn reject_init(&mut self, error: SessionError) {
        if let Some(tx) = self.pending_init.take() {
            let _ = tx.send(Err(error));
        }
    }

    fn live_session(&self) -> Option<(SessionHandle, u64)> {
        self.phase.is_live().then_some((self.handle, self.epoch))
    }
}

/// Drives one capture or playback session.
///
/// Always used behind an `Arc`: background tasks hold weak references back
/// to the controller.
pub struct SessionController {
    protocol: CommandProtocol,
    engine: Arc<EngineContext>,
    options: SessionOptions,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<SessionState>,
    /// True while `create()` is between claiming the controller and
    /// recording the handle. `dispose()` waits for it to clear.
    creating: watch::Sender<bool>,
}

impl SessionController {
    pub fn new(
        transport: Arc<dyn Transport>,
        engine: Arc<EngineContext>,
        options: SessionOptions,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(SessionState::uninitialized());
        let (creating, _) = watch::channel(false);
        let detections = DetectionFilter::new(options.duplicate_policy);

        Arc::new(Self {
            protocol: CommandProtocol::new(transport),
            engine,
            options,
            inner: Mutex::new(Inner {
                phase: SessionPhase::Uninitialized,
                handle: SessionHandle::UNINITIALIZED,
                engine: None,
                epoch: 0,
                state: SessionState::uninitialized(),
                pending_init: None,
                events_token: None,
                poll: None,
                poll_generation: 0,
                detections,
                lifecycle: None,
            }),
            state_tx,
            creating,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn update(&self, inner: &mut Inner, f: impl FnOnce(&SessionState) -> SessionState) {
        let next = f(&inner.state);
        inner.state = next.clone();
        self.state_tx.send_replace(next);
    }

    /// The current snapshot.
    pub fn value(&self) -> SessionState {
        self.state_tx.borrow().clone()
    }

    /// Follow future snapshots. Drop the subscription to stop.
    pub fn subscribe(&self) -> StateSubscription {
        StateSubscription::new(self.state_tx.subscribe())
    }

    /// The engine-issued handle, or `SessionHandle::UNINITIALIZED`.
    pub fn handle(&self) -> SessionHandle {
        self.lock().handle
    }

    pub fn phase(&self) -> SessionPhase {
        self.lock().phase
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    // ==================== Creation ====================

    /// Create the engine session and wait until it is ready.
    ///
    /// Fails with `AlreadyCreated` if this controller already has (or is
    /// creating) a session, and with `Disposed` if `dispose()` wins the race.
    pub async fn create(self: &Arc<Self>) -> Result<SessionHandle, SessionError> {
        {
            let mut inner = self.lock();
            match inner.phase {
                SessionPhase::Uninitialized => {}
                SessionPhase::Disposing | SessionPhase::Disposed => {
                    return Err(SessionError::Disposed)
                }
                _ => return Err(SessionError::AlreadyCreated),
            }
            inner.phase = SessionPhase::Creating;
            self.creating.send_replace(true);
        }

        info!(
            "Creating {} session for {}",
            self.options.data_source.kind(),
            self.options.data_source.locator()
        );

        let started = self.start_session().await;
        if started.is_err() {
            let mut inner = self.lock();
            if inner.phase == SessionPhase::Creating {
                inner.phase = SessionPhase::Uninitialized;
            }
        }
        self.creating.send_replace(false);

        let (handle, ready) = started?;
        match ready.await {
            Ok(Ok(())) => {
                info!("Session {} ready", handle);
                Ok(handle)
            }
            Ok(Err(e)) => {
                warn!("Session {} failed to initialize: {}", handle, e);
                Err(e)
            }
            Err(_) => Err(SessionError::Disposed),
        }
    }

    /// Steps up to and including recording the handle and subscribing.
    async fn start_session(
        self: &Arc<Self>,
    ) -> Result<(SessionHandle, oneshot::Receiver<Result<(), SessionError>>), SessionError> {
        let identity = self.engine.ensure_current(&self.protocol).await?;

        if let Some(mix) = self.options.mix_with_others {
            self.protocol.set_mixing_policy(mix).await?;
        }

        let created = self.protocol.create_session(&self.options.data_source).await?;
        debug!("Engine allocated session {}", created.handle);

        let (ready_tx, ready_rx) = oneshot::channel();
        let token = CancellationToken::new();
        let epoch = {
            let mut inner = self.lock();
            inner.handle = created.handle;
            inner.engine = Some(identity);
            if inner.phase != SessionPhase::Creating {
                // dispose() is waiting on us and will release the handle
                return Err(SessionError::Disposed);
            }
            inner.epoch += 1;
            inner.pending_init = Some(ready_tx);
            inner.events_token = Some(token.clone());
            inner.epoch
        };

        let events = self.protocol.events_for(created.handle);
        self.spawn_event_listener(events, token, epoch);

        if self.options.readiness == ReadinessPolicy::Synthesized {
            let ready = {
                let mut inner = self.lock();
                if inner.epoch != epoch {
                    None
                } else {
                    let size = created.size.unwrap_or_default();
                    self.mark_ready(&mut inner, size, Duration::ZERO, 0)
                }
            };
            if let Some((handle, epoch)) = ready {
                self.spawn_apply_settings(handle, epoch);
            }
        }

        Ok((created.handle, ready_rx))
    }

    /// Fold readiness into the snapshot. Returns the session to re-apply
    /// settings to the first time it becomes ready.
    fn mark_ready(
        &self,
        inner: &mut Inner,
        size: Size,
        duration: Duration,
        rotation_correction: i32,
    ) -> Option<(SessionHandle, u64)> {
        self.update(inner, |s| SessionState {
            is_initialized: true,
            error_description: None,
            size,
            duration,
            rotation_correction,
            ..s.clone()
        });

        if let Some(tx) = inner.pending_init.take() {
            let _ = tx.send(Ok(()));
        }

        if inner.phase == SessionPhase::Creating {
            inner.phase = SessionPhase::Ready;
            Some((inner.handle, inner.epoch))
        } else {
            None
        }
    }

    fn spawn_apply_settings(self: &Arc<Self>, handle: SessionHandle, epoch: u64) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.apply_settings(handle, epoch).await {
                warn!("Failed to apply settings to session {}: {}", handle, e);
            }
        });
    }

    /// Push settings recorded before readiness to the engine.
    async fn apply_settings(
        self: &Arc<Self>,
        handle: SessionHandle,
        epoch: u64,
    ) -> Result<(), SessionError> {
        let state = self.value();
        if state.is_looping {
            self.protocol.set_looping(handle, true).await?;
        }
        if state.volume != 1.0 {
            self.protocol.set_volume(handle, state.volume).await?;
        }
        if state.is_playing {
            self.apply_play_pause(handle, epoch, true).await?;
        }
        Ok(())
    }

    // ==================== Disposal ====================

    /// Release the session. Safe to call any number of times; only the first
    /// call does anything.
    pub async fn dispose(&self) -> Result<(), SessionError> {
        {
            let mut inner = self.lock();
            if inner.phase.is_disposed() {
                return Ok(());
            }
            inner.phase = SessionPhase::Disposing;
        }

        let mut creating = self.creating.subscribe();
        let _ = creating.wait_for(|in_flight| !*in_flight).await;

        let (handle, stale) = {
            let mut inner = self.lock();
            inner.stop_events();
            inner.stop_polling();
            inner.reject_init(SessionError::Disposed);
            inner.lifecycle.take();
            let stale = inner.engine.is_some_and(|id| id != self.engine.live());
            (inner.handle, stale)
        };

        let result = if handle.is_valid() && !stale {
            debug!("Disposing session {}", handle);
            self.protocol
                .dispose_session(handle)
                .await
                .map_err(SessionError::from)
        } else {
            Ok(())
        };

        {
            let mut inner = self.lock();
            inner.phase = SessionPhase::Disposed;
            inner.handle = SessionHandle::UNINITIALIZED;
            inner.epoch += 1;
        }
        info!("Session {} disposed", handle);
        result
    }

    // ==================== Engine identity ====================

    /// Re-initialize a replaced engine and drop a session that died with it.
    async fn check_engine(&self) -> Result<(), SessionError> {
        let live = self.engine.ensure_current(&self.protocol).await?;
        self.invalidate_if_stale(live);
        Ok(())
    }

    fn invalidate_if_stale(&self, live: EngineIdentity) {
        let mut inner = self.lock();
        if inner.phase.is_disposed() || !inner.engine.is_some_and(|id| id != live) {
            return;
        }

        warn!(
            "Session {} belonged to a replaced engine, resetting",
            inner.handle
        );
        inner.stop_events();
        inner.stop_polling();
        inner.reject_init(SessionError::EngineReplaced);
        inner.detections.reset();
        inner.phase = SessionPhase::Uninitialized;
        inner.handle = SessionHandle::UNINITIALIZED;
        inner.engine = None;
        inner.epoch += 1;
        self.update(&mut inner, |_| SessionState::uninitialized());
    }

    // ==================== Playback ====================

    /// Start (or resume) playback. Before the session is ready this only
    /// records the intention.
    pub async fn play(self: &Arc<Self>) -> Result<(), SessionError> {
        let rewind = {
            let mut inner = self.lock();
            if inner.phase.is_disposed() {
                return Ok(());
            }
            let s = &inner.state;
            let rewind = s.is_initialized && !s.duration.is_zero() && s.position >= s.duration;
            self.update(&mut inner, |s| SessionState {
                is_playing: true,
                ..s.clone()
            });
            rewind
        };

        self.check_engine().await?;
        let Some((handle, epoch)) = self.lock().live_session() else {
            return Ok(());
        };

        if rewind {
            self.protocol.seek_to(handle, Duration::ZERO).await?;
            let mut inner = self.lock();
            if inner.epoch == epoch {
                self.update(&mut inner, |s| SessionState {
                    position: Duration::ZERO,
                    is_completed: false,
                    ..s.clone()
                });
            }
        }

        self.apply_play_pause(handle, epoch, true).await
    }

    /// Pause playback. Before the session is ready this only records the
    /// intention.
    pub async fn pause(self: &Arc<Self>) -> Result<(), SessionError> {
        {
            let mut inner = self.lock();
            if inner.phase.is_disposed() {
                return Ok(());
            }
            inner.stop_polling();
            self.update(&mut inner, |s| SessionState {
                is_playing: false,
                ..s.clone()
            });
        }

        self.check_engine().await?;
        let Some((handle, epoch)) = self.lock().live_session() else {
            return Ok(());
        };
        self.apply_play_pause(handle, epoch, false).await
    }

    async fn apply_play_pause(
        self: &Arc<Self>,
        handle: SessionHandle,
        epoch: u64,
        playing: bool,
    ) -> Result<(), SessionError> {
        if !playing {
            self.protocol.pause_playback(handle).await?;
            let mut inner = self.lock();
            if inner.epoch == epoch && inner.phase.is_live() && !inner.state.is_playing {
                inner.phase = SessionPhase::Paused;
            }
            return Ok(());
        }

        self.protocol.start_playback(handle).await?;
        let speed = {
            let mut inner = self.lock();
            if inner.epoch != epoch || !inner.phase.is_live() || !inner.state.is_playing {
                return Ok(());
            }
            inner.phase = SessionPhase::Playing;
            self.update(&mut inner, |s| SessionState {
                is_completed: false,
                ..s.clone()
            });
            self.start_polling(&mut inner);
            inner.state.playback_speed
        };

        if speed != 1.0 {
            self.protocol.set_playback_speed(handle, speed).await?;
        }
        Ok(())
    }

    /// Jump to `position`, clamped to the known duration.
    pub async fn seek_to(self: &Arc<Self>, position: Duration) -> Result<(), SessionError> {
        if self.lock().phase.is_disposed() {
            return Ok(());
        }
        self.check_engine().await?;

        let (handle, epoch, target) = {
            let inner = self.lock();
            let Some((handle, epoch)) = inner.live_session() else {
                return Ok(());
            };
            let duration = inner.state.duration;
            let target = if duration.is_zero() {
                position
            } else {
                position.min(duration)
            };
            (handle, epoch, target)
        };

        self.protocol.seek_to(handle, target).await?;

        let mut inner = self.lock();
        if inner.epoch == epoch {
            self.update(&mut inner, |s| SessionState {
                position: target,
                is_completed: false,
                ..s.clone()
            });
        }
        Ok(())
    }

    /// Set the output volume, clamped to `[0, 1]`.
    pub async fn set_volume(self: &Arc<Self>, volume: f64) -> Result<(), SessionError> {
        if volume.is_nan() {
            return Err(SessionError::InvalidArgument("volume must be a number".into()));
        }
        let volume = volume.clamp(0.0, 1.0);
        if !self.record(|s| SessionState {
            volume,
            ..s.clone()
        }) {
            return Ok(());
        }

        self.check_engine().await?;
        if let Some((handle, _)) = self.lock().live_session() {
            self.protocol.set_volume(handle, volume).await?;
        }
        Ok(())
    }

    pub async fn set_looping(self: &Arc<Self>, looping: bool) -> Result<(), SessionError> {
        if !self.record(|s| SessionState {
            is_looping: looping,
            ..s.clone()
        }) {
            return Ok(());
        }

        self.check_engine().await?;
        if let Some((handle, _)) = self.lock().live_session() {
            self.protocol.set_looping(handle, looping).await?;
        }
        Ok(())
    }

    /// Set the playback rate. Sent to the engine only while playing; otherwise
    /// it is applied when playback starts.
    pub async fn set_playback_speed(self: &Arc<Self>, speed: f64) -> Result<(), SessionError> {
        if !(speed > 0.0 && speed.is_finite()) {
            return Err(SessionError::InvalidArgument(format!(
                "playback speed must be positive, got {}",
                speed
            )));
        }
        if !self.record(|s| SessionState {
            playback_speed: speed,
            ..s.clone()
        }) {
            return Ok(());
        }

        self.check_engine().await?;
        let target = {
            let inner = self.lock();
            inner
                .live_session()
                .filter(|_| inner.state.is_playing)
                .map(|(handle, _)| handle)
        };
        if let Some(handle) = target {
            self.protocol.set_playback_speed(handle, speed).await?;
        }
        Ok(())
    }

    /// Ask the engine for the current position once. `None` until ready.
    pub async fn position(self: &Arc<Self>) -> Result<Option<Duration>, SessionError> {
        if self.lock().phase.is_disposed() {
            return Ok(None);
        }
        self.check_engine().await?;
        let Some((handle, _)) = self.lock().live_session() else {
            return Ok(None);
        };
        Ok(Some(self.protocol.query_position(handle).await?))
    }

    /// Record a setting in the snapshot. False once disposed.
    fn record(&self, f: impl FnOnce(&SessionState) -> SessionState) -> bool {
        let mut inner = self.lock();
        if inner.phase.is_disposed() {
            return false;
        }
        self.update(&mut inner, f);
        true
    }

    // ==================== Lifecycle ====================

    /// Pause while the host is backgrounded, unless background playback was
    /// allowed. Returns whether an observer was registered.
    pub fn observe_lifecycle(self: &Arc<Self>, host: &HostLifecycle) -> bool {
        if self.options.allow_background_playback {
            return false;
        }
        let mut inner = self.lock();
        if inner.phase.is_disposed() {
            return false;
        }
        inner.lifecycle = Some(LifecycleObserver::attach(self, host));
        true
    }

    // ==================== Position poll ====================

    fn start_polling(self: &Arc<Self>, inner: &mut Inner) {
        inner.stop_polling();
        inner.poll_generation += 1;
        let generation = inner.poll_generation;
        let token = CancellationToken::new();
        inner.poll = Some(PollTask {
            generation,
            token: token.clone(),
        });

        let handle = inner.handle;
        let every = self.options.position_poll_interval;
        let protocol = self.protocol.clone();
        let weak = Arc::downgrade(self);
        trace!("Starting position poll generation {} every {:?}", generation, every);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let result = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    result = protocol.query_position(handle) => result,
                };
                let Some(this) = weak.upgrade() else { break };
                match result {
                    Ok(position) => this.apply_position(generation, position),
                    Err(e) => debug!("Position query for session {} failed: {}", handle, e),
                }
            }
        });
    }

    fn apply_position(&self, generation: u64, position: Duration) {
        let mut inner = self.lock();
        let current = inner
            .poll
            .as_ref()
            .is_some_and(|poll| poll.generation == generation);
        if !current || inner.phase.is_disposed() {
            trace!("Discarding stale position from poll generation {}", generation);
            return;
        }
        self.update(&mut inner, |s| SessionState {
            position,
            ..s.clone()
        });
    }

    // ==================== Event folding ====================

    fn spawn_event_listener(
        self: &Arc<Self>,
        mut events: EventStream,
        token: CancellationToken,
        epoch: u64,
    ) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let item = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    item = events.next() => item,
                };
                let Some(this) = weak.upgrade() else { break };
                match item {
                    Some(Ok(record)) => this.on_event(epoch, &record),
                    Some(Err(e)) => {
                        // A live session keeps listening so a later
                        // `initialized` can clear the error.
                        let Some(handle) = this.on_stream_error(epoch, e.description()) else {
                            break;
                        };
                        debug!("Re-subscribing to events for session {}", handle);
                        drop(events);
                        events = this.protocol.events_for(handle);
                    }
                    None => {
                        debug!("Event stream for epoch {} ended", epoch);
                        break;
                    }
                }
            }
        });
    }

    fn on_event(self: &Arc<Self>, epoch: u64, record: &Value) {
        let event = match SessionEvent::from_record(record) {
            Ok(event) => event,
            Err(e) => {
                let kind = SessionEvent::kind_of(record);
                warn!("Dropping malformed '{}' event: {}", kind, e);
                if kind == "initialized" && self.lock().pending_init.is_some() {
                    self.on_stream_error(epoch, format!("malformed initialized event: {}", e));
                }
                return;
            }
        };

        let mut detection = None;
        let mut ready = None;
        {
            let mut inner = self.lock();
            if inner.epoch != epoch || inner.phase.is_disposed() {
                return;
            }
            trace!("Session {} event {:?}", inner.handle, event);

            match event {
                SessionEvent::Initialized {
                    width,
                    height,
                    duration,
                    rotation_correction,
                } => {
                    ready = self.mark_ready(
                        &mut inner,
                        Size::new(width, height),
                        Duration::from_millis(duration),
                        rotation_correction,
                    );
                }
                SessionEvent::Completed => {
                    inner.stop_polling();
                    if inner.phase.is_live() {
                        inner.phase = SessionPhase::Paused;
                    }
                    self.update(&mut inner, |s| SessionState {
                        is_playing: false,
                        is_completed: true,
                        position: s.duration,
                        ..s.clone()
                    });
                }
                SessionEvent::BufferingStart => self.update(&mut inner, |s| SessionState {
                    is_buffering: true,
                    ..s.clone()
                }),
                SessionEvent::BufferingEnd => self.update(&mut inner, |s| SessionState {
                    is_buffering: false,
                    ..s.clone()
                }),
                SessionEvent::BufferingUpdate { values } => {
                    let buffered = SessionEvent::buffered_ranges(&values);
                    self.update(&mut inner, |s| SessionState {
                        buffered,
                        ..s.clone()
                    });
                }
                SessionEvent::IsPlayingStateUpdate { is_playing } => {
                    self.update(&mut inner, |s| SessionState {
                        is_playing,
                        ..s.clone()
                    });
                    if inner.phase.is_live() {
                        if is_playing {
                            inner.phase = SessionPhase::Playing;
                            if inner.poll.is_none() {
                                self.start_polling(&mut inner);
                            }
                        } else {
                            inner.phase = SessionPhase::Paused;
                            inner.stop_polling();
                        }
                    }
                }
                SessionEvent::Detection {
                    payload,
                    kind,
                    quality,
                } => {
                    detection = inner.detections.admit(DetectionEvent {
                        payload,
                        kind,
                        quality,
                    });
                }
                SessionEvent::Unknown => {
                    debug!("Ignoring unknown event '{}'", SessionEvent::kind_of(record));
                }
            }
        }

        if let (Some(found), Some(callback)) = (detection, &self.options.detection_callback) {
            callback(&found);
        }
        if let Some((handle, epoch)) = ready {
            self.spawn_apply_settings(handle, epoch);
        }
    }

    /// Record a stream failure. Returns the handle to re-subscribe to when
    /// the session is still live.
    fn on_stream_error(&self, epoch: u64, description: String) -> Option<SessionHandle> {
        let mut inner = self.lock();
        if inner.epoch != epoch || inner.phase.is_disposed() {
            return None;
        }
        warn!("Session {} stream error: {}", inner.handle, description);
        inner.stop_polling();
        self.update(&mut inner, |s| s.with_error(description.clone()));
        inner.reject_init(SessionError::Stream(description));
        inner.phase.is_live().then_some(inner.handle)
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(|e| e.into_inner());
        inner.stop_events();
        inner.stop_polling();
    }
}
