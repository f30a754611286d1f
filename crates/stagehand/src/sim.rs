//! SimulatedEngine - an in-process engine for demos and tests
//!
//! Implements the full request set against plain in-memory sessions:
//! - Handles are allocated sequentially from `SimConfig::first_handle`
//! - Playback position advances with the tokio clock while playing
//! - Playback sessions announce `initialized` shortly after `create`
//! - Reaching the end emits `completed` (or wraps when looping)
//!
//! Every request is recorded. Individual requests can be scripted to fail,
//! to get no reply at all, or to be slow.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use stageproto::method::{HandleArgs, LoopingArgs, SeekArgs, SpeedArgs, VolumeArgs};
use stageproto::reply::{self, ReplyBody};
use stageproto::{
    DataSource, EngineHandler, EventHub, Method, RemoteError, SessionEvent, SessionHandle,
};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::state::Size;

/// Engine code for requests naming a session that doesn't exist.
pub const UNKNOWN_SESSION: &str = "unknown_session";
/// Engine code for malformed request arguments.
pub const INVALID_ARGS: &str = "invalid_args";

/// Configuration for the simulated engine
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Reported in `initialized` (and up front for capture sessions)
    pub size: Size,
    pub duration: Duration,
    pub rotation_correction: i32,
    /// Delay between the `create` reply and the `initialized` event
    pub ready_delay: Duration,
    /// Whether playback sessions announce `initialized` at all
    pub announce_ready: bool,
    pub first_handle: i64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            size: Size::new(1920.0, 1080.0),
            duration: Duration::from_secs(10),
            rotation_correction: 0,
            ready_delay: Duration::from_millis(20),
            announce_ready: true,
            first_handle: 0,
        }
    }
}

/// One request as the engine received it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: String,
    pub args: Value,
}

enum Scripted {
    Fail(RemoteError),
    NoReply,
}

struct SimSession {
    position: Duration,
    playing_since: Option<Instant>,
    speed: f64,
    looping: bool,
}

impl SimSession {
    fn new() -> Self {
        Self {
            position: Duration::ZERO,
            playing_since: None,
            speed: 1.0,
            looping: false,
        }
    }

    /// Fold elapsed play time into `position`.
    fn settle(&mut self, now: Instant) {
        if let Some(since) = self.playing_since {
            self.position += now.saturating_duration_since(since).mul_f64(self.speed);
            self.playing_since = Some(now);
        }
    }

    fn start(&mut self, now: Instant) {
        if self.playing_since.is_none() {
            self.playing_since = Some(now);
        }
    }
}

#[derive(Default)]
struct SimState {
    next_handle: i64,
    calls: Vec<RecordedCall>,
    scripted: HashMap<Method, VecDeque<Scripted>>,
    delays: HashMap<Method, Duration>,
    sessions: HashMap<SessionHandle, SimSession>,
}

/// The simulated engine
pub struct SimulatedEngine {
    config: SimConfig,
    state: Mutex<SimState>,
}

impl SimulatedEngine {
    pub fn new(config: SimConfig) -> Arc<Self> {
        let state = SimState {
            next_handle: config.first_handle.max(0),
            ..SimState::default()
        };
        Arc::new(Self {
            config,
            state: Mutex::new(state),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every request received so far, in arrival order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Wire names of every request received so far.
    pub fn methods(&self) -> Vec<String> {
        self.lock().calls.iter().map(|c| c.method.clone()).collect()
    }

    pub fn count(&self, method: Method) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.method == method.as_str())
            .count()
    }

    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Make the next `method` request reply with `error`.
    pub fn fail_next(&self, method: Method, error: RemoteError) {
        self.lock()
            .scripted
            .entry(method)
            .or_default()
            .push_back(Scripted::Fail(error));
    }

    /// Make the next `method` request get no reply record.
    pub fn drop_next(&self, method: Method) {
        self.lock()
            .scripted
            .entry(method)
            .or_default()
            .push_back(Scripted::NoReply);
    }

    /// Delay every `method` request by `delay` before it is handled.
    pub fn delay(&self, method: Method, delay: Duration) {
        self.lock().delays.insert(method, delay);
    }

    fn handle_args<T: serde::de::DeserializeOwned>(args: Value) -> Result<T, RemoteError> {
        serde_json::from_value(args).map_err(|e| RemoteError::new(INVALID_ARGS, e.to_string()))
    }

    fn with_session<R>(
        &self,
        handle: SessionHandle,
        f: impl FnOnce(&mut SimSession) -> R,
    ) -> Result<R, RemoteError> {
        let mut state = self.lock();
        let session = state.sessions.get_mut(&handle).ok_or_else(|| {
            RemoteError::new(UNKNOWN_SESSION, format!("no session {}", handle))
        })?;
        Ok(f(session))
    }

    fn create(&self, args: Value, events: &EventHub) -> Result<Value, RemoteError> {
        let source: DataSource = Self::handle_args(args)?;
        let handle = {
            let mut state = self.lock();
            let id = state.next_handle;
            state.next_handle += 1;
            let handle = SessionHandle::new(id)
                .ok_or_else(|| RemoteError::new(INVALID_ARGS, "handle space exhausted"))?;
            state.sessions.insert(handle, SimSession::new());
            handle
        };
        info!(
            "Created {} session {} for {}",
            source.kind(),
            handle,
            source.locator()
        );

        if matches!(source, DataSource::Device { .. }) {
            return Ok(json!({
                "textureId": handle.id(),
                "width": self.config.size.width,
                "height": self.config.size.height,
            }));
        }

        if self.config.announce_ready {
            let record = SessionEvent::Initialized {
                width: self.config.size.width,
                height: self.config.size.height,
                duration: self.config.duration.as_millis() as u64,
                rotation_correction: self.config.rotation_correction,
            }
            .to_record();
            let events = events.clone();
            let delay = self.config.ready_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                events.emit(handle, record);
            });
        }

        Ok(json!({ "textureId": handle.id() }))
    }

    fn position(&self, handle: SessionHandle, events: &EventHub) -> Result<Value, RemoteError> {
        let duration = self.config.duration;
        let (position, completed) = self.with_session(handle, |s| {
            s.settle(Instant::now());
            let mut completed = false;
            if !duration.is_zero() && s.position >= duration {
                if s.looping {
                    let wrapped = s.position.as_millis() % duration.as_millis();
                    s.position = Duration::from_millis(wrapped as u64);
                } else {
                    s.position = duration;
                    completed = s.playing_since.take().is_some();
                }
            }
            (s.position, completed)
        })?;

        if completed {
            debug!("Session {} reached the end", handle);
            events.emit(handle, SessionEvent::Completed.to_record());
        }
        Ok(json!(position.as_millis() as u64))
    }

    fn dispatch(&self, method: Method, args: Value, events: &EventHub) -> Result<Value, RemoteError> {
        match method {
            Method::InitializeEngine => {
                let handles: Vec<_> = self.lock().sessions.drain().map(|(h, _)| h).collect();
                for handle in handles {
                    events.close(handle);
                }
                Ok(Value::Null)
            }
            Method::CreateSession => self.create(args, events),
            Method::DisposeSession => {
                let HandleArgs { texture_id } = Self::handle_args(args)?;
                self.lock().sessions.remove(&texture_id).ok_or_else(|| {
                    RemoteError::new(UNKNOWN_SESSION, format!("no session {}", texture_id))
                })?;
                events.close(texture_id);
                Ok(Value::Null)
            }
            Method::SetMixingPolicy => Ok(Value::Null),
            Method::StartPlayback => {
                let HandleArgs { texture_id } = Self::handle_args(args)?;
                self.with_session(texture_id, |s| s.start(Instant::now()))?;
                Ok(Value::Null)
            }
            Method::PausePlayback => {
                let HandleArgs { texture_id } = Self::handle_args(args)?;
                self.with_session(texture_id, |s| {
                    s.settle(Instant::now());
                    s.playing_since = None;
                })?;
                Ok(Value::Null)
            }
            Method::QueryPosition => {
                let HandleArgs { texture_id } = Self::handle_args(args)?;
                self.position(texture_id, events)
            }
            Method::SetLooping => {
                let LoopingArgs {
                    texture_id,
                    looping,
                } = Self::handle_args(args)?;
                self.with_session(texture_id, |s| s.looping = looping)?;
                Ok(Value::Null)
            }
            Method::SetVolume => {
                let VolumeArgs { texture_id, .. } = Self::handle_args(args)?;
                self.with_session(texture_id, |_| ())?;
                Ok(Value::Null)
            }
            Method::SetPlaybackSpeed => {
                let SpeedArgs { texture_id, speed } = Self::handle_args(args)?;
                self.with_session(texture_id, |s| {
                    s.settle(Instant::now());
                    s.speed = speed;
                })?;
                Ok(Value::Null)
            }
            Method::SeekTo => {
                let SeekArgs {
                    texture_id,
                    position,
                } = Self::handle_args(args)?;
                self.with_session(texture_id, |s| {
                    if s.playing_since.is_some() {
                        s.playing_since = Some(Instant::now());
                    }
                    s.position = Duration::from_millis(position);
                })?;
                Ok(Value::Null)
            }
        }
    }
}

#[async_trait]
impl EngineHandler for SimulatedEngine {
    async fn handle(&self, method: &str, args: Value, events: &EventHub) -> ReplyBody {
        let (scripted, delay) = {
            let mut state = self.lock();
            state.calls.push(RecordedCall {
                method: method.to_string(),
                args: args.clone(),
            });
            match Method::from_name(method) {
                Some(m) => (
                    state.scripted.get_mut(&m).and_then(|q| q.pop_front()),
                    state.delays.get(&m).copied(),
                ),
                None => (None, None),
            }
        };

        let Some(method) = Method::from_name(method) else {
            return reply::error(&RemoteError::new(
                "unimplemented",
                format!("unknown method '{}'", method),
            ));
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match scripted {
            Some(Scripted::Fail(error)) => return reply::error(&error),
            Some(Scripted::NoReply) => return None,
            None => {}
        }

        match self.dispatch(method, args, events) {
            Ok(Value::Null) => reply::ok_void(),
            Ok(value) => reply::ok(value),
            Err(error) => {
                debug!("{} failed: {}", method, error);
                reply::error(&error)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stageproto::reply::decode_reply;

    fn engine() -> Arc<SimulatedEngine> {
        SimulatedEngine::new(SimConfig {
            first_handle: 3,
            ..SimConfig::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn create_allocates_sequential_handles() {
        let engine = engine();
        let hub = EventHub::new(8);
        let source = serde_json::to_value(DataSource::network("https://example.com/a.mp4")).unwrap();

        let first = decode_reply(engine.handle("create", source.clone(), &hub).await).unwrap();
        let second = decode_reply(engine.handle("create", source, &hub).await).unwrap();
        assert_eq!(first, json!({"textureId": 3}));
        assert_eq!(second, json!({"textureId": 4}));
        assert_eq!(engine.session_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn position_advances_while_playing() {
        let engine = engine();
        let hub = EventHub::new(8);
        let source = serde_json::to_value(DataSource::file("/tmp/a.mp4")).unwrap();
        decode_reply(engine.handle("create", source, &hub).await).unwrap();

        let handle = json!({"textureId": 3});
        decode_reply(engine.handle("play", handle.clone(), &hub).await).unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        decode_reply(engine.handle("pause", handle.clone(), &hub).await).unwrap();
        tokio::time::sleep(Duration::from_millis(1000)).await;

        let position = decode_reply(engine.handle("position", handle, &hub).await).unwrap();
        assert_eq!(position, json!(1500));
    }

    #[tokio::test]
    async fn scripted_failures_apply_once() {
        let engine = engine();
        let hub = EventHub::new(8);
        engine.fail_next(Method::SetMixingPolicy, RemoteError::new("E1", "busy"));

        let args = json!({"mixWithOthers": true});
        let err = decode_reply(engine.handle("setMixWithOthers", args.clone(), &hub).await)
            .unwrap_err();
        assert_eq!(err.as_remote().map(|r| r.code.as_str()), Some("E1"));
        assert!(decode_reply(engine.handle("setMixWithOthers", args, &hub).await).is_ok());
        assert_eq!(engine.count(Method::SetMixingPolicy), 2);
    }

    #[tokio::test]
    async fn unknown_session_is_remote_error() {
        let engine = engine();
        let hub = EventHub::new(8);
        let err = decode_reply(engine.handle("play", json!({"textureId": 42}), &hub).await)
            .unwrap_err();
        assert_eq!(err.as_remote().map(|r| r.code.as_str()), Some(UNKNOWN_SESSION));
    }

    #[tokio::test]
    async fn dropped_reply_is_connection_failure() {
        let engine = engine();
        let hub = EventHub::new(8);
        engine.drop_next(Method::InitializeEngine);
        let err = decode_reply(engine.handle("init", json!({}), &hub).await).unwrap_err();
        assert_eq!(err, stageproto::ChannelError::connection_failed());
    }
}
