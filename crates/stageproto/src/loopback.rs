//! In-process transport that drives an `EngineHandler`.
//!
//! Architecture: Reactor pattern, same shape as a socket client
//! - Pending-request table owned by a dedicated reactor task
//! - Requests flow through an mpsc channel as encoded STAGE01 records
//! - Each request is handled on its own task, so replies complete out of order
//! - Replies are routed back via oneshot channels keyed by request id
//!
//! Events don't go through the reactor: each session has its own broadcast
//! channel in the `EventHub`, which the engine side emits into directly.
//!
//! Usage:
//! ```ignore
//! let transport = LoopbackTransport::new(LoopbackConfig::new("demo"), Arc::new(MyEngine));
//! let result = transport.call("create", args).await?;
//! let events = transport.events_for(handle);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::reply::{decode_reply, ReplyBody};
use crate::transport::{EventStream, Transport};
use crate::wire::{WireReply, WireRequest};
use crate::{ChannelError, SessionHandle};

/// Item carried on a session's broadcast channel.
type EventItem = Result<Value, ChannelError>;

/// Engine side of the loopback transport.
#[async_trait]
pub trait EngineHandler: Send + Sync + 'static {
    /// Handle one request. Return `None` to model a dropped reply.
    ///
    /// `events` is the hub the transport's listeners are attached to; clone
    /// it to emit events after the reply has been sent.
    async fn handle(&self, method: &str, args: Value, events: &EventHub) -> ReplyBody;
}

/// Configuration for LoopbackTransport
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// Name for logging
    pub name: String,
    /// Per-request deadline
    pub request_timeout: Duration,
    /// Queue depth between callers and the reactor
    pub reactor_capacity: usize,
    /// Buffered events per session before slow listeners lag
    pub event_capacity: usize,
}

impl LoopbackConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            request_timeout: Duration::from_secs(10),
            reactor_capacity: 256,
            event_capacity: 256,
        }
    }

    pub fn from_config(name: &str, config: &stageconf::ChannelConfig) -> Self {
        Self {
            name: name.to_string(),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            reactor_capacity: config.reactor_capacity.max(1),
            event_capacity: config.event_capacity.max(1),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

/// One session's channel plus whatever was emitted before anyone listened.
struct SessionChannel {
    /// `None` once the engine closed the session.
    tx: Option<broadcast::Sender<EventItem>>,
    backlog: VecDeque<EventItem>,
}

impl SessionChannel {
    fn new(capacity: usize) -> Self {
        Self {
            tx: Some(broadcast::channel(capacity).0),
            backlog: VecDeque::new(),
        }
    }

    fn receiver_count(&self) -> usize {
        self.tx.as_ref().map(|tx| tx.receiver_count()).unwrap_or(0)
    }
}

/// Per-session broadcast channels.
///
/// Items emitted while a session has no listener are queued (up to the
/// channel capacity) and replayed to the next listener that attaches, so an
/// engine may announce events before the `create` reply has been read.
///
/// Cheap to clone; all clones share the same channels.
#[derive(Clone)]
pub struct EventHub {
    channels: Arc<Mutex<HashMap<SessionHandle, SessionChannel>>>,
    capacity: usize,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionHandle, SessionChannel>> {
        self.channels.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn send(&self, handle: SessionHandle, item: EventItem) -> usize {
        let mut channels = self.lock();
        let channel = channels
            .entry(handle)
            .or_insert_with(|| SessionChannel::new(self.capacity));

        if let Some(tx) = channel.tx.as_ref().filter(|tx| tx.receiver_count() > 0) {
            return tx.send(item).unwrap_or(0);
        }
        if channel.tx.is_none() {
            trace!("Session {} is closed, dropping event", handle);
            return 0;
        }
        if channel.backlog.len() >= self.capacity {
            warn!("Backlog for session {} is full, dropping oldest event", handle);
            channel.backlog.pop_front();
        }
        trace!("No listeners for session {}, queueing event", handle);
        channel.backlog.push_back(item);
        0
    }

    /// Emit a raw event record. Returns how many listeners received it; zero
    /// means it was queued for the next listener.
    pub fn emit(&self, handle: SessionHandle, record: Value) -> usize {
        self.send(handle, Ok(record))
    }

    /// Emit an error; each listener receiving it ends after yielding it.
    pub fn emit_error(&self, handle: SessionHandle, error: ChannelError) -> usize {
        self.send(handle, Err(error))
    }

    /// Close a session's channel. Listeners end once they drain what was
    /// already emitted; a queued backlog is still handed to one listener.
    pub fn close(&self, handle: SessionHandle) {
        let mut channels = self.lock();
        let Some(channel) = channels.get_mut(&handle) else {
            return;
        };
        channel.tx = None;
        if channel.backlog.is_empty() {
            channels.remove(&handle);
        }
        debug!("Closed event channel for session {}", handle);
    }

    /// Number of live listeners for a session.
    pub fn listener_count(&self, handle: SessionHandle) -> usize {
        self.lock()
            .get(&handle)
            .map(SessionChannel::receiver_count)
            .unwrap_or(0)
    }

    /// Number of items waiting for a listener.
    pub fn backlog_len(&self, handle: SessionHandle) -> usize {
        self.lock()
            .get(&handle)
            .map(|channel| channel.backlog.len())
            .unwrap_or(0)
    }

    /// Attach a new listener. It first receives any queued backlog.
    pub fn subscribe(&self, handle: SessionHandle) -> EventStream {
        let (backlog, rx) = {
            let mut channels = self.lock();
            let channel = channels
                .entry(handle)
                .or_insert_with(|| SessionChannel::new(self.capacity));
            let backlog = std::mem::take(&mut channel.backlog);
            let rx = channel.tx.as_ref().map(|tx| tx.subscribe());
            if rx.is_none() {
                channels.remove(&handle);
            }
            (backlog, rx)
        };

        Box::pin(async_stream::stream! {
            for item in backlog {
                match item {
                    Ok(record) => yield Ok(record),
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }

            let Some(mut rx) = rx else { return };
            loop {
                match rx.recv().await {
                    Ok(Ok(record)) => yield Ok(record),
                    Ok(Err(e)) => {
                        yield Err(e);
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Event listener for session {} lagged, missed {}", handle, missed);
                        yield Err(ChannelError::transport(format!(
                            "event listener lagged behind by {} events",
                            missed
                        )));
                        break;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

/// Command sent to the reactor task
enum ReactorCommand {
    Request {
        request: Bytes,
        request_id: Uuid,
        response_tx: oneshot::Sender<Result<Value, ChannelError>>,
    },
    Shutdown,
}

/// A request waiting for its reply
struct PendingRequest {
    method: String,
    response_tx: oneshot::Sender<Result<Value, ChannelError>>,
    deadline: Instant,
}

/// The reactor task - owns the pending table and dispatches to the engine.
///
/// Interleaves:
/// - accepting requests from callers
/// - routing completed replies back to their callers
/// - failing requests whose deadline passed
async fn reactor_task(
    mut cmd_rx: mpsc::Receiver<ReactorCommand>,
    handler: Arc<dyn EngineHandler>,
    events: EventHub,
    timeout: Duration,
    name: String,
) {
    let mut pending: HashMap<Uuid, PendingRequest> = HashMap::new();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Bytes>();
    let mut cleanup_interval = tokio::time::interval(Duration::from_millis(250));
    cleanup_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    debug!("{}: Reactor task started", name);

    loop {
        tokio::select! {
            biased;

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(ReactorCommand::Request { request, request_id, response_tx }) => {
                        let decoded = match WireRequest::decode(&request) {
                            Ok(r) => r,
                            Err(e) => {
                                warn!("{}: Undecodable request {}: {}", name, request_id, e);
                                let _ = response_tx.send(Err(ChannelError::transport(e.to_string())));
                                continue;
                            }
                        };

                        trace!("{}: Dispatching {} ({})", name, decoded.method, request_id);
                        pending.insert(request_id, PendingRequest {
                            method: decoded.method.clone(),
                            response_tx,
                            deadline: Instant::now() + timeout,
                        });

                        let handler = Arc::clone(&handler);
                        let events = events.clone();
                        let reply_tx = reply_tx.clone();
                        let task_name = name.clone();
                        tokio::spawn(async move {
                            let body = handler
                                .handle(&decoded.method, decoded.args.clone(), &events)
                                .await;
                            match decoded.reply(body).encode() {
                                Ok(bytes) => {
                                    let _ = reply_tx.send(bytes);
                                }
                                Err(e) => warn!("{}: Failed to encode reply: {}", task_name, e),
                            }
                        });
                    }
                    Some(ReactorCommand::Shutdown) => {
                        info!("{}: Reactor shutting down, failing {} pending requests", name, pending.len());
                        for (_, req) in pending.drain() {
                            let _ = req.response_tx.send(Err(ChannelError::transport("Reactor shutdown")));
                        }
                        break;
                    }
                    None => {
                        info!("{}: Command channel closed, reactor exiting", name);
                        break;
                    }
                }
            }

            Some(bytes) = reply_rx.recv() => {
                match WireReply::decode(&bytes) {
                    Ok(reply) => {
                        if let Some(req) = pending.remove(&reply.request_id) {
                            let result = decode_reply(reply.body);
                            if let Err(e) = &result {
                                debug!("{}: {} failed: {}", name, req.method, e);
                            }
                            let _ = req.response_tx.send(result);
                        } else {
                            debug!(
                                "{}: Discarding orphan reply for {} (not in {} pending)",
                                name, reply.request_id, pending.len()
                            );
                        }
                    }
                    Err(e) => warn!("{}: Failed to decode reply: {}", name, e),
                }
            }

            _ = cleanup_interval.tick() => {
                let now = Instant::now();
                let expired: Vec<Uuid> = pending
                    .iter()
                    .filter(|(_, req)| now > req.deadline)
                    .map(|(id, _)| *id)
                    .collect();

                for id in &expired {
                    if let Some(req) = pending.remove(id) {
                        debug!("{}: Request {} ({}) timed out", name, id, req.method);
                        let _ = req.response_tx.send(Err(ChannelError::transport("Request timed out")));
                    }
                }
            }
        }
    }

    debug!("{}: Reactor task exiting", name);
}

/// In-process transport. Must be created inside a tokio runtime.
pub struct LoopbackTransport {
    config: LoopbackConfig,
    cmd_tx: mpsc::Sender<ReactorCommand>,
    events: EventHub,
}

impl LoopbackTransport {
    /// Create the transport and spawn its reactor task.
    pub fn new(config: LoopbackConfig, handler: Arc<dyn EngineHandler>) -> Arc<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.reactor_capacity.max(1));
        let events = EventHub::new(config.event_capacity);

        let reactor_events = events.clone();
        let timeout = config.request_timeout;
        let name = config.name.clone();
        tokio::spawn(async move {
            reactor_task(cmd_rx, handler, reactor_events, timeout, name).await;
        });

        info!("{}: Loopback transport ready", config.name);

        Arc::new(Self {
            config,
            cmd_tx,
            events,
        })
    }

    /// The hub the engine emits into.
    pub fn events(&self) -> &EventHub {
        &self.events
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Gracefully shut down the reactor task, failing anything pending.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(ReactorCommand::Shutdown).await;
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn call(&self, method: &str, args: Value) -> Result<Value, ChannelError> {
        let request = WireRequest::new(method, args);
        let request_id = request.request_id;
        let bytes = request
            .encode()
            .map_err(|e| ChannelError::transport(e.to_string()))?;

        let (response_tx, response_rx) = oneshot::channel();

        trace!("{}: Sending {} ({})", self.config.name, method, request_id);
        self.cmd_tx
            .send(ReactorCommand::Request {
                request: bytes,
                request_id,
                response_tx,
            })
            .await
            .map_err(|_| ChannelError::transport("Reactor channel closed"))?;

        response_rx
            .await
            .map_err(|_| ChannelError::transport("Reactor dropped response channel"))?
    }

    fn events_for(&self, handle: SessionHandle) -> EventStream {
        self.events.subscribe(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reply;
    use futures::StreamExt;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl EngineHandler for Echo {
        async fn handle(&self, method: &str, args: Value, _events: &EventHub) -> ReplyBody {
            match method {
                "drop" => None,
                _ => reply::ok(args),
            }
        }
    }

    #[tokio::test]
    async fn call_round_trips_through_reactor() {
        let transport = LoopbackTransport::new(LoopbackConfig::new("test"), Arc::new(Echo));
        let result = transport.call("echo", json!({"a": 1})).await.unwrap();
        assert_eq!(result, json!({"a": 1}));
    }

    #[tokio::test]
    async fn dropped_reply_is_connection_failure() {
        let transport = LoopbackTransport::new(LoopbackConfig::new("test"), Arc::new(Echo));
        let err = transport.call("drop", Value::Null).await.unwrap_err();
        assert_eq!(err, ChannelError::connection_failed());
    }

    #[tokio::test]
    async fn shutdown_fails_later_calls() {
        let transport = LoopbackTransport::new(LoopbackConfig::new("test"), Arc::new(Echo));
        transport.shutdown().await;
        tokio::task::yield_now().await;
        let err = transport.call("echo", Value::Null).await.unwrap_err();
        assert!(matches!(err, ChannelError::Transport(_)));
    }

    #[tokio::test]
    async fn error_item_is_terminal_per_listener() {
        let hub = EventHub::new(16);
        let handle = SessionHandle::new(1).unwrap();
        let mut first = hub.subscribe(handle);
        let mut second = hub.subscribe(handle);

        hub.emit_error(handle, ChannelError::transport("boom"));
        assert!(matches!(first.next().await, Some(Err(_))));
        assert!(first.next().await.is_none());

        assert!(matches!(second.next().await, Some(Err(_))));
        assert!(second.next().await.is_none());

        // A listener attached after the error keeps receiving.
        let mut third = hub.subscribe(handle);
        hub.emit(handle, json!({"event": "bufferingStart"}));
        assert_eq!(
            third.next().await,
            Some(Ok(json!({"event": "bufferingStart"})))
        );
    }

    #[tokio::test]
    async fn close_ends_listeners_after_draining() {
        let hub = EventHub::new(16);
        let handle = SessionHandle::new(2).unwrap();
        let mut listener = hub.subscribe(handle);

        hub.emit(handle, json!({"event": "completed"}));
        hub.close(handle);

        assert!(matches!(listener.next().await, Some(Ok(_))));
        assert!(listener.next().await.is_none());
        assert_eq!(hub.listener_count(handle), 0);
    }

    #[tokio::test]
    async fn events_before_first_listener_are_replayed() {
        let hub = EventHub::new(16);
        let handle = SessionHandle::new(4).unwrap();

        assert_eq!(hub.emit(handle, json!({"event": "initialized", "width": 8})), 0);
        assert_eq!(hub.backlog_len(handle), 1);

        let mut listener = hub.subscribe(handle);
        assert_eq!(hub.backlog_len(handle), 0);
        hub.emit(handle, json!({"event": "bufferingStart"}));

        assert_eq!(
            listener.next().await,
            Some(Ok(json!({"event": "initialized", "width": 8})))
        );
        assert_eq!(
            listener.next().await,
            Some(Ok(json!({"event": "bufferingStart"})))
        );
    }

    #[tokio::test]
    async fn backlog_survives_close_and_then_ends() {
        let hub = EventHub::new(16);
        let handle = SessionHandle::new(5).unwrap();

        hub.emit(handle, json!({"event": "completed"}));
        hub.close(handle);
        assert_eq!(hub.emit(handle, json!({"event": "bufferingStart"})), 0);

        let mut listener = hub.subscribe(handle);
        assert_eq!(listener.next().await, Some(Ok(json!({"event": "completed"}))));
        assert!(listener.next().await.is_none());
    }

    #[tokio::test]
    async fn backlog_keeps_newest_items() {
        let hub = EventHub::new(2);
        let handle = SessionHandle::new(6).unwrap();
        for n in 0..3 {
            hub.emit(handle, json!({"event": "bufferingUpdate", "n": n}));
        }

        let mut listener = hub.subscribe(handle);
        assert_eq!(
            listener.next().await,
            Some(Ok(json!({"event": "bufferingUpdate", "n": 1})))
        );
        assert_eq!(
            listener.next().await,
            Some(Ok(json!({"event": "bufferingUpdate", "n": 2})))
        );
    }

    #[tokio::test]
    async fn lagging_listener_gets_terminal_error() {
        let hub = EventHub::new(1);
        let handle = SessionHandle::new(3).unwrap();
        let mut listener = hub.subscribe(handle);

        hub.emit(handle, json!({"event": "bufferingStart"}));
        hub.emit(handle, json!({"event": "bufferingEnd"}));

        assert!(matches!(listener.next().await, Some(Err(ChannelError::Transport(_)))));
        assert!(listener.next().await.is_none());
    }
}
