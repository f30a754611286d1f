#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use stageproto::{LoopbackConfig, LoopbackTransport, SessionEvent};
use stagehand::{
    DataSource, EngineContext, SessionController, SessionHandle, SessionOptions, SimConfig,
    SimulatedEngine,
};

/// A simulated engine behind a loopback transport, plus a shared engine
/// context for the controllers built from it.
pub struct Harness {
    pub engine: Arc<SimulatedEngine>,
    pub transport: Arc<LoopbackTransport>,
    pub context: Arc<EngineContext>,
}

impl Harness {
    pub fn new(config: SimConfig) -> Self {
        let engine = SimulatedEngine::new(config);
        let transport = LoopbackTransport::new(LoopbackConfig::new("test"), engine.clone());
        Self {
            engine,
            transport,
            context: EngineContext::new(),
        }
    }

    /// Engine that never announces readiness on its own.
    pub fn silent() -> Self {
        Self::new(SimConfig {
            announce_ready: false,
            ..SimConfig::default()
        })
    }

    pub fn controller(&self, options: SessionOptions) -> Arc<SessionController> {
        SessionController::new(self.transport.clone(), self.context.clone(), options)
    }

    pub fn playback(&self) -> Arc<SessionController> {
        self.controller(SessionOptions::playback(source()))
    }

    pub fn emit(&self, handle: SessionHandle, event: SessionEvent) {
        self.emit_record(handle, event.to_record());
    }

    pub fn emit_record(&self, handle: SessionHandle, record: Value) {
        self.transport.events().emit(handle, record);
    }

    pub fn methods(&self) -> Vec<String> {
        self.engine.methods()
    }
}

pub fn source() -> DataSource {
    DataSource::network("https://example.com/clip.mp4")
}

pub fn initialized(width: f64, height: f64, duration_ms: u64) -> SessionEvent {
    SessionEvent::Initialized {
        width,
        height,
        duration: duration_ms,
        rotation_correction: 0,
    }
}

/// Let spawned tasks run. Under a paused clock this also advances time by
/// `ms`.
pub async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
