//! stagehand - Session controller for remote capture and playback engines
//!
//! A `SessionController` owns one session inside an opaque engine that it
//! reaches only through a `stageproto::Transport`. It turns the engine's
//! request/reply channel and event stream into:
//!
//! - async commands (`create`, `play`, `pause`, `seek_to`, `dispose`, ...)
//! - an immutable `SessionState` snapshot published on every change
//! - a detection callback for capture sessions, with duplicate suppression
//!
//! Controllers that share an engine share an `EngineContext`, which re-runs
//! engine initialization exactly once whenever the engine is replaced.
//!
//! ```ignore
//! let engine = EngineContext::new();
//! let controller = SessionController::new(transport, engine, SessionOptions::playback(source));
//! controller.create().await?;
//! controller.play().await?;
//! let mut updates = controller.subscribe();
//! while let Some(state) = updates.changed().await {
//!     println!("{:?}", state.position);
//! }
//! ```

pub mod controller;
pub mod detection;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod options;
pub mod protocol;
pub mod sim;
pub mod state;

pub use controller::{SessionController, SessionPhase};
pub use detection::DetectionFilter;
pub use engine::{EngineContext, EngineIdentity};
pub use error::SessionError;
pub use lifecycle::{AppLifecycle, HostLifecycle, LifecycleObserver};
pub use options::{DetectionCallback, DuplicatePolicy, ReadinessPolicy, SessionOptions};
pub use protocol::{CommandProtocol, CreatedSession};
pub use sim::{SimConfig, SimulatedEngine};
pub use state::{SessionState, Size, StateSubscription};

pub use stageproto::{DataSource, DetectionEvent, SessionHandle};
