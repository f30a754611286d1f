//! stageproto - Command/event channel protocol for stagehand sessions
//!
//! This crate defines everything that crosses the boundary between a session
//! controller and the engine that actually captures or decodes media:
//!
//! - `method` - the fixed request set and its typed argument records
//! - `reply` - the reply convention (`result` / `error` / absent)
//! - `event` - per-session event records keyed by an `event` discriminant
//! - `wire` - JSON framing with request ids for correlation
//! - `transport` - the async `Transport` trait the controller talks to
//! - `loopback` - an in-process transport driving an `EngineHandler`
//!
//! ## Reply Convention
//!
//! Every request gets exactly one reply record:
//! - no record at all means the channel could not be established
//! - a record with an `error` object carries `code` / `message` / `details`
//! - anything else carries its return value under `result` (absent for void)
//!
//! The controller sees these as `ChannelError::Transport`,
//! `ChannelError::Remote`, and `Ok(value)` respectively.

pub mod error;
pub mod event;
pub mod method;
pub mod reply;
pub mod transport;
pub mod wire;

#[cfg(feature = "loopback")]
pub mod loopback;

pub use error::{ChannelError, RemoteError, CONNECTION_FAILED};
pub use event::{DetectionEvent, DurationRange, SessionEvent};
pub use method::{DataSource, FormatHint, Method};
pub use transport::{EventStream, Transport};
pub use wire::{WireError, WireReply, WireRequest, PROTOCOL_VERSION};

#[cfg(feature = "loopback")]
pub use loopback::{EngineHandler, EventHub, LoopbackConfig, LoopbackTransport};

use serde::{Deserialize, Serialize};

/// Opaque engine-side name for one active session.
///
/// The engine allocates it in its `create` reply. The numeric value may be
/// reused by the engine after `dispose` completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionHandle(i64);

impl SessionHandle {
    /// Sentinel for "no session yet".
    pub const UNINITIALIZED: SessionHandle = SessionHandle(-1);

    /// Wrap an engine-issued id. Negative ids are not valid handles.
    pub fn new(id: i64) -> Option<Self> {
        (id >= 0).then_some(Self(id))
    }

    pub fn id(&self) -> i64 {
        self.0
    }

    pub fn is_valid(&self) -> bool {
        self.0 >= 0
    }
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::UNINITIALIZED
    }
}

impl std::fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_ids_are_not_handles() {
        assert_eq!(SessionHandle::new(-1), None);
        assert_eq!(SessionHandle::new(0).map(|h| h.id()), Some(0));
        assert!(!SessionHandle::UNINITIALIZED.is_valid());
        assert_eq!(SessionHandle::default(), SessionHandle::UNINITIALIZED);
    }

    #[test]
    fn handle_serializes_as_bare_integer() {
        let handle = SessionHandle::new(3).unwrap();
        assert_eq!(serde_json::to_value(handle).unwrap(), serde_json::json!(3));
    }
}
