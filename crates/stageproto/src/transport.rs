//! The async call interface the session controller talks to.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;

use crate::{ChannelError, SessionHandle};

/// Stream of raw event records for one session.
///
/// An `Err` item is terminal for that listener only; the stream ends after
/// yielding it.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Value, ChannelError>> + Send + 'static>>;

/// Bidirectional request/response channel plus per-session event broadcast.
///
/// Implementations must allow many calls in flight at once and may complete
/// them in any order.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Issue one request and wait for its reply.
    async fn call(&self, method: &str, args: Value) -> Result<Value, ChannelError>;

    /// Subscribe to a session's events. Every call returns an independent
    /// listener; all listeners see the same records in emission order.
    fn events_for(&self, handle: SessionHandle) -> EventStream;
}
