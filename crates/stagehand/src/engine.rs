//! Engine identity tracking.
//!
//! The engine can be torn down and replaced underneath running controllers
//! (a host restart, a hot reload). Each replacement gets a new identity.
//! Controllers share one `EngineContext`; before any session-affecting call
//! they run [`EngineContext::ensure_current`], which re-issues `init` exactly
//! once per new identity no matter how many controllers race on it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use stageproto::ChannelError;
use tokio::sync::Mutex;
use tracing::info;

use crate::protocol::CommandProtocol;

/// Which incarnation of the engine a session belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EngineIdentity(u64);

impl std::fmt::Display for EngineIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "engine#{}", self.0)
    }
}

/// Shared between every controller talking to the same engine.
#[derive(Debug)]
pub struct EngineContext {
    live: AtomicU64,
    /// Identity the last successful `init` was issued for. Held across the
    /// `init` call so concurrent callers wait rather than re-issue it.
    initialized: Mutex<Option<EngineIdentity>>,
}

impl EngineContext {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            live: AtomicU64::new(0),
            initialized: Mutex::new(None),
        })
    }

    /// The identity of the engine currently running.
    pub fn live(&self) -> EngineIdentity {
        EngineIdentity(self.live.load(Ordering::Acquire))
    }

    /// Record that the engine was replaced. Sessions created earlier are gone.
    pub fn replace_engine(&self) -> EngineIdentity {
        let next = EngineIdentity(self.live.fetch_add(1, Ordering::AcqRel) + 1);
        info!("Engine replaced, now {}", next);
        next
    }

    /// Issue `init` if the live engine hasn't seen it yet.
    ///
    /// Returns the identity that is now initialized. A failed `init` leaves
    /// the cache untouched so the next call retries.
    pub async fn ensure_current(
        &self,
        protocol: &CommandProtocol,
    ) -> Result<EngineIdentity, ChannelError> {
        let mut initialized = self.initialized.lock().await;
        let live = self.live();
        if *initialized == Some(live) {
            return Ok(live);
        }

        info!("Initializing {}", live);
        protocol.initialize_engine().await?;
        *initialized = Some(live);
        Ok(live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream;
    use serde_json::Value;
    use stageproto::{EventStream, SessionHandle, Transport};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingInit {
        inits: AtomicUsize,
        fail: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl Transport for CountingInit {
        async fn call(&self, method: &str, _args: Value) -> Result<Value, ChannelError> {
            assert_eq!(method, "init");
            tokio::task::yield_now().await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(ChannelError::connection_failed());
            }
            self.inits.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        }

        fn events_for(&self, _handle: SessionHandle) -> EventStream {
            Box::pin(stream::empty())
        }
    }

    #[tokio::test]
    async fn init_once_per_identity() {
        let transport = Arc::new(CountingInit::default());
        let protocol = CommandProtocol::new(transport.clone());
        let engine = EngineContext::new();

        let first = engine.ensure_current(&protocol).await.unwrap();
        engine.ensure_current(&protocol).await.unwrap();
        assert_eq!(transport.inits.load(Ordering::SeqCst), 1);

        let replaced = engine.replace_engine();
        assert_ne!(first, replaced);
        let (a, b) = tokio::join!(
            engine.ensure_current(&protocol),
            engine.ensure_current(&protocol)
        );
        assert_eq!(a.unwrap(), replaced);
        assert_eq!(b.unwrap(), replaced);
        assert_eq!(transport.inits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_init_is_retried() {
        let transport = Arc::new(CountingInit::default());
        transport.fail.store(true, Ordering::SeqCst);
        let protocol = CommandProtocol::new(transport.clone());
        let engine = EngineContext::new();

        assert!(engine.ensure_current(&protocol).await.is_err());

        transport.fail.store(false, Ordering::SeqCst);
        engine.ensure_current(&protocol).await.unwrap();
        assert_eq!(transport.inits.load(Ordering::SeqCst), 1);
    }
}
