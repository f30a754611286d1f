//! Typed request wrappers over a `Transport`.
//!
//! One method per engine request. Remote errors come back untouched; a
//! malformed `result` is reported as a transport error naming the method.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use stageproto::method::{
    parse_handle, parse_position_ms, HandleArgs, LoopingArgs, MixingArgs, SeekArgs, SpeedArgs,
    VolumeArgs,
};
use stageproto::{ChannelError, DataSource, EventStream, Method, SessionHandle, Transport};
use tracing::{debug, trace};

use crate::state::Size;

/// Reply to `create`.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedSession {
    pub handle: SessionHandle,
    /// Dimensions, when the engine reports them up front.
    pub size: Option<Size>,
}

/// Issues typed engine requests over a shared transport.
#[derive(Clone)]
pub struct CommandProtocol {
    transport: Arc<dyn Transport>,
}

impl CommandProtocol {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    async fn invoke<A: Serialize>(&self, method: Method, args: &A) -> Result<Value, ChannelError> {
        let args = serde_json::to_value(args).map_err(|e| {
            ChannelError::transport(format!("failed to encode {} args: {}", method, e))
        })?;
        trace!("-> {} {}", method, args);
        let result = self.transport.call(method.as_str(), args).await;
        if let Err(e) = &result {
            debug!("<- {} failed: {}", method, e);
        }
        result
    }

    async fn invoke_void<A: Serialize>(&self, method: Method, args: &A) -> Result<(), ChannelError> {
        self.invoke(method, args).await.map(|_| ())
    }

    /// Engine-wide (re)initialization.
    pub async fn initialize_engine(&self) -> Result<(), ChannelError> {
        self.invoke_void(Method::InitializeEngine, &json!({})).await
    }

    pub async fn create_session(&self, source: &DataSource) -> Result<CreatedSession, ChannelError> {
        let result = self.invoke(Method::CreateSession, source).await?;
        let handle = parse_handle(&result).ok_or_else(|| {
            ChannelError::transport(format!("{} returned no session handle", Method::CreateSession))
        })?;
        Ok(CreatedSession {
            handle,
            size: parse_size(&result),
        })
    }

    pub async fn dispose_session(&self, handle: SessionHandle) -> Result<(), ChannelError> {
        self.invoke_void(Method::DisposeSession, &HandleArgs { texture_id: handle })
            .await
    }

    pub async fn set_mixing_policy(&self, mix_with_others: bool) -> Result<(), ChannelError> {
        self.invoke_void(Method::SetMixingPolicy, &MixingArgs { mix_with_others })
            .await
    }

    pub async fn start_playback(&self, handle: SessionHandle) -> Result<(), ChannelError> {
        self.invoke_void(Method::StartPlayback, &HandleArgs { texture_id: handle })
            .await
    }

    pub async fn pause_playback(&self, handle: SessionHandle) -> Result<(), ChannelError> {
        self.invoke_void(Method::PausePlayback, &HandleArgs { texture_id: handle })
            .await
    }

    pub async fn query_position(&self, handle: SessionHandle) -> Result<Duration, ChannelError> {
        let result = self
            .invoke(Method::QueryPosition, &HandleArgs { texture_id: handle })
            .await?;
        parse_position_ms(&result)
            .map(Duration::from_millis)
            .ok_or_else(|| {
                ChannelError::transport(format!("{} returned no position", Method::QueryPosition))
            })
    }

    pub async fn set_looping(&self, handle: SessionHandle, looping: bool) -> Result<(), ChannelError> {
        self.invoke_void(
            Method::SetLooping,
            &LoopingArgs {
                texture_id: handle,
                looping,
            },
        )
        .await
    }

    pub async fn set_volume(&self, handle: SessionHandle, volume: f64) -> Result<(), ChannelError> {
        self.invoke_void(
            Method::SetVolume,
            &VolumeArgs {
                texture_id: handle,
                volume,
            },
        )
        .await
    }

    pub async fn set_playback_speed(
        &self,
        handle: SessionHandle,
        speed: f64,
    ) -> Result<(), ChannelError> {
        self.invoke_void(
            Method::SetPlaybackSpeed,
            &SpeedArgs {
                texture_id: handle,
                speed,
            },
        )
        .await
    }

    pub async fn seek_to(&self, handle: SessionHandle, position: Duration) -> Result<(), ChannelError> {
        self.invoke_void(
            Method::SeekTo,
            &SeekArgs {
                texture_id: handle,
                position: position.as_millis() as u64,
            },
        )
        .await
    }

    /// Attach a fresh listener to a session's events.
    pub fn events_for(&self, handle: SessionHandle) -> EventStream {
        self.transport.events_for(handle)
    }
}

fn parse_size(result: &Value) -> Option<Size> {
    let width = result.get("width")?.as_f64()?;
    let height = result.get("height")?.as_f64()?;
    Some(Size::new(width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream;
    use std::sync::Mutex;

    /// Records every call and answers from a fixed table.
    struct Scripted {
        calls: Mutex<Vec<(String, Value)>>,
        reply: Box<dyn Fn(&str) -> Result<Value, ChannelError> + Send + Sync>,
    }

    #[async_trait]
    impl Transport for Scripted {
        async fn call(&self, method: &str, args: Value) -> Result<Value, ChannelError> {
            self.calls.lock().unwrap().push((method.to_string(), args));
            (self.reply)(method)
        }

        fn events_for(&self, _handle: SessionHandle) -> EventStream {
            Box::pin(stream::empty())
        }
    }

    fn scripted(
        reply: impl Fn(&str) -> Result<Value, ChannelError> + Send + Sync + 'static,
    ) -> Arc<Scripted> {
        Arc::new(Scripted {
            calls: Mutex::new(Vec::new()),
            reply: Box::new(reply),
        })
    }

    #[tokio::test]
    async fn create_sends_source_and_parses_handle() {
        let transport = scripted(|_| Ok(json!({"textureId": 3, "width": 640.0, "height": 480.0})));
        let protocol = CommandProtocol::new(transport.clone());

        let created = protocol
            .create_session(&DataSource::network("https://example.com/v.mp4"))
            .await
            .unwrap();
        assert_eq!(created.handle.id(), 3);
        assert_eq!(created.size, Some(Size::new(640.0, 480.0)));

        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls[0].0, "create");
        assert_eq!(calls[0].1["sourceType"], "network");
        assert_eq!(calls[0].1["uri"], "https://example.com/v.mp4");
    }

    #[tokio::test]
    async fn create_without_handle_is_transport_error() {
        let protocol = CommandProtocol::new(scripted(|_| Ok(Value::Null)));
        let err = protocol.create_session(&DataSource::device()).await.unwrap_err();
        assert!(matches!(err, ChannelError::Transport(_)));
    }

    #[tokio::test]
    async fn handle_args_use_wire_names() {
        let transport = scripted(|_| Ok(Value::Null));
        let protocol = CommandProtocol::new(transport.clone());
        let handle = SessionHandle::new(7).unwrap();

        protocol.start_playback(handle).await.unwrap();
        protocol.seek_to(handle, Duration::from_millis(1500)).await.unwrap();
        protocol.set_mixing_policy(true).await.unwrap();

        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls[0], ("play".to_string(), json!({"textureId": 7})));
        assert_eq!(
            calls[1],
            ("seekTo".to_string(), json!({"textureId": 7, "position": 1500}))
        );
        assert_eq!(
            calls[2],
            ("setMixWithOthers".to_string(), json!({"mixWithOthers": true}))
        );
    }

    #[tokio::test]
    async fn position_accepts_bare_millis() {
        let protocol = CommandProtocol::new(scripted(|_| Ok(json!(2500))));
        let position = protocol
            .query_position(SessionHandle::new(1).unwrap())
            .await
            .unwrap();
        assert_eq!(position, Duration::from_millis(2500));
    }

    #[tokio::test]
    async fn remote_errors_pass_through() {
        let protocol = CommandProtocol::new(scripted(|_| {
            Err(stageproto::RemoteError::new("E1", "busy").into())
        }));
        let err = protocol
            .pause_playback(SessionHandle::new(1).unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.as_remote().map(|r| r.code.as_str()), Some("E1"));
    }
}
