//! Errors returned by session operations.

use stageproto::{ChannelError, RemoteError};

/// Failure of a session operation.
///
/// Direct-call failures carry the channel error untouched so callers can
/// match on the engine's own code.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    /// A command failed on the channel or was rejected by the engine.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// The session's event stream reported an error.
    #[error("session stream error: {0}")]
    Stream(String),

    /// `create()` was called on a controller that already has (or is
    /// creating) a session.
    #[error("a session was already created on this controller")]
    AlreadyCreated,

    /// The controller was disposed before the operation could finish.
    #[error("session controller was disposed")]
    Disposed,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The engine was replaced underneath the session.
    #[error("engine was replaced; the session no longer exists")]
    EngineReplaced,
}

impl SessionError {
    /// The engine-reported error, if this is one.
    pub fn as_remote(&self) -> Option<&RemoteError> {
        match self {
            SessionError::Channel(e) => e.as_remote(),
            _ => None,
        }
    }

    /// Text suitable for `SessionState::error_description`.
    pub fn description(&self) -> String {
        match self {
            SessionError::Channel(e) => e.description(),
            SessionError::Stream(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_errors_stay_reachable() {
        let err: SessionError = ChannelError::from(RemoteError::new("E1", "busy")).into();
        let remote = err.as_remote().expect("remote");
        assert_eq!(remote.code, "E1");
        assert_eq!(remote.message.as_deref(), Some("busy"));
        assert_eq!(err.description(), "E1: busy");
    }

    #[test]
    fn stream_description_is_bare_message() {
        assert_eq!(SessionError::Stream("decoder died".into()).description(), "decoder died");
        assert!(SessionError::Disposed.as_remote().is_none());
    }
}
