//! Errors surfaced by a transport call.
//!
//! Remote errors are passed through exactly as the engine reported them;
//! nothing in this crate renumbers or rewrites codes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message used when a request gets no reply record at all.
pub const CONNECTION_FAILED: &str = "Unable to establish connection on channel.";

/// Failure of a single request/response exchange.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChannelError {
    /// The channel could not carry the request (no reply, reactor gone, timeout).
    #[error("transport error: {0}")]
    Transport(String),

    /// The engine replied with an error record.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),
}

impl ChannelError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn connection_failed() -> Self {
        Self::Transport(CONNECTION_FAILED.to_string())
    }

    /// The remote error, if this is one.
    pub fn as_remote(&self) -> Option<&RemoteError> {
        match self {
            Self::Remote(e) => Some(e),
            Self::Transport(_) => None,
        }
    }

    /// Human-readable description for the session snapshot.
    pub fn description(&self) -> String {
        match self {
            Self::Transport(msg) => msg.clone(),
            Self::Remote(e) => e.to_string(),
        }
    }
}

/// Error record reported by the engine inside an otherwise successful reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{}", self.describe())]
pub struct RemoteError {
    pub code: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub details: Option<Value>,
}

impl RemoteError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: Some(message.into()),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    fn describe(&self) -> String {
        match &self.message {
            Some(message) => format!("{}: {}", self.code, message),
            None => self.code.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_error_display_includes_code_and_message() {
        let err = RemoteError::new("E1", "busy");
        assert_eq!(err.to_string(), "E1: busy");

        let bare = RemoteError {
            code: "E2".to_string(),
            message: None,
            details: None,
        };
        assert_eq!(bare.to_string(), "E2");
    }

    #[test]
    fn description_is_the_message_not_the_variant() {
        assert_eq!(
            ChannelError::connection_failed().description(),
            CONNECTION_FAILED
        );
        let remote: ChannelError = RemoteError::new("E1", "busy").into();
        assert_eq!(remote.description(), "E1: busy");
        assert_eq!(remote.as_remote().map(|e| e.code.as_str()), Some("E1"));
    }
}
