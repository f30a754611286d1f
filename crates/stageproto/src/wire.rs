//! STAGE01 wire framing.
//!
//! Requests and replies are JSON records tagged with a protocol version and
//! a request id. The id lets replies come back in any order: the receiving
//! side routes each reply to whoever is waiting on that id.
//!
//! ```text
//! request: {"version": "STAGE01", "requestId": "<uuid>", "method": "create", "args": {...}}
//! reply:   {"version": "STAGE01", "requestId": "<uuid>", "body": {"result": ...} | null}
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::reply::ReplyBody;

/// Protocol version - bump on breaking changes
pub const PROTOCOL_VERSION: &str = "STAGE01";

/// Errors while encoding or decoding a wire record
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("Invalid protocol version: expected STAGE01, got {0:?}")]
    InvalidProtocol(String),
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRequest {
    pub version: String,
    pub request_id: Uuid,
    pub method: String,
    #[serde(default)]
    pub args: Value,
}

impl WireRequest {
    pub fn new(method: impl Into<String>, args: Value) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            request_id: Uuid::new_v4(),
            method: method.into(),
            args,
        }
    }

    pub fn encode(&self) -> Result<Bytes, WireError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let request: WireRequest = serde_json::from_slice(bytes)?;
        check_version(&request.version)?;
        Ok(request)
    }

    /// Reply to this request carrying `body`.
    pub fn reply(&self, body: ReplyBody) -> WireReply {
        WireReply {
            version: PROTOCOL_VERSION.to_string(),
            request_id: self.request_id,
            body,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireReply {
    pub version: String,
    pub request_id: Uuid,
    #[serde(default)]
    pub body: Option<Map<String, Value>>,
}

impl WireReply {
    pub fn encode(&self) -> Result<Bytes, WireError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let reply: WireReply = serde_json::from_slice(bytes)?;
        check_version(&reply.version)?;
        Ok(reply)
    }
}

fn check_version(version: &str) -> Result<(), WireError> {
    if version == PROTOCOL_VERSION {
        Ok(())
    } else {
        Err(WireError::InvalidProtocol(version.to_string()))
    }
}
