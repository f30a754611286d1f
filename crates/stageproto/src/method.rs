//! The fixed request set and typed argument records.
//!
//! Wire names are camelCase to match what native engines expect; Rust names
//! follow the operation they perform.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::SessionHandle;

/// Every request a controller may issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Engine-wide (re)initialization. Invalidates all existing sessions.
    InitializeEngine,
    CreateSession,
    DisposeSession,
    SetMixingPolicy,
    StartPlayback,
    PausePlayback,
    QueryPosition,
    SetLooping,
    SetVolume,
    SetPlaybackSpeed,
    SeekTo,
}

impl Method {
    pub const ALL: [Method; 11] = [
        Method::InitializeEngine,
        Method::CreateSession,
        Method::DisposeSession,
        Method::SetMixingPolicy,
        Method::StartPlayback,
        Method::PausePlayback,
        Method::QueryPosition,
        Method::SetLooping,
        Method::SetVolume,
        Method::SetPlaybackSpeed,
        Method::SeekTo,
    ];

    /// Wire name of the request.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::InitializeEngine => "init",
            Method::CreateSession => "create",
            Method::DisposeSession => "dispose",
            Method::SetMixingPolicy => "setMixWithOthers",
            Method::StartPlayback => "play",
            Method::PausePlayback => "pause",
            Method::QueryPosition => "position",
            Method::SetLooping => "setLooping",
            Method::SetVolume => "setVolume",
            Method::SetPlaybackSpeed => "setPlaybackSpeed",
            Method::SeekTo => "seekTo",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.as_str() == name)
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Streaming format hint for network sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatHint {
    /// Smooth Streaming
    Ss,
    Hls,
    Dash,
    Other,
}

/// What the engine should open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "sourceType",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum DataSource {
    /// Bundled application asset, optionally from another package.
    Asset {
        asset: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        package: Option<String>,
    },
    /// Remote media.
    Network {
        uri: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        format_hint: Option<FormatHint>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        http_headers: BTreeMap<String, String>,
    },
    /// Local file path.
    File { path: String },
    /// Platform content URI.
    ContentUri { uri: String },
    /// Live capture device. `None` selects the engine default.
    Device {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        camera: Option<String>,
    },
}

impl DataSource {
    pub fn network(uri: impl Into<String>) -> Self {
        Self::Network {
            uri: uri.into(),
            format_hint: None,
            http_headers: BTreeMap::new(),
        }
    }

    pub fn asset(asset: impl Into<String>) -> Self {
        Self::Asset {
            asset: asset.into(),
            package: None,
        }
    }

    pub fn file(path: impl Into<String>) -> Self {
        Self::File { path: path.into() }
    }

    pub fn device() -> Self {
        Self::Device { camera: None }
    }

    /// Short kind label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            DataSource::Asset { .. } => "asset",
            DataSource::Network { .. } => "network",
            DataSource::File { .. } => "file",
            DataSource::ContentUri { .. } => "contentUri",
            DataSource::Device { .. } => "device",
        }
    }

    /// Locator for logging (URI, path, asset key, or camera id).
    pub fn locator(&self) -> &str {
        match self {
            DataSource::Asset { asset, .. } => asset,
            DataSource::Network { uri, .. } | DataSource::ContentUri { uri } => uri,
            DataSource::File { path } => path,
            DataSource::Device { camera } => camera.as_deref().unwrap_or("default"),
        }
    }
}

/// Args for requests that only name a session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandleArgs {
    pub texture_id: SessionHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MixingArgs {
    pub mix_with_others: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopingArgs {
    pub texture_id: SessionHandle,
    pub looping: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeArgs {
    pub texture_id: SessionHandle,
    pub volume: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeedArgs {
    pub texture_id: SessionHandle,
    pub speed: f64,
}

/// Seek target in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeekArgs {
    pub texture_id: SessionHandle,
    pub position: u64,
}

/// Pull a session handle out of a `create` result.
///
/// Engines reply either `{"textureId": n}` or a bare integer.
pub fn parse_handle(result: &Value) -> Option<SessionHandle> {
    let id = match result {
        Value::Object(fields) => fields.get("textureId")?.as_i64()?,
        other => other.as_i64()?,
    };
    SessionHandle::new(id)
}

/// Pull a millisecond position out of a `position` result.
///
/// Engines reply either `{"position": ms}` or a bare integer. Negative
/// positions clamp to zero.
pub fn parse_position_ms(result: &Value) -> Option<u64> {
    let ms = match result {
        Value::Object(fields) => fields.get("position")?.as_i64()?,
        other => other.as_i64()?,
    };
    Some(ms.max(0) as u64)
}
