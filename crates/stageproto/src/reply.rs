//! Reply records and the rules for turning them into call results.

use serde_json::{Map, Value};

use crate::error::{ChannelError, RemoteError};

/// Key carrying the return value of a successful call.
pub const RESULT_KEY: &str = "result";

/// Key carrying an engine-reported error.
pub const ERROR_KEY: &str = "error";

/// Reply body as produced by the engine: `None` when no reply was produced.
pub type ReplyBody = Option<Map<String, Value>>;

/// Apply the reply convention to a raw reply body.
///
/// - `None` → `ChannelError::Transport` (connection could not be established)
/// - `{"error": {...}}` → `ChannelError::Remote`, fields passed through
/// - otherwise the value under `result`, or `Value::Null` for void calls
pub fn decode_reply(body: ReplyBody) -> Result<Value, ChannelError> {
    let mut body = body.ok_or_else(ChannelError::connection_failed)?;

    if let Some(error) = body.remove(ERROR_KEY) {
        if !error.is_null() {
            return Err(ChannelError::Remote(remote_error_from(error)));
        }
    }

    Ok(body.remove(RESULT_KEY).unwrap_or(Value::Null))
}

/// Lenient conversion of an `error` object: numeric codes are stringified,
/// a bare string is treated as the code.
fn remote_error_from(error: Value) -> RemoteError {
    match error {
        Value::Object(mut fields) => {
            let code = match fields.remove("code") {
                Some(Value::String(s)) => s,
                Some(Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            };
            let message = match fields.remove("message") {
                Some(Value::String(s)) => Some(s),
                Some(Value::Null) | None => None,
                Some(other) => Some(other.to_string()),
            };
            let details = fields.remove("details").filter(|d| !d.is_null());
            RemoteError {
                code,
                message,
                details,
            }
        }
        Value::String(code) => RemoteError {
            code,
            message: None,
            details: None,
        },
        other => RemoteError {
            code: other.to_string(),
            message: None,
            details: None,
        },
    }
}

/// Successful reply carrying `value`.
pub fn ok(value: Value) -> ReplyBody {
    let mut body = Map::new();
    body.insert(RESULT_KEY.to_string(), value);
    Some(body)
}

/// Successful reply for a void call.
pub fn ok_void() -> ReplyBody {
    Some(Map::new())
}

/// Error reply.
pub fn error(err: &RemoteError) -> ReplyBody {
    let mut fields = Map::new();
    fields.insert("code".to_string(), Value::String(err.code.clone()));
    if let Some(message) = &err.message {
        fields.insert("message".to_string(), Value::String(message.clone()));
    }
    if let Some(details) = &err.details {
        fields.insert("details".to_string(), details.clone());
    }

    let mut body = Map::new();
    body.insert(ERROR_KEY.to_string(), Value::Object(fields));
    Some(body)
}
