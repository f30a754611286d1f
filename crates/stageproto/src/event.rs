//! Per-session event records.
//!
//! Each record carries an `event` discriminant plus kind-specific fields.
//! Unrecognized discriminants decode to `SessionEvent::Unknown` so newer
//! engines never break older controllers.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A half-open span of buffered media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurationRange {
    pub start: Duration,
    pub end: Duration,
}

impl DurationRange {
    pub fn new(start: Duration, end: Duration) -> Self {
        Self { start, end }
    }

    /// Build from a `[start_ms, end_ms]` pair.
    pub fn from_millis(pair: [u64; 2]) -> Self {
        Self {
            start: Duration::from_millis(pair[0]),
            end: Duration::from_millis(pair[1]),
        }
    }

    /// Fraction of `duration` where this range starts, in `[0, 1]`.
    pub fn start_fraction(&self, duration: Duration) -> f64 {
        fraction(self.start, duration)
    }

    /// Fraction of `duration` where this range ends, in `[0, 1]`.
    pub fn end_fraction(&self, duration: Duration) -> f64 {
        fraction(self.end, duration)
    }
}

fn fraction(at: Duration, duration: Duration) -> f64 {
    if duration.is_zero() {
        return 0.0;
    }
    (at.as_secs_f64() / duration.as_secs_f64()).clamp(0.0, 1.0)
}

/// A scanned-code (or similar) detection reported by a capture session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub payload: String,
    pub kind: String,
    pub quality: i64,
}

impl DetectionEvent {
    /// Whether `other` reports the same thing (quality is ignored).
    pub fn same_detection(&self, other: &DetectionEvent) -> bool {
        self.payload == other.payload && self.kind == other.kind
    }
}

/// Millisecond counts arrive as integers from most engines and as floats
/// from some. Negative and non-finite values read as zero.
fn lenient_millis<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let millis = f64::deserialize(deserializer)?;
    if millis.is_finite() && millis > 0.0 {
        Ok(millis.round() as u64)
    } else {
        Ok(0)
    }
}

/// Decoded session event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SessionEvent {
    /// Session is ready. Duration is in milliseconds on the wire.
    Initialized {
        #[serde(default)]
        width: f64,
        #[serde(default)]
        height: f64,
        #[serde(default, deserialize_with = "lenient_millis")]
        duration: u64,
        #[serde(default)]
        rotation_correction: i32,
    },
    Completed,
    BufferingStart,
    BufferingEnd,
    /// Buffered ranges as `[start_ms, end_ms]` pairs.
    BufferingUpdate {
        #[serde(default)]
        values: Vec<[u64; 2]>,
    },
    IsPlayingStateUpdate { is_playing: bool },
    Detection {
        payload: String,
        #[serde(default)]
        kind: String,
        #[serde(default)]
        quality: i64,
    },
    #[serde(other)]
    Unknown,
}

impl SessionEvent {
    /// Decode a raw event record.
    ///
    /// Fails only when a *known* kind is missing a required field; unknown
    /// kinds always succeed.
    pub fn from_record(record: &Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(record)
    }

    /// Wire discriminant of a raw record, for logging.
    pub fn kind_of(record: &Value) -> &str {
        record.get("event").and_then(Value::as_str).unwrap_or("")
    }

    pub fn to_record(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn buffered_ranges(values: &[[u64; 2]]) -> Vec<DurationRange> {
        values.iter().copied().map(DurationRange::from_millis).collect()
    }

    pub fn detection(&self) -> Option<DetectionEvent> {
        match self {
            SessionEvent::Detection {
                payload,
                kind,
                quality,
            } => Some(DetectionEvent {
                payload: payload.clone(),
                kind: kind.clone(),
                quality: *quality,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn initialized_record() {
        let event = SessionEvent::from_record(&json!({
            "event": "initialized",
            "width": 1296,
            "height": 972,
            "rotationCorrection": 0
        }))
        .unwrap();

        assert_eq!(
            event,
            SessionEvent::Initialized {
                width: 1296.0,
                height: 972.0,
                duration: 0,
                rotation_correction: 0,
            }
        );
    }

    #[test]
    fn initialized_accepts_fractional_duration() {
        let event = SessionEvent::from_record(&json!({
            "event": "initialized",
            "width": 640,
            "height": 480,
            "duration": 1500.4
        }))
        .unwrap();

        let SessionEvent::Initialized { duration, .. } = event else {
            panic!("expected initialized");
        };
        assert_eq!(duration, 1500);
    }

    #[test]
    fn initialized_rejects_non_numeric_duration() {
        assert!(SessionEvent::from_record(&json!({
            "event": "initialized",
            "duration": "long"
        }))
        .is_err());
    }

    #[test]
    fn unknown_kind_is_accepted() {
        let event = SessionEvent::from_record(&json!({"event": "torchChanged", "on": true})).unwrap();
        assert_eq!(event, SessionEvent::Unknown);
        assert_eq!(
            SessionEvent::kind_of(&json!({"event": "torchChanged"})),
            "torchChanged"
        );
    }

    #[test]
    fn unit_kinds_ignore_extra_fields() {
        let event = SessionEvent::from_record(&json!({"event": "bufferingStart", "extra": 1})).unwrap();
        assert_eq!(event, SessionEvent::BufferingStart);
    }

    #[test]
    fn known_kind_missing_required_field_fails() {
        assert!(SessionEvent::from_record(&json!({"event": "isPlayingStateUpdate"})).is_err());
    }

    #[test]
    fn buffering_update_ranges() {
        let event = SessionEvent::from_record(&json!({
            "event": "bufferingUpdate",
            "values": [[0, 1500], [3000, 4000]]
        }))
        .unwrap();

        let SessionEvent::BufferingUpdate { values } = event else {
            panic!("expected bufferingUpdate");
        };
        let ranges = SessionEvent::buffered_ranges(&values);
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[1].start, Duration::from_millis(3000));
        assert_eq!(ranges[0].end_fraction(Duration::from_millis(3000)), 0.5);
    }

    #[test]
    fn detection_ignores_quality_for_sameness() {
        let event = SessionEvent::from_record(&json!({
            "event": "detection",
            "payload": "4006381333931",
            "kind": "ean13",
            "quality": 90
        }))
        .unwrap();
        let first = event.detection().unwrap();
        let second = DetectionEvent {
            quality: 12,
            ..first.clone()
        };
        assert!(first.same_detection(&second));
    }
}
