//! Capture sessions: synthesized readiness and detection forwarding.

mod common;

use std::sync::{Arc, Mutex};

use common::{settle, Harness};
use pretty_assertions::assert_eq;
use stageproto::SessionEvent;
use stagehand::{
    DataSource, DetectionEvent, DuplicatePolicy, SessionController, SessionOptions, SimConfig,
    Size,
};
use tokio_test::assert_ok;

fn detection(payload: &str, kind: &str) -> SessionEvent {
    SessionEvent::Detection {
        payload: payload.to_string(),
        kind: kind.to_string(),
        quality: 80,
    }
}

fn capture(
    h: &Harness,
    policy: DuplicatePolicy,
) -> (Arc<SessionController>, Arc<Mutex<Vec<DetectionEvent>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let options = SessionOptions::capture(DataSource::device())
        .with_duplicate_policy(policy)
        .on_detection(move |d| sink.lock().unwrap().push(d.clone()));
    (h.controller(options), seen)
}

fn payloads(seen: &Mutex<Vec<DetectionEvent>>) -> Vec<(String, String)> {
    seen.lock()
        .unwrap()
        .iter()
        .map(|d| (d.payload.clone(), d.kind.clone()))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_capture_readiness_is_synthesized() {
    let h = Harness::new(SimConfig {
        size: Size::new(1280.0, 720.0),
        ..SimConfig::default()
    });
    let (controller, _) = capture(&h, DuplicatePolicy::Suppress);

    assert_ok!(controller.create().await);
    let state = controller.value();
    assert!(state.is_initialized);
    assert_eq!(state.size, Size::new(1280.0, 720.0));
    assert_eq!(h.methods(), vec!["init", "create"]);
}

#[tokio::test(start_paused = true)]
async fn test_repeated_detections_are_suppressed() {
    let h = Harness::new(SimConfig::default());
    let (controller, seen) = capture(&h, DuplicatePolicy::Suppress);
    let handle = assert_ok!(controller.create().await);

    for event in [
        detection("A", "qr"),
        detection("A", "qr"),
        detection("B", "qr"),
        detection("B", "ean13"),
        detection("A", "ean13"),
        detection("A", "ean13"),
    ] {
        h.emit(handle, event);
    }
    settle(10).await;

    let pair = |p: &str, k: &str| (p.to_string(), k.to_string());
    assert_eq!(
        payloads(&seen),
        vec![
            pair("A", "qr"),
            pair("B", "qr"),
            pair("B", "ean13"),
            pair("A", "ean13"),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_forward_policy_keeps_repeats() {
    let h = Harness::new(SimConfig::default());
    let (controller, seen) = capture(&h, DuplicatePolicy::Forward);
    let handle = assert_ok!(controller.create().await);

    h.emit(handle, detection("A", "qr"));
    h.emit(handle, detection("A", "qr"));
    settle(10).await;

    assert_eq!(payloads(&seen).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_detections_stop_after_dispose() {
    let h = Harness::new(SimConfig::default());
    let (controller, seen) = capture(&h, DuplicatePolicy::Suppress);
    let handle = assert_ok!(controller.create().await);

    h.emit(handle, detection("A", "qr"));
    settle(10).await;
    assert_ok!(controller.dispose().await);

    h.emit(handle, detection("B", "qr"));
    settle(10).await;
    assert_eq!(payloads(&seen), vec![("A".to_string(), "qr".to_string())]);
}
