//! Engine identity changes across controllers sharing one context.

mod common;

use common::{settle, Harness};
use pretty_assertions::assert_eq;
use stageproto::Method;
use stagehand::{SessionPhase, SessionState, SimConfig};
use tokio_test::assert_ok;

#[tokio::test(start_paused = true)]
async fn test_init_runs_once_per_engine() {
    let h = Harness::new(SimConfig::default());
    let a = h.playback();
    let b = h.playback();

    let (ra, rb) = tokio::join!(a.create(), b.create());
    assert_ok!(ra);
    assert_ok!(rb);
    assert_eq!(h.engine.count(Method::InitializeEngine), 1);

    h.context.replace_engine();
    let (ra, rb) = tokio::join!(a.play(), b.pause());
    assert_ok!(ra);
    assert_ok!(rb);
    assert_eq!(h.engine.count(Method::InitializeEngine), 2);

    // Nothing reached the sessions of the replaced engine
    assert_eq!(h.engine.count(Method::StartPlayback), 0);
    assert_eq!(h.engine.count(Method::PausePlayback), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stale_session_is_reset() {
    let h = Harness::new(SimConfig::default());
    let controller = h.playback();
    assert_ok!(controller.create().await);
    assert_ok!(controller.play().await);
    settle(10).await;

    h.context.replace_engine();
    assert_ok!(controller.set_looping(true).await);

    assert_eq!(controller.phase(), SessionPhase::Uninitialized);
    assert!(!controller.handle().is_valid());
    assert_eq!(controller.value(), SessionState::uninitialized());

    // Polling stopped with the old session
    let polls = h.engine.count(Method::QueryPosition);
    settle(2000).await;
    assert_eq!(h.engine.count(Method::QueryPosition), polls);

    // A fresh session can be created on the new engine
    assert_ok!(controller.create().await);
    assert_eq!(controller.phase(), SessionPhase::Ready);
    assert_eq!(h.engine.count(Method::InitializeEngine), 2);
}

#[tokio::test(start_paused = true)]
async fn test_dispose_skips_session_of_replaced_engine() {
    let h = Harness::new(SimConfig::default());
    let controller = h.playback();
    assert_ok!(controller.create().await);

    h.context.replace_engine();
    assert_ok!(controller.dispose().await);

    assert_eq!(h.engine.count(Method::DisposeSession), 0);
    assert_eq!(controller.phase(), SessionPhase::Disposed);
}

#[tokio::test(start_paused = true)]
async fn test_failed_init_is_retried_by_next_operation() {
    let h = Harness::new(SimConfig::default());
    h.engine.drop_next(Method::InitializeEngine);
    let controller = h.playback();

    assert!(controller.create().await.is_err());
    assert_eq!(h.methods(), vec!["init"]);

    assert_ok!(controller.create().await);
    assert_eq!(h.methods(), vec!["init", "init", "create"]);
}
