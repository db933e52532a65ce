#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use lookout_api::{alert, AlertLevel, Alerts, BuildControls, ResourceView};
use lookout_core::{Collection, ResourceKind, SyncError};
use lookout_kubehub::{BuildActions, MockTransport, SessionConfig, SessionState, Transport};

fn controls(mock: &Arc<MockTransport>) -> BuildControls {
    let actions: Arc<dyn BuildActions> = mock.clone();
    BuildControls::new(actions, "demo", Alerts::new())
}

async fn eventually<F: Fn() -> bool>(what: &str, f: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !f() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {}", what);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

#[tokio::test]
async fn started_build_is_announced_and_watched() {
    let mock = Arc::new(MockTransport::new());
    let t: Arc<dyn Transport> = mock.clone();
    let view = ResourceView::open(
        t,
        Collection::namespaced(ResourceKind::builds(), "demo"),
        SessionConfig { backoff_initial: Duration::from_millis(5), backoff_max: Duration::from_millis(20) },
    );
    eventually("watching", || view.state() == SessionState::Watching).await;

    let c = controls(&mock);
    let build = c.start_build("ruby").await.expect("start");
    assert_eq!(build.name(), "ruby-1");
    let a = c.alerts().get(alert::BUILD_START).expect("start alert");
    assert_eq!(a.level, AlertLevel::Success);
    assert_eq!(a.message, "Build ruby-1 has started.");
    assert_eq!(mock.build_actions(), vec!["start demo/ruby"]);

    eventually("build listed", || view.unfiltered().contains_key("ruby-1")).await;
}

#[tokio::test]
async fn failed_start_raises_an_error_with_details() {
    let mock = Arc::new(MockTransport::new());
    mock.fail_next_build_action(SyncError::Rejected("forbidden".into()));
    let c = controls(&mock);
    assert!(c.start_build("ruby").await.is_err());
    let a = c.alerts().get(alert::BUILD_START).expect("start alert");
    assert_eq!(a.level, AlertLevel::Error);
    assert_eq!(a.message, "An error occurred while starting the build.");
    assert_eq!(a.details.as_deref(), Some("Reason: rejected: forbidden"));
}

#[tokio::test]
async fn rerun_creates_the_next_build_of_the_same_config() {
    let mock = Arc::new(MockTransport::new());
    let c = controls(&mock);
    c.start_build("ruby").await.expect("start");
    let clone = c.rerun_build("ruby-1").await.expect("rerun");
    assert_eq!(clone.name(), "ruby-2");
    assert_eq!(
        c.alerts().get(alert::BUILD_RERUN).map(|a| a.message),
        Some("Build ruby-1 is being rebuilt as ruby-2.".to_string())
    );

    assert!(c.rerun_build("missing").await.is_err());
    assert_eq!(
        c.alerts().get(alert::BUILD_RERUN).map(|a| a.message),
        Some("An error occurred while rerunning the build.".to_string())
    );
}

#[tokio::test]
async fn cancel_marks_the_build_and_reports_failures() {
    let mock = Arc::new(MockTransport::new());
    let c = controls(&mock);
    c.start_build("ruby").await.expect("start");
    let cancelled = c.cancel_build("ruby-1", "ruby").await.expect("cancel");
    assert_eq!(cancelled.status["cancelled"], serde_json::Value::Bool(true));
    assert_eq!(cancelled.status["phase"], "New");
    assert_eq!(
        c.alerts().get(alert::BUILD_CANCEL).map(|a| (a.level, a.message)),
        Some((AlertLevel::Success, "Cancelling build ruby-1 of ruby.".to_string()))
    );

    let err = c.cancel_build("ruby-9", "ruby").await.expect_err("missing build");
    assert!(matches!(err, SyncError::NotFound(_)));
    let a = c.alerts().get(alert::BUILD_CANCEL).expect("cancel alert");
    assert_eq!(a.message, "An error occurred cancelling the build.");
    assert_eq!(mock.build_actions(), vec!["start demo/ruby", "cancel demo/ruby-1", "cancel demo/ruby-9"]);
}
