//! Tests for dashboard action handling and page rendering.

use std::{path::Path, time::Duration};

use super::{
    apply_dashboard_action, html_escape, render_dashboard_page, DashboardContext, DashboardForm,
};
use herald_state::{
    control_channel, ControlAction, ControlOutcome, NotifyStateStore, SharedNotifyState,
};

fn test_state(dir: &Path) -> SharedNotifyState {
    SharedNotifyState::load(NotifyStateStore::new(dir)).expect("load state")
}

fn test_context(dir: &Path, bridge_wait: Duration) -> (DashboardContext, tokio::sync::mpsc::Receiver<herald_state::ControlRequest>) {
    let (bridge, control_rx) = control_channel(4);
    (
        DashboardContext {
            state: test_state(dir),
            bridge,
            bridge_wait,
        },
        control_rx,
    )
}

fn form(action: Option<&str>, event_message: Option<&str>) -> DashboardForm {
    DashboardForm {
        action: action.map(ToOwned::to_owned),
        event_message: event_message.map(ToOwned::to_owned),
    }
}

#[tokio::test]
async fn functional_save_persists_message_and_annotates_page() {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let (context, _control_rx) = test_context(tempdir.path(), Duration::from_millis(50));

    let outcome = apply_dashboard_action(&context, form(Some("save"), Some("Party tonight!"))).await;
    assert_eq!(outcome, "Saved!");

    let reloaded = test_state(tempdir.path());
    assert_eq!(reloaded.event_message().expect("message"), "Party tonight!");
}

#[tokio::test]
async fn functional_send_reports_delivered_count() {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let (context, mut control_rx) = test_context(tempdir.path(), Duration::from_secs(1));

    let owner = tokio::spawn(async move {
        let request = control_rx.recv().await.expect("request");
        assert_eq!(request.action, ControlAction::Announce);
        let _ = request.reply.send(ControlOutcome::Announced { delivered: 5 });
    });

    let outcome = apply_dashboard_action(&context, form(Some("send"), None)).await;
    assert_eq!(outcome, "Sent to 5 users.");
    owner.await.expect("owner task");
}

#[tokio::test]
async fn regression_send_timeout_renders_failure_while_delivery_may_continue() {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let (context, mut control_rx) = test_context(tempdir.path(), Duration::from_millis(10));

    let owner = tokio::spawn(async move {
        let request = control_rx.recv().await.expect("request");
        tokio::time::sleep(Duration::from_millis(100)).await;
        // The accepted race: delivery finished after the page already failed.
        assert!(request
            .reply
            .send(ControlOutcome::Announced { delivered: 2 })
            .is_err());
    });

    let outcome = apply_dashboard_action(&context, form(Some("send"), None)).await;
    assert_eq!(outcome, "Failed to send.");
    owner.await.expect("owner task");
}

#[tokio::test]
async fn functional_send_maps_owner_failure_to_generic_message() {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let (context, mut control_rx) = test_context(tempdir.path(), Duration::from_secs(1));

    let owner = tokio::spawn(async move {
        let request = control_rx.recv().await.expect("request");
        let _ = request.reply.send(ControlOutcome::Failed {
            reason: "directory walk failed".to_string(),
        });
    });

    let outcome = apply_dashboard_action(&context, form(Some("send"), None)).await;
    assert_eq!(outcome, "Failed to send.");
    owner.await.expect("owner task");
}

#[tokio::test]
async fn functional_preview_is_fire_and_forget() {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let (context, mut control_rx) = test_context(tempdir.path(), Duration::from_millis(50));

    let outcome = apply_dashboard_action(&context, form(Some("preview"), None)).await;
    assert_eq!(outcome, "Preview sent.");

    let request = control_rx.recv().await.expect("request");
    assert_eq!(request.action, ControlAction::PreviewToOwner);
    assert!(request.reply.send(ControlOutcome::PreviewSent).is_err());
}

#[tokio::test]
async fn unit_unknown_action_renders_without_outcome() {
    let tempdir = tempfile::tempdir().expect("tempdir");
    let (context, _control_rx) = test_context(tempdir.path(), Duration::from_millis(50));

    assert_eq!(apply_dashboard_action(&context, form(None, None)).await, "");
    assert_eq!(
        apply_dashboard_action(&context, form(Some("reboot"), None)).await,
        ""
    );
}

#[test]
fn unit_render_includes_message_counts_and_outcome() {
    let page = render_dashboard_page("Party tonight!", "Saved!", 7, 21);
    assert!(page.contains("Party tonight!"));
    assert!(page.contains("Saved!"));
    assert!(page.contains("Opted-in users: 7"));
    assert!(page.contains("Users with tracked roles: 21"));
}

#[test]
fn regression_render_escapes_markup_in_the_event_message() {
    let page = render_dashboard_page("<script>\"&\"</script>", "", 0, 0);
    assert!(!page.contains("<script>"));
    assert!(page.contains("&lt;script&gt;"));
    assert!(page.contains("&quot;&amp;&quot;"));
}

#[test]
fn unit_html_escape_covers_reserved_characters() {
    assert_eq!(html_escape("a&b<c>\"d\""), "a&amp;b&lt;c&gt;&quot;d&quot;");
}
