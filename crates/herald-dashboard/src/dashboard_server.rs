//! Dashboard server bootstrap, action handling, and page rendering.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum::{
    extract::{Form, State},
    response::Html,
    routing::get,
    Router,
};
use serde::Deserialize;
use tokio::net::TcpListener;

use herald_state::{ControlAction, ControlBridge, ControlOutcome, SharedNotifyState};

/// Configuration for the dashboard HTTP server.
pub struct DashboardServerConfig {
    pub bind: String,
    /// How long a `send` action waits for the delivery loop before the page
    /// reports failure. The underlying fan-out is not cancelled on timeout.
    pub bridge_wait: Duration,
    pub state: SharedNotifyState,
    pub bridge: ControlBridge,
}

#[derive(Clone)]
struct DashboardContext {
    state: SharedNotifyState,
    bridge: ControlBridge,
    bridge_wait: Duration,
}

#[derive(Debug, Default, Deserialize)]
struct DashboardForm {
    #[serde(default)]
    action: Option<String>,
    #[serde(default)]
    event_message: Option<String>,
}

/// Runs the dashboard server until ctrl_c.
pub async fn run_dashboard_server(config: DashboardServerConfig) -> Result<()> {
    let bind_addr = config
        .bind
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid dashboard bind address '{}'", config.bind))?;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind dashboard server on {bind_addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve bound dashboard address")?;
    println!("dashboard server listening: addr={local_addr}");

    let context = Arc::new(DashboardContext {
        state: config.state,
        bridge: config.bridge,
        bridge_wait: config.bridge_wait,
    });
    let app = build_dashboard_router(context);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("dashboard server exited unexpectedly")
}

fn build_dashboard_router(context: Arc<DashboardContext>) -> Router {
    Router::new()
        .route("/", get(handle_dashboard_get).post(handle_dashboard_post))
        .with_state(context)
}

async fn handle_dashboard_get(State(context): State<Arc<DashboardContext>>) -> Html<String> {
    Html(render_current_state(&context, String::new()))
}

async fn handle_dashboard_post(
    State(context): State<Arc<DashboardContext>>,
    Form(form): Form<DashboardForm>,
) -> Html<String> {
    let outcome = apply_dashboard_action(&context, form).await;
    Html(render_current_state(&context, outcome))
}

async fn apply_dashboard_action(context: &DashboardContext, form: DashboardForm) -> String {
    match form.action.as_deref() {
        Some("save") => {
            let message = form.event_message.unwrap_or_default();
            match context.state.set_event_message(&message) {
                Ok(()) => "Saved!".to_string(),
                Err(error) => {
                    eprintln!("dashboard failed to persist event message: {error:#}");
                    "Failed to save.".to_string()
                }
            }
        }
        Some("preview") => {
            // Fire-and-forget: the page reports submission, not delivery.
            if let Err(error) = context.bridge.dispatch(ControlAction::PreviewToOwner).await {
                eprintln!("dashboard preview dispatch failed: {error}");
            }
            "Preview sent.".to_string()
        }
        Some("send") => {
            match context
                .bridge
                .submit(ControlAction::Announce, context.bridge_wait)
                .await
            {
                Ok(ControlOutcome::Announced { delivered }) => {
                    format!("Sent to {delivered} users.")
                }
                Ok(ControlOutcome::Failed { reason }) => {
                    eprintln!("dashboard send reported failure: {reason}");
                    "Failed to send.".to_string()
                }
                Ok(ControlOutcome::PreviewSent) => "Failed to send.".to_string(),
                Err(error) => {
                    eprintln!("dashboard send failed: {error}");
                    "Failed to send.".to_string()
                }
            }
        }
        _ => String::new(),
    }
}

fn render_current_state(context: &DashboardContext, outcome: String) -> String {
    let message = context.state.event_message().unwrap_or_else(|error| {
        eprintln!("dashboard failed to read event message: {error:#}");
        String::new()
    });
    let opted_in_count = context.state.opted_in_count().unwrap_or(0);
    let snapshot = context.state.directory_snapshot().unwrap_or_default();
    render_dashboard_page(
        &message,
        &outcome,
        opted_in_count,
        snapshot.tracked_member_count,
    )
}

fn render_dashboard_page(
    event_message: &str,
    outcome: &str,
    opted_in_count: usize,
    tracked_member_count: usize,
) -> String {
    format!(
        r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1" />
  <title>Herald Dashboard</title>
  <style>
    :root {{
      color-scheme: light;
      font-family: "Segoe UI", sans-serif;
    }}
    body {{
      margin: 0;
      background: #f4f6f8;
      color: #13232f;
    }}
    .container {{
      max-width: 720px;
      margin: 0 auto;
      padding: 1.5rem;
    }}
    h1 {{
      margin: 0 0 1rem 0;
      font-size: 1.5rem;
    }}
    .panel {{
      background: #ffffff;
      border: 1px solid #d2dde6;
      border-radius: 12px;
      padding: 1rem;
    }}
    textarea {{
      width: 100%;
      box-sizing: border-box;
      min-height: 110px;
      border: 1px solid #b8c9d6;
      border-radius: 8px;
      padding: 0.55rem 0.7rem;
      font-size: 0.95rem;
      resize: vertical;
    }}
    .actions {{
      display: flex;
      gap: 0.5rem;
      margin-top: 0.8rem;
    }}
    button {{
      border: 0;
      border-radius: 8px;
      background: #0f7d5f;
      color: #ffffff;
      padding: 0.55rem 0.9rem;
      font-weight: 600;
      cursor: pointer;
    }}
    .outcome {{
      margin-top: 0.8rem;
      color: #375062;
    }}
    .stats {{
      margin-top: 1rem;
      color: #3a4f5f;
    }}
  </style>
</head>
<body>
  <div class="container">
    <h1>Herald Dashboard</h1>
    <div class="panel">
      <form method="POST">
        <textarea name="event_message">{message}</textarea>
        <div class="actions">
          <button name="action" value="save">Save</button>
          <button name="action" value="preview">Preview to Owner</button>
          <button name="action" value="send">Send to All</button>
        </div>
      </form>
      <p class="outcome">{outcome}</p>
      <hr />
      <p class="stats">Opted-in users: {opted_in_count}</p>
      <p class="stats">Users with tracked roles: {tracked_member_count}</p>
    </div>
  </div>
</body>
</html>
"#,
        message = html_escape(event_message),
        outcome = html_escape(outcome),
        opted_in_count = opted_in_count,
        tracked_member_count = tracked_member_count,
    )
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests;
