//! HTTP dashboard for the Herald fan-out service.
//!
//! Renders the current event message and recipient counts as an HTML form and
//! translates save/preview/send actions into state mutations or control-bridge
//! requests. This surface never talks to the chat provider directly.

pub mod dashboard_server;

pub use dashboard_server::{run_dashboard_server, DashboardServerConfig};
