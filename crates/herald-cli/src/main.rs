//! Herald binary: startup wiring for the gateway runtime and the dashboard.

mod bootstrap_helpers;
mod cli_args;

use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;

use bootstrap_helpers::init_tracing;
use cli_args::Cli;
use herald_dashboard::{run_dashboard_server, DashboardServerConfig};
use herald_discord_runtime::{run_discord_bridge, DiscordBridgeRuntimeConfig};
use herald_state::{control_channel, NotifyStateStore, SharedNotifyState};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    run(cli).await
}

async fn run(cli: Cli) -> Result<()> {
    let bot_token = cli.discord_bot_token.trim().to_string();
    if bot_token.is_empty() {
        bail!("discord bot token cannot be empty; set HERALD_DISCORD_BOT_TOKEN");
    }

    let state = SharedNotifyState::load(NotifyStateStore::new(&cli.state_dir))?;
    let (bridge, control_rx) = control_channel(16);

    let dashboard_config = DashboardServerConfig {
        bind: cli.dashboard_bind.clone(),
        bridge_wait: Duration::from_millis(cli.dashboard_bridge_timeout_ms),
        state: state.clone(),
        bridge,
    };
    tokio::spawn(async move {
        if let Err(error) = run_dashboard_server(dashboard_config).await {
            eprintln!("dashboard server failed: {error:#}");
        }
    });

    let runtime_config = DiscordBridgeRuntimeConfig {
        state_dir: cli.state_dir.clone(),
        api_base: cli.discord_api_base.clone(),
        bot_token,
        command_prefix: cli.command_prefix.clone(),
        request_timeout_ms: cli.request_timeout_ms,
        retry_max_attempts: cli.retry_max_attempts,
        retry_base_delay_ms: cli.retry_base_delay_ms,
        reconnect_delay: Duration::from_millis(cli.reconnect_delay_ms),
    };
    run_discord_bridge(runtime_config, state, control_rx).await
}
