use std::path::PathBuf;

use clap::Parser;

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Parser)]
#[command(
    name = "herald",
    about = "Discord notification fan-out service with an HTTP dashboard",
    version
)]
pub struct Cli {
    #[arg(
        long,
        env = "HERALD_DISCORD_BOT_TOKEN",
        hide_env_values = true,
        help = "Discord bot token used for the gateway session and REST calls."
    )]
    pub discord_bot_token: String,

    #[arg(
        long,
        env = "HERALD_STATE_DIR",
        default_value = ".herald",
        help = "Directory holding the persisted notify-state documents."
    )]
    pub state_dir: PathBuf,

    #[arg(
        long,
        env = "HERALD_COMMAND_PREFIX",
        default_value = "!",
        help = "Prefix that introduces chat commands."
    )]
    pub command_prefix: String,

    #[arg(
        long,
        env = "HERALD_DISCORD_API_BASE",
        default_value = "https://discord.com/api/v10",
        help = "Discord REST API base URL."
    )]
    pub discord_api_base: String,

    #[arg(
        long,
        env = "HERALD_DASHBOARD_BIND",
        default_value = "0.0.0.0:8080",
        help = "Bind address for the HTTP dashboard."
    )]
    pub dashboard_bind: String,

    #[arg(
        long,
        env = "HERALD_DASHBOARD_BRIDGE_TIMEOUT_MS",
        default_value_t = 20_000,
        value_parser = parse_positive_u64,
        help = "How long the dashboard waits for a fan-out result before reporting failure."
    )]
    pub dashboard_bridge_timeout_ms: u64,

    #[arg(
        long,
        default_value_t = 30_000,
        value_parser = parse_positive_u64,
        help = "Per-request timeout for Discord REST calls."
    )]
    pub request_timeout_ms: u64,

    #[arg(
        long,
        default_value_t = 3,
        value_parser = parse_positive_usize,
        help = "Maximum attempts for retryable Discord REST failures."
    )]
    pub retry_max_attempts: usize,

    #[arg(
        long,
        default_value_t = 250,
        value_parser = parse_positive_u64,
        help = "Base delay for REST retry backoff."
    )]
    pub retry_base_delay_ms: u64,

    #[arg(
        long,
        default_value_t = 5_000,
        value_parser = parse_positive_u64,
        help = "Delay before reconnecting a failed gateway session."
    )]
    pub reconnect_delay_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn unit_positive_parsers_reject_zero_and_garbage() {
        assert!(parse_positive_u64("20000").is_ok());
        assert!(parse_positive_u64("0").is_err());
        assert!(parse_positive_u64("abc").is_err());
        assert!(parse_positive_usize("3").is_ok());
        assert!(parse_positive_usize("0").is_err());
    }
}
