//! Discord bridge runtime that drives the gateway session and fan-out delivery.

use std::{path::PathBuf, time::Duration};

use anyhow::{bail, Context, Result};
use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use herald_state::{ControlAction, ControlOutcome, ControlRequest, SharedNotifyState};

const GATEWAY_VERSION: u8 = 10;

// GUILDS | GUILD_MEMBERS | GUILD_MESSAGES | DIRECT_MESSAGES | MESSAGE_CONTENT
const GATEWAY_INTENTS: u64 = (1 << 0) | (1 << 1) | (1 << 9) | (1 << 12) | (1 << 15);

const OP_DISPATCH: u8 = 0;
const OP_HEARTBEAT: u8 = 1;
const OP_IDENTIFY: u8 = 2;
const OP_RECONNECT: u8 = 7;
const OP_INVALID_SESSION: u8 = 9;
const OP_HELLO: u8 = 10;
const OP_HEARTBEAT_ACK: u8 = 11;

const ADMINISTRATOR_PERMISSION: u64 = 1 << 3;

const PERMISSION_DENIED_REPLY: &str = "Admins only.";
const STATE_WRITE_FAILED_REPLY: &str = "State could not be saved. Try again later.";

#[derive(Clone)]
/// Runtime configuration for the Discord bridge loop.
pub struct DiscordBridgeRuntimeConfig {
    pub state_dir: PathBuf,
    pub api_base: String,
    pub bot_token: String,
    pub command_prefix: String,
    pub request_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
    pub reconnect_delay: Duration,
}

mod delivery_log;
mod discord_api_client;
mod discord_command_helpers;
mod discord_render_helpers;
mod fanout;

use delivery_log::{DeliveryLogRecord, JsonlDeliveryLog};
use discord_api_client::DiscordApiClient;
use discord_command_helpers::{command_usage, parse_embed_payload, parse_notify_command};
use discord_render_helpers::{render_status_report, render_tracked_groups};
use fanout::{deliver, resolve_recipients, tracked_member_count};

#[derive(Debug, Clone, Deserialize)]
struct GatewayEnvelope {
    op: u8,
    #[serde(default)]
    d: Value,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GatewayHelloPayload {
    heartbeat_interval: u64,
}

#[derive(Debug, Clone, Deserialize)]
struct GatewayReadyPayload {
    user: DiscordUserRef,
    #[serde(default)]
    guilds: Vec<Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct DiscordUserRef {
    id: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    bot: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct DiscordAttachment {
    #[serde(default)]
    filename: String,
    url: String,
}

#[derive(Debug, Clone, Deserialize)]
struct DiscordMessageEvent {
    channel_id: String,
    #[serde(default)]
    guild_id: Option<String>,
    author: DiscordUserRef,
    #[serde(default)]
    content: String,
    #[serde(default)]
    attachments: Vec<DiscordAttachment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NotifyCommand {
    Subscribe,
    Unsubscribe,
    SetMessage { text: String },
    Preview,
    Announce,
    AddGroup { name: String },
    RemoveGroup { name: String },
    ListGroups,
    Status,
    Embed { json: Option<String> },
    Help,
    Invalid { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Shutdown,
    Reconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GatewayStep {
    Continue,
    Resync,
}

/// Runs the Discord bridge loop until shutdown is requested.
pub async fn run_discord_bridge(
    config: DiscordBridgeRuntimeConfig,
    state: SharedNotifyState,
    mut control_rx: mpsc::Receiver<ControlRequest>,
) -> Result<()> {
    let mut runtime = DiscordBridgeRuntime::new(config, state)?;
    runtime.run(&mut control_rx).await
}

struct DiscordBridgeRuntime {
    config: DiscordBridgeRuntimeConfig,
    api_client: DiscordApiClient,
    state: SharedNotifyState,
    delivery_log: JsonlDeliveryLog,
    sequence: Option<u64>,
}

impl DiscordBridgeRuntime {
    fn new(config: DiscordBridgeRuntimeConfig, state: SharedNotifyState) -> Result<Self> {
        std::fs::create_dir_all(&config.state_dir)
            .with_context(|| format!("failed to create {}", config.state_dir.display()))?;

        let api_client = DiscordApiClient::new(
            config.api_base.clone(),
            config.bot_token.clone(),
            config.request_timeout_ms,
            config.retry_max_attempts,
            config.retry_base_delay_ms,
        )?;
        let delivery_log = JsonlDeliveryLog::open(config.state_dir.join("deliveries.jsonl"))?;

        Ok(Self {
            config,
            api_client,
            state,
            delivery_log,
            sequence: None,
        })
    }

    async fn run(&mut self, control_rx: &mut mpsc::Receiver<ControlRequest>) -> Result<()> {
        // The first gateway resolution doubles as the credential check: a
        // rejected token fails the process instead of entering the retry loop.
        let mut gateway_url = self
            .api_client
            .get_gateway_url()
            .await
            .context("discord rejected the configured bot token or the gateway is unreachable")?;

        loop {
            match self.run_socket_session(&gateway_url, control_rx).await {
                Ok(SessionEnd::Shutdown) => {
                    println!("discord bridge shutdown requested");
                    self.state.flush()?;
                    return Ok(());
                }
                Ok(SessionEnd::Reconnect) => {
                    println!("discord bridge session ended; reconnecting");
                }
                Err(error) => {
                    eprintln!("discord bridge socket session error: {error:#}");
                }
            }

            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    println!("discord bridge shutdown requested");
                    self.state.flush()?;
                    return Ok(());
                }
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }

            gateway_url = match self.api_client.get_gateway_url().await {
                Ok(url) => url,
                Err(error) => {
                    eprintln!("discord bridge failed to resolve gateway url: {error:#}");
                    gateway_url
                }
            };
        }
    }

    async fn run_socket_session(
        &mut self,
        gateway_url: &str,
        control_rx: &mut mpsc::Receiver<ControlRequest>,
    ) -> Result<SessionEnd> {
        let request_url = format!(
            "{}/?v={GATEWAY_VERSION}&encoding=json",
            gateway_url.trim_end_matches('/')
        );
        let (stream, _response) = connect_async(request_url.as_str())
            .await
            .context("failed to connect discord gateway websocket")?;
        let (mut sink, mut source) = stream.split();

        // The gateway opens every session with Hello carrying the heartbeat cadence.
        let heartbeat_interval_ms = loop {
            let Some(message_result) = source.next().await else {
                bail!("discord gateway closed before hello");
            };
            let message = message_result.context("failed reading discord gateway hello")?;
            let Some(envelope) = parse_gateway_envelope(message)? else {
                continue;
            };
            if envelope.op == OP_HELLO {
                let hello = serde_json::from_value::<GatewayHelloPayload>(envelope.d)
                    .context("failed to decode discord gateway hello")?;
                break hello.heartbeat_interval;
            }
        };

        self.send_identify(&mut sink).await?;
        println!("discord bridge gateway connected: heartbeat_interval_ms={heartbeat_interval_ms}");

        let mut heartbeat =
            tokio::time::interval(Duration::from_millis(heartbeat_interval_ms.max(1_000)));
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut control_open = true;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    return Ok(SessionEnd::Shutdown);
                }
                _ = heartbeat.tick() => {
                    self.send_heartbeat(&mut sink).await?;
                }
                maybe_request = control_rx.recv(), if control_open => {
                    match maybe_request {
                        Some(request) => self.handle_control_request(request).await,
                        None => control_open = false,
                    }
                }
                maybe_message = source.next() => {
                    let Some(message_result) = maybe_message else {
                        return Ok(SessionEnd::Reconnect);
                    };
                    let message = message_result.context("failed reading discord gateway message")?;
                    if matches!(message, WsMessage::Close(_)) {
                        return Ok(SessionEnd::Reconnect);
                    }
                    let Some(envelope) = parse_gateway_envelope(message)? else {
                        continue;
                    };
                    match self.handle_envelope(&mut sink, envelope).await? {
                        GatewayStep::Continue => {}
                        GatewayStep::Resync => return Ok(SessionEnd::Reconnect),
                    }
                }
            }
        }
    }

    async fn send_identify<S>(&self, sink: &mut S) -> Result<()>
    where
        S: futures_util::Sink<WsMessage> + Unpin,
        S::Error: std::error::Error + Send + Sync + 'static,
    {
        let identify = json!({
            "op": OP_IDENTIFY,
            "d": {
                "token": self.config.bot_token,
                "intents": GATEWAY_INTENTS,
                "properties": {
                    "os": std::env::consts::OS,
                    "browser": "herald",
                    "device": "herald",
                },
            },
        });
        send_gateway_frame(sink, identify, "identify").await
    }

    async fn send_heartbeat<S>(&self, sink: &mut S) -> Result<()>
    where
        S: futures_util::Sink<WsMessage> + Unpin,
        S::Error: std::error::Error + Send + Sync + 'static,
    {
        let heartbeat = json!({ "op": OP_HEARTBEAT, "d": self.sequence });
        send_gateway_frame(sink, heartbeat, "heartbeat").await
    }

    async fn handle_envelope<S>(
        &mut self,
        sink: &mut S,
        envelope: GatewayEnvelope,
    ) -> Result<GatewayStep>
    where
        S: futures_util::Sink<WsMessage> + Unpin,
        S::Error: std::error::Error + Send + Sync + 'static,
    {
        if let Some(sequence) = envelope.s {
            self.sequence = Some(sequence);
        }
        match envelope.op {
            OP_DISPATCH => {
                self.handle_dispatch(envelope).await?;
                Ok(GatewayStep::Continue)
            }
            OP_HEARTBEAT => {
                self.send_heartbeat(sink).await?;
                Ok(GatewayStep::Continue)
            }
            OP_RECONNECT | OP_INVALID_SESSION => Ok(GatewayStep::Resync),
            OP_HELLO | OP_HEARTBEAT_ACK => Ok(GatewayStep::Continue),
            _ => Ok(GatewayStep::Continue),
        }
    }

    async fn handle_dispatch(&mut self, envelope: GatewayEnvelope) -> Result<()> {
        match envelope.t.as_deref() {
            Some("READY") => {
                let ready = serde_json::from_value::<GatewayReadyPayload>(envelope.d)
                    .context("failed to decode discord gateway ready")?;
                println!(
                    "discord bridge ready: user={} guilds={}",
                    ready.user.username,
                    ready.guilds.len()
                );
                Ok(())
            }
            Some("MESSAGE_CREATE") => {
                let event = serde_json::from_value::<DiscordMessageEvent>(envelope.d)
                    .context("failed to decode discord message event")?;
                self.handle_message_event(event).await;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn handle_message_event(&mut self, event: DiscordMessageEvent) {
        if event.author.bot {
            return;
        }
        let Some(command) = parse_notify_command(&self.config.command_prefix, &event.content)
        else {
            return;
        };
        if let Err(error) = self.handle_command(&event, command).await {
            eprintln!(
                "discord bridge command handling failed: channel={} error={error:#}",
                event.channel_id
            );
        }
    }

    async fn handle_command(
        &mut self,
        event: &DiscordMessageEvent,
        command: NotifyCommand,
    ) -> Result<()> {
        let author_id = event
            .author
            .id
            .parse::<u64>()
            .with_context(|| format!("invalid discord author id '{}'", event.author.id))?;

        match command {
            NotifyCommand::Subscribe => {
                let reply = match self.state.subscribe(author_id) {
                    Ok(_) => "You're now subscribed to event notifications!".to_string(),
                    Err(error) => {
                        eprintln!("discord bridge failed to persist opt-in: {error:#}");
                        STATE_WRITE_FAILED_REPLY.to_string()
                    }
                };
                self.reply(event, &reply).await
            }
            NotifyCommand::Unsubscribe => {
                let reply = match self.state.unsubscribe(author_id) {
                    Ok(_) => "You have unsubscribed from notifications.".to_string(),
                    Err(error) => {
                        eprintln!("discord bridge failed to persist opt-out: {error:#}");
                        STATE_WRITE_FAILED_REPLY.to_string()
                    }
                };
                self.reply(event, &reply).await
            }
            NotifyCommand::SetMessage { text } => {
                if !self.ensure_privileged(event).await? {
                    return Ok(());
                }
                let reply = match self.state.set_event_message(&text) {
                    Ok(()) => "Event message saved.".to_string(),
                    Err(error) => {
                        eprintln!("discord bridge failed to persist event message: {error:#}");
                        STATE_WRITE_FAILED_REPLY.to_string()
                    }
                };
                self.reply(event, &reply).await
            }
            NotifyCommand::Preview => {
                if !self.ensure_privileged(event).await? {
                    return Ok(());
                }
                let message = self.state.event_message()?;
                match self.api_client.send_direct_message(author_id, &message).await {
                    Ok(()) => {
                        self.log_delivery("chat", "preview", 1, 1, 0);
                        self.reply(event, "Preview sent to your DMs.").await
                    }
                    Err(error) => {
                        eprintln!("discord bridge preview delivery failed: {error:#}");
                        self.log_delivery("chat", "preview", 1, 0, 1);
                        self.reply(event, "I can't DM you.").await
                    }
                }
            }
            NotifyCommand::Announce => {
                if !self.ensure_privileged(event).await? {
                    return Ok(());
                }
                match self.run_announce("chat").await {
                    Ok(report) => {
                        self.reply(
                            event,
                            &format!("Message sent to {} users.", report.delivered),
                        )
                        .await
                    }
                    Err(error) => {
                        eprintln!("discord bridge announce failed: {error:#}");
                        self.reply(event, "Announcement failed. Try again later.").await
                    }
                }
            }
            NotifyCommand::AddGroup { name } => {
                if !self.ensure_privileged(event).await? {
                    return Ok(());
                }
                let reply = match self.state.add_tracked_group(&name) {
                    Ok(_) => format!("Added role '{name}' to DM list."),
                    Err(error) => {
                        eprintln!("discord bridge failed to persist tracked roles: {error:#}");
                        STATE_WRITE_FAILED_REPLY.to_string()
                    }
                };
                self.reply(event, &reply).await
            }
            NotifyCommand::RemoveGroup { name } => {
                if !self.ensure_privileged(event).await? {
                    return Ok(());
                }
                let reply = match self.state.remove_tracked_group(&name) {
                    Ok(true) => format!("Removed role '{name}' from DM list."),
                    Ok(false) => "Role not in DM list.".to_string(),
                    Err(error) => {
                        eprintln!("discord bridge failed to persist tracked roles: {error:#}");
                        STATE_WRITE_FAILED_REPLY.to_string()
                    }
                };
                self.reply(event, &reply).await
            }
            NotifyCommand::ListGroups => {
                if !self.ensure_privileged(event).await? {
                    return Ok(());
                }
                let groups = self.state.tracked_groups_sorted()?;
                self.reply(event, &render_tracked_groups(&groups)).await
            }
            NotifyCommand::Status => {
                if !self.ensure_privileged(event).await? {
                    return Ok(());
                }
                let opted_in_count = self.state.opted_in_count()?;
                let reply = match self.api_client.list_guilds().await {
                    Ok(guilds) => render_status_report(guilds.len(), opted_in_count),
                    Err(error) => {
                        eprintln!("discord bridge status query failed: {error:#}");
                        "Status is unavailable right now.".to_string()
                    }
                };
                self.reply(event, &reply).await
            }
            NotifyCommand::Embed { json } => {
                if !self.ensure_privileged(event).await? {
                    return Ok(());
                }
                let raw = match self.resolve_embed_source(event, json).await {
                    Ok(raw) => raw,
                    Err(reply) => return self.reply(event, &reply).await,
                };
                let embeds = match parse_embed_payload(&raw) {
                    Ok(embeds) => embeds,
                    Err(reply) => return self.reply(event, &reply).await,
                };
                match self.send_embeds(author_id, &embeds).await {
                    Ok(()) => self.reply(event, "Embed sent to your DM.").await,
                    Err(error) => {
                        eprintln!("discord bridge embed delivery failed: {error:#}");
                        self.reply(event, "I can't DM you.").await
                    }
                }
            }
            NotifyCommand::Help => {
                self.reply(event, &command_usage(&self.config.command_prefix))
                    .await
            }
            NotifyCommand::Invalid { message } => self.reply(event, &message).await,
        }
    }

    /// Replies "Admins only." and returns false unless the author is
    /// privileged in the message's guild. DMs are never privileged.
    async fn ensure_privileged(&self, event: &DiscordMessageEvent) -> Result<bool> {
        let privileged = match self.is_privileged(event).await {
            Ok(value) => value,
            Err(error) => {
                eprintln!("discord bridge privilege check failed: {error:#}");
                false
            }
        };
        if !privileged {
            self.reply(event, PERMISSION_DENIED_REPLY).await?;
        }
        Ok(privileged)
    }

    async fn is_privileged(&self, event: &DiscordMessageEvent) -> Result<bool> {
        let Some(guild_id) = event.guild_id.as_deref() else {
            return Ok(false);
        };
        let guild = self.api_client.get_guild(guild_id).await?;
        if guild.owner_id == event.author.id {
            return Ok(true);
        }
        let member = self
            .api_client
            .get_guild_member(guild_id, &event.author.id)
            .await?;
        let roles = self.api_client.list_guild_roles(guild_id).await?;
        let permissions_by_role = roles
            .into_iter()
            .map(|role| (role.id, role.permissions))
            .collect::<std::collections::HashMap<_, _>>();
        Ok(member.roles.iter().any(|role_id| {
            permissions_by_role
                .get(role_id)
                .and_then(|permissions| permissions.parse::<u64>().ok())
                .is_some_and(|permissions| permissions & ADMINISTRATOR_PERMISSION != 0)
        }))
    }

    async fn resolve_embed_source(
        &self,
        event: &DiscordMessageEvent,
        inline_json: Option<String>,
    ) -> Result<String, String> {
        if let Some(inline) = inline_json {
            return Ok(inline);
        }
        let Some(attachment) = event.attachments.first() else {
            return Err("Please upload a .json file or paste JSON.".to_string());
        };
        if !attachment.filename.ends_with(".json") {
            return Err("File must be .json".to_string());
        }
        let bytes = self
            .api_client
            .download_attachment(&attachment.url)
            .await
            .map_err(|error| format!("Error: {error:#}"))?;
        String::from_utf8(bytes).map_err(|_| "Error: attachment is not valid UTF-8 text.".to_string())
    }

    async fn send_embeds(&self, user_id: u64, embeds: &[Value]) -> Result<()> {
        let channel_id = self.api_client.create_dm_channel(user_id).await?;
        for embed in embeds {
            self.api_client
                .create_embed_message(&channel_id, std::slice::from_ref(embed))
                .await?;
        }
        Ok(())
    }

    /// Resolves the current recipient set against the live directory and
    /// delivers the event message once per recipient.
    async fn run_announce(&mut self, origin: &'static str) -> Result<fanout::DeliveryReport> {
        let message = self.state.event_message()?;
        let opted_in = self.state.opted_in_snapshot()?;
        let group_names = self.state.resolution_group_names()?;

        let directory = self.api_client.fetch_directory_view().await?;
        let recipients = resolve_recipients(&opted_in, &group_names, &directory);

        let api_client = &self.api_client;
        let report = deliver(&recipients, |user_id| {
            api_client.send_direct_message(user_id, &message)
        })
        .await;

        self.state.update_directory_snapshot(
            directory.guilds.len(),
            tracked_member_count(&group_names, &directory),
        )?;
        self.log_delivery(
            origin,
            "announce",
            report.attempted,
            report.delivered,
            report.failures.len(),
        );
        println!(
            "discord bridge announce: origin={} attempted={} delivered={} failed={}",
            origin,
            report.attempted,
            report.delivered,
            report.failures.len()
        );
        Ok(report)
    }

    async fn handle_control_request(&mut self, request: ControlRequest) {
        let outcome = match request.action {
            ControlAction::PreviewToOwner => self.run_owner_preview().await,
            ControlAction::Announce => match self.run_announce("dashboard").await {
                Ok(report) => ControlOutcome::Announced {
                    delivered: report.delivered,
                },
                Err(error) => {
                    eprintln!("discord bridge dashboard announce failed: {error:#}");
                    ControlOutcome::Failed {
                        reason: error.to_string(),
                    }
                }
            },
        };
        // The reply receiver may already be gone: fire-and-forget previews
        // drop it up front, and a timed-out dashboard wait drops it late.
        let _ = request.reply.send(outcome);
    }

    async fn run_owner_preview(&mut self) -> ControlOutcome {
        let message = match self.state.event_message() {
            Ok(message) => message,
            Err(error) => {
                eprintln!("discord bridge failed to read event message: {error:#}");
                return ControlOutcome::Failed {
                    reason: error.to_string(),
                };
            }
        };
        let owner_id = match self.api_client.get_application_owner().await {
            Ok(owner_id) => owner_id,
            Err(error) => {
                eprintln!("discord bridge failed to resolve application owner: {error:#}");
                return ControlOutcome::Failed {
                    reason: error.to_string(),
                };
            }
        };
        match self.api_client.send_direct_message(owner_id, &message).await {
            Ok(()) => {
                self.log_delivery("dashboard", "preview", 1, 1, 0);
                ControlOutcome::PreviewSent
            }
            Err(error) => {
                eprintln!("discord bridge owner preview failed: {error:#}");
                self.log_delivery("dashboard", "preview", 1, 0, 1);
                ControlOutcome::Failed {
                    reason: error.to_string(),
                }
            }
        }
    }

    async fn reply(&self, event: &DiscordMessageEvent, text: &str) -> Result<()> {
        self.api_client
            .create_message(&event.channel_id, text)
            .await
    }

    fn log_delivery(
        &self,
        origin: &'static str,
        action: &'static str,
        attempted: usize,
        delivered: usize,
        failed: usize,
    ) {
        let record = DeliveryLogRecord {
            timestamp_unix_ms: herald_core::current_unix_timestamp_ms(),
            origin,
            action,
            attempted,
            delivered,
            failed,
        };
        if let Err(error) = self.delivery_log.append(&record) {
            eprintln!("discord bridge failed to append delivery log: {error:#}");
        }
    }
}

async fn send_gateway_frame<S>(sink: &mut S, frame: Value, operation: &str) -> Result<()>
where
    S: futures_util::Sink<WsMessage> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    use futures_util::SinkExt;

    sink.send(WsMessage::Text(frame.to_string().into()))
        .await
        .with_context(|| format!("failed to send discord gateway {operation}"))
}

fn parse_gateway_envelope(message: WsMessage) -> Result<Option<GatewayEnvelope>> {
    match message {
        WsMessage::Text(text) => {
            let envelope = serde_json::from_str::<GatewayEnvelope>(text.as_str())
                .context("failed to parse discord gateway frame")?;
            Ok(Some(envelope))
        }
        _ => Ok(None),
    }
}
