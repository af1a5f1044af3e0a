//! Discord REST API client used by gateway dispatch and fan-out delivery.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use super::discord_render_helpers::{truncate_for_discord, truncate_for_error};
use super::fanout::{DirectoryView, GuildDirectory, MemberDirectory, RoleDirectory};

const GUILD_MEMBERS_PAGE_LIMIT: usize = 1_000;
const DISCORD_MESSAGE_MAX_CHARS: usize = 2_000;

#[derive(Debug, Clone, Deserialize)]
struct GatewayBotResponse {
    url: String,
}

#[derive(Debug, Clone, Deserialize)]
struct DmChannelResponse {
    id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(super) struct DiscordGuildSummary {
    pub(super) id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(super) struct DiscordGuild {
    pub(super) owner_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(super) struct DiscordRole {
    pub(super) id: String,
    pub(super) name: String,
    #[serde(default)]
    pub(super) permissions: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(super) struct MemberUserRef {
    pub(super) id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(super) struct DiscordGuildMember {
    pub(super) user: MemberUserRef,
    #[serde(default)]
    pub(super) roles: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ApplicationResponse {
    owner: MemberUserRef,
}

#[derive(Clone)]
pub(super) struct DiscordApiClient {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
}

impl DiscordApiClient {
    pub(super) fn new(
        api_base: String,
        bot_token: String,
        request_timeout_ms: u64,
        retry_max_attempts: usize,
        retry_base_delay_ms: u64,
    ) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("herald-discord-bridge"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(request_timeout_ms.max(1)))
            .build()
            .context("failed to create discord api client")?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token: bot_token.trim().to_string(),
            retry_max_attempts: retry_max_attempts.max(1),
            retry_base_delay_ms: retry_base_delay_ms.max(1),
        })
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.header(
            reqwest::header::AUTHORIZATION,
            format!("Bot {}", self.bot_token),
        )
    }

    pub(super) async fn get_gateway_url(&self) -> Result<String> {
        let response: GatewayBotResponse = self
            .request_json("gateway resolution", || {
                self.authorized(self.http.get(format!("{}/gateway/bot", self.api_base)))
            })
            .await?;
        let url = response.url.trim().to_string();
        if url.is_empty() {
            bail!("discord gateway resolution did not return a url");
        }
        Ok(url)
    }

    /// Opens (or reuses) the DM channel with a user and returns its id.
    pub(super) async fn create_dm_channel(&self, user_id: u64) -> Result<String> {
        let payload = json!({ "recipient_id": user_id.to_string() });
        let response: DmChannelResponse = self
            .request_json("dm channel create", || {
                self.authorized(
                    self.http
                        .post(format!("{}/users/@me/channels", self.api_base))
                        .json(&payload),
                )
            })
            .await?;
        if response.id.trim().is_empty() {
            bail!("discord dm channel create did not return a channel id");
        }
        Ok(response.id)
    }

    pub(super) async fn create_message(&self, channel_id: &str, content: &str) -> Result<()> {
        let payload = json!({
            "content": truncate_for_discord(content, DISCORD_MESSAGE_MAX_CHARS),
        });
        let _: Value = self
            .request_json("message create", || {
                self.authorized(
                    self.http
                        .post(format!(
                            "{}/channels/{}/messages",
                            self.api_base, channel_id
                        ))
                        .json(&payload),
                )
            })
            .await?;
        Ok(())
    }

    /// Forwards embed objects opaquely; Discord validates their shape.
    pub(super) async fn create_embed_message(
        &self,
        channel_id: &str,
        embeds: &[Value],
    ) -> Result<()> {
        let payload = json!({ "embeds": embeds });
        let _: Value = self
            .request_json("embed message create", || {
                self.authorized(
                    self.http
                        .post(format!(
                            "{}/channels/{}/messages",
                            self.api_base, channel_id
                        ))
                        .json(&payload),
                )
            })
            .await?;
        Ok(())
    }

    pub(super) async fn send_direct_message(&self, user_id: u64, content: &str) -> Result<()> {
        let channel_id = self.create_dm_channel(user_id).await?;
        self.create_message(&channel_id, content).await
    }

    pub(super) async fn list_guilds(&self) -> Result<Vec<DiscordGuildSummary>> {
        self.request_json("guild list", || {
            self.authorized(self.http.get(format!("{}/users/@me/guilds", self.api_base)))
        })
        .await
    }

    pub(super) async fn get_guild(&self, guild_id: &str) -> Result<DiscordGuild> {
        self.request_json("guild fetch", || {
            self.authorized(
                self.http
                    .get(format!("{}/guilds/{}", self.api_base, guild_id)),
            )
        })
        .await
    }

    pub(super) async fn list_guild_roles(&self, guild_id: &str) -> Result<Vec<DiscordRole>> {
        self.request_json("guild roles list", || {
            self.authorized(
                self.http
                    .get(format!("{}/guilds/{}/roles", self.api_base, guild_id)),
            )
        })
        .await
    }

    pub(super) async fn get_guild_member(
        &self,
        guild_id: &str,
        user_id: &str,
    ) -> Result<DiscordGuildMember> {
        self.request_json("guild member fetch", || {
            self.authorized(self.http.get(format!(
                "{}/guilds/{}/members/{}",
                self.api_base, guild_id, user_id
            )))
        })
        .await
    }

    pub(super) async fn list_guild_members(
        &self,
        guild_id: &str,
    ) -> Result<Vec<DiscordGuildMember>> {
        let mut members = Vec::new();
        let mut after = "0".to_string();
        loop {
            let batch: Vec<DiscordGuildMember> = self
                .request_json("guild members list", || {
                    self.authorized(
                        self.http
                            .get(format!(
                                "{}/guilds/{}/members",
                                self.api_base, guild_id
                            ))
                            .query(&[
                                ("limit", GUILD_MEMBERS_PAGE_LIMIT.to_string()),
                                ("after", after.clone()),
                            ]),
                    )
                })
                .await?;
            let batch_len = batch.len();
            if let Some(last) = batch.last() {
                after = last.user.id.clone();
            }
            members.extend(batch);
            if batch_len < GUILD_MEMBERS_PAGE_LIMIT {
                break;
            }
        }
        Ok(members)
    }

    pub(super) async fn get_application_owner(&self) -> Result<u64> {
        let response: ApplicationResponse = self
            .request_json("application fetch", || {
                self.authorized(
                    self.http
                        .get(format!("{}/oauth2/applications/@me", self.api_base)),
                )
            })
            .await?;
        response
            .owner
            .id
            .parse::<u64>()
            .map_err(|_| anyhow!("discord application owner id is not numeric"))
    }

    /// Walks every guild's roles and member rosters into a directory view.
    pub(super) async fn fetch_directory_view(&self) -> Result<DirectoryView> {
        let mut guilds = Vec::new();
        for guild in self.list_guilds().await? {
            let roles = self
                .list_guild_roles(&guild.id)
                .await?
                .into_iter()
                .map(|role| RoleDirectory {
                    id: role.id,
                    name: role.name,
                })
                .collect();
            let members = self
                .list_guild_members(&guild.id)
                .await?
                .into_iter()
                .filter_map(|member| {
                    let user_id = member.user.id.parse::<u64>().ok()?;
                    Some(MemberDirectory {
                        user_id,
                        role_ids: member.roles,
                    })
                })
                .collect();
            guilds.push(GuildDirectory {
                guild_id: guild.id,
                roles,
                members,
            });
        }
        Ok(DirectoryView { guilds })
    }

    /// Attachment CDN downloads carry no bot auth.
    pub(super) async fn download_attachment(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .context("failed to download discord attachment")?;
        let status = response.status();
        if !status.is_success() {
            bail!(
                "discord attachment download failed with status {}",
                status.as_u16()
            );
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn request_json<T, F>(&self, operation: &str, mut builder: F) -> Result<T>
    where
        T: DeserializeOwned,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let response = builder()
                .header("x-herald-retry-attempt", attempt.saturating_sub(1).to_string())
                .send()
                .await;
            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.json::<T>().await.with_context(|| {
                            format!("failed to decode discord {operation} response")
                        });
                    }

                    let retry_after = parse_retry_after(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    if attempt < self.retry_max_attempts && is_retryable_status(status.as_u16()) {
                        tokio::time::sleep(retry_delay(
                            self.retry_base_delay_ms,
                            attempt,
                            retry_after,
                        ))
                        .await;
                        continue;
                    }

                    bail!(
                        "discord api {operation} failed with status {}: {}",
                        status.as_u16(),
                        truncate_for_error(&body, 800)
                    );
                }
                Err(error) => {
                    if attempt < self.retry_max_attempts && is_retryable_transport_error(&error) {
                        tokio::time::sleep(retry_delay(self.retry_base_delay_ms, attempt, None))
                            .await;
                        continue;
                    }
                    return Err(error)
                        .with_context(|| format!("discord api {operation} request failed"));
                }
            }
        }
    }
}

pub(super) fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

fn is_retryable_transport_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect()
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let value = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?;
    let seconds = value.trim().parse::<f64>().ok()?;
    if seconds.is_finite() && seconds >= 0.0 {
        Some(Duration::from_secs_f64(seconds))
    } else {
        None
    }
}

pub(super) fn retry_delay(
    base_delay_ms: u64,
    attempt: usize,
    retry_after: Option<Duration>,
) -> Duration {
    if let Some(delay) = retry_after {
        return delay;
    }
    let exponent = attempt.saturating_sub(1).min(6) as u32;
    Duration::from_millis(base_delay_ms.max(1).saturating_mul(1_u64 << exponent))
}
