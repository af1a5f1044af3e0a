//! Prefix-command parsing and embed-payload validation helpers.

use serde_json::Value;

use super::NotifyCommand;

pub(super) fn command_usage(prefix: &str) -> String {
    [
        "Supported commands:".to_string(),
        format!("- `{prefix}notifyme` - subscribe to event DMs"),
        format!("- `{prefix}stopnotify` - unsubscribe"),
        format!("- `{prefix}setmessage <text>` - set the event message (admin)"),
        format!("- `{prefix}previewevent` - preview in your DMs (admin)"),
        format!("- `{prefix}announceevent` - send to all opted-in/role users (admin)"),
        format!("- `{prefix}addrole <name>` - add a role to the DM list (admin)"),
        format!("- `{prefix}removerole <name>` - remove a role from the DM list (admin)"),
        format!("- `{prefix}listroles` - list roles in the DM list (admin)"),
        format!("- `{prefix}status` - guild and opt-in counts (admin)"),
        format!(
            "- `{prefix}eventembed <json>` - DM yourself an embed payload (admin; a .json attachment also works)"
        ),
        format!("- `{prefix}helpme` - this list"),
    ]
    .join("\n")
}

/// Parses a chat message into a notify command. Messages without the prefix
/// and unknown command words are ignored, not answered.
pub(super) fn parse_notify_command(prefix: &str, content: &str) -> Option<NotifyCommand> {
    let trimmed = content.trim();
    let stripped = trimmed.strip_prefix(prefix)?;
    if stripped.is_empty() || stripped.starts_with(char::is_whitespace) {
        return None;
    }
    let mut parts = stripped.splitn(2, char::is_whitespace);
    let command = parts.next().unwrap_or_default();
    let remainder = parts.next().unwrap_or_default().trim();

    let parsed = match command {
        "notifyme" => exact(NotifyCommand::Subscribe, remainder, prefix, "notifyme"),
        "stopnotify" => exact(NotifyCommand::Unsubscribe, remainder, prefix, "stopnotify"),
        "setmessage" => {
            if remainder.is_empty() {
                usage_error(prefix, "setmessage <text>")
            } else {
                NotifyCommand::SetMessage {
                    text: remainder.to_string(),
                }
            }
        }
        "previewevent" => exact(NotifyCommand::Preview, remainder, prefix, "previewevent"),
        "announceevent" => exact(NotifyCommand::Announce, remainder, prefix, "announceevent"),
        "addrole" => {
            if remainder.is_empty() {
                usage_error(prefix, "addrole <role name>")
            } else {
                NotifyCommand::AddGroup {
                    name: remainder.to_string(),
                }
            }
        }
        "removerole" => {
            if remainder.is_empty() {
                usage_error(prefix, "removerole <role name>")
            } else {
                NotifyCommand::RemoveGroup {
                    name: remainder.to_string(),
                }
            }
        }
        "listroles" => exact(NotifyCommand::ListGroups, remainder, prefix, "listroles"),
        "status" => exact(NotifyCommand::Status, remainder, prefix, "status"),
        "eventembed" => NotifyCommand::Embed {
            json: if remainder.is_empty() {
                None
            } else {
                Some(remainder.to_string())
            },
        },
        "helpme" => exact(NotifyCommand::Help, remainder, prefix, "helpme"),
        _ => return None,
    };
    Some(parsed)
}

fn exact(command: NotifyCommand, remainder: &str, prefix: &str, word: &str) -> NotifyCommand {
    if remainder.is_empty() {
        command
    } else {
        usage_error(prefix, word)
    }
}

fn usage_error(prefix: &str, usage: &str) -> NotifyCommand {
    NotifyCommand::Invalid {
        message: format!("Usage: {prefix}{usage}"),
    }
}

/// Validates a structured-content payload: a top-level `embeds` array whose
/// elements are forwarded opaquely. Errors are user-facing reply text.
pub(super) fn parse_embed_payload(raw: &str) -> Result<Vec<Value>, String> {
    let value =
        serde_json::from_str::<Value>(raw).map_err(|error| format!("Error: {error}"))?;
    match value.get("embeds").and_then(Value::as_array) {
        Some(embeds) => Ok(embeds.clone()),
        None => Err("Invalid embed JSON.".to_string()),
    }
}
