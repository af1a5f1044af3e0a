//! Reply rendering and text-bounding helpers for the Discord bridge.

pub(super) fn render_status_report(guild_count: usize, opted_in_count: usize) -> String {
    [
        "Herald status".to_string(),
        format!("Servers: {guild_count}"),
        format!("Opted-in users: {opted_in_count}"),
        "Online: yes".to_string(),
    ]
    .join("\n")
}

pub(super) fn render_tracked_groups(groups: &[String]) -> String {
    if groups.is_empty() {
        return "No roles are currently set to receive DMs.".to_string();
    }
    format!("Roles to be DMed:\n{}", groups.join("\n"))
}

pub(super) fn truncate_for_discord(text: &str, max_chars: usize) -> String {
    truncate_chars(text, max_chars)
}

pub(super) fn truncate_for_error(text: &str, max_chars: usize) -> String {
    truncate_chars(text.trim(), max_chars)
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut truncated = text.chars().take(keep).collect::<String>();
    truncated.push_str("...");
    truncated
}
