//! Recipient resolution and dedup-aware fan-out delivery.

use std::collections::HashSet;
use std::future::Future;

use anyhow::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct RoleDirectory {
    pub(super) id: String,
    pub(super) name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct MemberDirectory {
    pub(super) user_id: u64,
    pub(super) role_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct GuildDirectory {
    pub(super) guild_id: String,
    pub(super) roles: Vec<RoleDirectory>,
    pub(super) members: Vec<MemberDirectory>,
}

/// Point-in-time view of guild rosters, rebuilt on every delivery trigger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(super) struct DirectoryView {
    pub(super) guilds: Vec<GuildDirectory>,
}

#[derive(Debug, Clone)]
pub(super) struct DeliveryFailure {
    pub(super) user_id: u64,
    pub(super) reason: String,
}

/// Outcome of one fan-out run. The user-visible result is `delivered`; the
/// failure list exists for diagnostics only.
#[derive(Debug, Clone, Default)]
pub(super) struct DeliveryReport {
    pub(super) attempted: usize,
    pub(super) delivered: usize,
    pub(super) failures: Vec<DeliveryFailure>,
}

/// Computes the deduplicated delivery list: every opted-in user, plus every
/// member of a role whose name is tracked, each id at most once.
pub(super) fn resolve_recipients(
    opted_in: &HashSet<u64>,
    group_names: &HashSet<String>,
    directory: &DirectoryView,
) -> Vec<u64> {
    let mut seen = HashSet::new();
    let mut recipients = Vec::new();
    for &user_id in opted_in {
        if seen.insert(user_id) {
            recipients.push(user_id);
        }
    }
    for guild in &directory.guilds {
        let tracked_role_ids = guild
            .roles
            .iter()
            .filter(|role| group_names.contains(&role.name))
            .map(|role| role.id.as_str())
            .collect::<HashSet<_>>();
        if tracked_role_ids.is_empty() {
            continue;
        }
        for member in &guild.members {
            let carries_tracked_role = member
                .role_ids
                .iter()
                .any(|role_id| tracked_role_ids.contains(role_id.as_str()));
            if !carries_tracked_role {
                continue;
            }
            if seen.insert(member.user_id) {
                recipients.push(member.user_id);
            }
        }
    }
    recipients
}

/// Distinct members carrying a tracked role, across all guilds.
pub(super) fn tracked_member_count(
    group_names: &HashSet<String>,
    directory: &DirectoryView,
) -> usize {
    let mut seen = HashSet::new();
    for guild in &directory.guilds {
        let tracked_role_ids = guild
            .roles
            .iter()
            .filter(|role| group_names.contains(&role.name))
            .map(|role| role.id.as_str())
            .collect::<HashSet<_>>();
        if tracked_role_ids.is_empty() {
            continue;
        }
        for member in &guild.members {
            if member
                .role_ids
                .iter()
                .any(|role_id| tracked_role_ids.contains(role_id.as_str()))
            {
                seen.insert(member.user_id);
            }
        }
    }
    seen.len()
}

/// Attempts exactly one send per recipient. A failed send is recorded and
/// skipped; it never aborts the remaining iteration. No retries.
pub(super) async fn deliver<F, Fut>(recipients: &[u64], mut send: F) -> DeliveryReport
where
    F: FnMut(u64) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let mut report = DeliveryReport {
        attempted: recipients.len(),
        ..DeliveryReport::default()
    };
    for &recipient in recipients {
        match send(recipient).await {
            Ok(()) => report.delivered += 1,
            Err(error) => report.failures.push(DeliveryFailure {
                user_id: recipient,
                reason: error.to_string(),
            }),
        }
    }
    report
}
