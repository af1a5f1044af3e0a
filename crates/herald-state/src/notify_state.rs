//! Durable notify-state documents and the shared in-process state object.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use herald_core::{current_unix_timestamp_ms, write_text_atomic};

/// Message delivered when no privileged actor has set one yet.
pub const DEFAULT_EVENT_MESSAGE: &str = "Default event message.";

/// Role name that always receives deliveries, even when untracked.
pub const DEFAULT_TRACKED_GROUP: &str = "Notified about Events";

const EVENT_MESSAGE_FILE: &str = "event_message.json";
const OPTED_IN_FILE: &str = "opted_in.json";
const TRACKED_GROUPS_FILE: &str = "tracked_groups.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EventMessageDocument {
    message: String,
}

/// Load/save access to the three notify-state documents under one state dir.
pub struct NotifyStateStore {
    state_dir: PathBuf,
}

impl NotifyStateStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    fn document_path(&self, file_name: &str) -> PathBuf {
        self.state_dir.join(file_name)
    }

    fn read_document(&self, file_name: &str) -> Result<Option<String>> {
        let path = self.document_path(file_name);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(Some(raw))
    }

    fn write_document(&self, file_name: &str, payload: &str) -> Result<()> {
        let path = self.document_path(file_name);
        let mut content = payload.to_string();
        content.push('\n');
        write_text_atomic(&path, &content)
            .with_context(|| format!("failed to write {}", path.display()))
    }

    pub fn load_event_message(&self) -> Result<Option<String>> {
        let Some(raw) = self.read_document(EVENT_MESSAGE_FILE)? else {
            return Ok(None);
        };
        let document = serde_json::from_str::<EventMessageDocument>(&raw)
            .with_context(|| format!("failed to parse {EVENT_MESSAGE_FILE}"))?;
        Ok(Some(document.message))
    }

    pub fn save_event_message(&self, message: &str) -> Result<()> {
        let document = EventMessageDocument {
            message: message.to_string(),
        };
        let payload = serde_json::to_string_pretty(&document)
            .context("failed to serialize event message document")?;
        self.write_document(EVENT_MESSAGE_FILE, &payload)
    }

    pub fn load_opted_in(&self) -> Result<Option<HashSet<u64>>> {
        let Some(raw) = self.read_document(OPTED_IN_FILE)? else {
            return Ok(None);
        };
        let user_ids = serde_json::from_str::<Vec<u64>>(&raw)
            .with_context(|| format!("failed to parse {OPTED_IN_FILE}"))?;
        Ok(Some(user_ids.into_iter().collect()))
    }

    pub fn save_opted_in(&self, opted_in: &HashSet<u64>) -> Result<()> {
        let mut user_ids = opted_in.iter().copied().collect::<Vec<_>>();
        user_ids.sort_unstable();
        let payload = serde_json::to_string_pretty(&user_ids)
            .context("failed to serialize opted-in document")?;
        self.write_document(OPTED_IN_FILE, &payload)
    }

    pub fn load_tracked_groups(&self) -> Result<Option<HashSet<String>>> {
        let Some(raw) = self.read_document(TRACKED_GROUPS_FILE)? else {
            return Ok(None);
        };
        let names = serde_json::from_str::<Vec<String>>(&raw)
            .with_context(|| format!("failed to parse {TRACKED_GROUPS_FILE}"))?;
        Ok(Some(names.into_iter().collect()))
    }

    pub fn save_tracked_groups(&self, groups: &HashSet<String>) -> Result<()> {
        let mut names = groups.iter().cloned().collect::<Vec<_>>();
        names.sort();
        let payload = serde_json::to_string_pretty(&names)
            .context("failed to serialize tracked-groups document")?;
        self.write_document(TRACKED_GROUPS_FILE, &payload)
    }
}

/// Stale-tolerant directory stats for the dashboard renderer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectorySnapshot {
    pub updated_unix_ms: u64,
    pub guild_count: usize,
    pub tracked_member_count: usize,
}

#[derive(Debug)]
struct NotifyState {
    event_message: String,
    opted_in: HashSet<u64>,
    tracked_groups: HashSet<String>,
    directory: DirectorySnapshot,
}

/// Shared mutable notify state. Every mutation persists synchronously through
/// the backing store before returning; readers take point-in-time snapshots.
#[derive(Clone)]
pub struct SharedNotifyState {
    store: Arc<NotifyStateStore>,
    inner: Arc<Mutex<NotifyState>>,
}

impl SharedNotifyState {
    /// Loads the three documents, falling back to defaults for missing files.
    pub fn load(store: NotifyStateStore) -> Result<Self> {
        let event_message = store
            .load_event_message()?
            .unwrap_or_else(|| DEFAULT_EVENT_MESSAGE.to_string());
        let opted_in = store.load_opted_in()?.unwrap_or_default();
        let tracked_groups = store.load_tracked_groups()?.unwrap_or_default();
        Ok(Self {
            store: Arc::new(store),
            inner: Arc::new(Mutex::new(NotifyState {
                event_message,
                opted_in,
                tracked_groups,
                directory: DirectorySnapshot::default(),
            })),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, NotifyState>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("notify state mutex is poisoned"))
    }

    pub fn event_message(&self) -> Result<String> {
        Ok(self.lock()?.event_message.clone())
    }

    pub fn set_event_message(&self, message: &str) -> Result<()> {
        let mut state = self.lock()?;
        state.event_message = message.to_string();
        self.store.save_event_message(&state.event_message)
    }

    /// Returns true when the user was not already opted in.
    pub fn subscribe(&self, user_id: u64) -> Result<bool> {
        let mut state = self.lock()?;
        let inserted = state.opted_in.insert(user_id);
        self.store.save_opted_in(&state.opted_in)?;
        Ok(inserted)
    }

    /// Returns true when the user had been opted in.
    pub fn unsubscribe(&self, user_id: u64) -> Result<bool> {
        let mut state = self.lock()?;
        let removed = state.opted_in.remove(&user_id);
        self.store.save_opted_in(&state.opted_in)?;
        Ok(removed)
    }

    pub fn opted_in_count(&self) -> Result<usize> {
        Ok(self.lock()?.opted_in.len())
    }

    pub fn opted_in_snapshot(&self) -> Result<HashSet<u64>> {
        Ok(self.lock()?.opted_in.clone())
    }

    /// Returns true when the name was not already tracked.
    pub fn add_tracked_group(&self, name: &str) -> Result<bool> {
        let mut state = self.lock()?;
        let inserted = state.tracked_groups.insert(name.to_string());
        self.store.save_tracked_groups(&state.tracked_groups)?;
        Ok(inserted)
    }

    /// Returns false without persisting when the name was never tracked.
    pub fn remove_tracked_group(&self, name: &str) -> Result<bool> {
        let mut state = self.lock()?;
        if !state.tracked_groups.remove(name) {
            return Ok(false);
        }
        self.store.save_tracked_groups(&state.tracked_groups)?;
        Ok(true)
    }

    pub fn tracked_groups_sorted(&self) -> Result<Vec<String>> {
        let state = self.lock()?;
        let mut names = state.tracked_groups.iter().cloned().collect::<Vec<_>>();
        names.sort();
        Ok(names)
    }

    /// Tracked names plus the built-in default group, as used at resolution time.
    pub fn resolution_group_names(&self) -> Result<HashSet<String>> {
        let state = self.lock()?;
        let mut names = state.tracked_groups.clone();
        names.insert(DEFAULT_TRACKED_GROUP.to_string());
        Ok(names)
    }

    pub fn directory_snapshot(&self) -> Result<DirectorySnapshot> {
        Ok(self.lock()?.directory)
    }

    pub fn update_directory_snapshot(
        &self,
        guild_count: usize,
        tracked_member_count: usize,
    ) -> Result<()> {
        let mut state = self.lock()?;
        state.directory = DirectorySnapshot {
            updated_unix_ms: current_unix_timestamp_ms(),
            guild_count,
            tracked_member_count,
        };
        Ok(())
    }

    /// Rewrites all three documents from the in-memory state.
    pub fn flush(&self) -> Result<()> {
        let state = self.lock()?;
        self.store.save_event_message(&state.event_message)?;
        self.store.save_opted_in(&state.opted_in)?;
        self.store.save_tracked_groups(&state.tracked_groups)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_in(dir: &Path) -> SharedNotifyState {
        SharedNotifyState::load(NotifyStateStore::new(dir)).expect("load state")
    }

    #[test]
    fn unit_missing_documents_fall_back_to_defaults() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let state = state_in(tempdir.path());
        assert_eq!(state.event_message().expect("message"), DEFAULT_EVENT_MESSAGE);
        assert_eq!(state.opted_in_count().expect("count"), 0);
        assert!(state.tracked_groups_sorted().expect("groups").is_empty());
    }

    #[test]
    fn functional_event_message_persists_and_reloads() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let state = state_in(tempdir.path());
        state
            .set_event_message("Party tonight!")
            .expect("set message");

        let reloaded = state_in(tempdir.path());
        assert_eq!(reloaded.event_message().expect("message"), "Party tonight!");
    }

    #[test]
    fn functional_subscribe_then_unsubscribe_round_trips_through_disk() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let state = state_in(tempdir.path());

        assert!(state.subscribe(42).expect("subscribe"));
        assert!(!state.subscribe(42).expect("subscribe twice"));
        let reloaded = state_in(tempdir.path());
        assert_eq!(
            reloaded.opted_in_snapshot().expect("snapshot"),
            HashSet::from([42])
        );

        assert!(state.unsubscribe(42).expect("unsubscribe"));
        assert!(!state.unsubscribe(42).expect("unsubscribe twice"));
        let reloaded = state_in(tempdir.path());
        assert_eq!(reloaded.opted_in_count().expect("count"), 0);
    }

    #[test]
    fn functional_opted_in_document_is_a_raw_id_array() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let state = state_in(tempdir.path());
        state.subscribe(7).expect("subscribe");
        state.subscribe(3).expect("subscribe");

        let raw = std::fs::read_to_string(tempdir.path().join("opted_in.json")).expect("read");
        let parsed = serde_json::from_str::<Vec<u64>>(&raw).expect("parse");
        assert_eq!(parsed, vec![3, 7]);
    }

    #[test]
    fn functional_tracked_groups_round_trip() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let state = state_in(tempdir.path());
        assert!(state.add_tracked_group("VIP").expect("add"));
        assert!(!state.add_tracked_group("VIP").expect("add twice"));

        let reloaded = state_in(tempdir.path());
        assert_eq!(
            reloaded.tracked_groups_sorted().expect("groups"),
            vec!["VIP".to_string()]
        );
        assert!(reloaded.remove_tracked_group("VIP").expect("remove"));
        assert!(!reloaded.remove_tracked_group("VIP").expect("remove twice"));
    }

    #[test]
    fn regression_remove_untracked_group_writes_nothing() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let state = state_in(tempdir.path());
        assert!(!state.remove_tracked_group("Ghost").expect("remove"));
        assert!(!tempdir.path().join("tracked_groups.json").exists());
    }

    #[test]
    fn unit_resolution_group_names_always_include_the_default() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let state = state_in(tempdir.path());
        state.add_tracked_group("VIP").expect("add");

        let names = state.resolution_group_names().expect("names");
        assert!(names.contains(DEFAULT_TRACKED_GROUP));
        assert!(names.contains("VIP"));
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn unit_directory_snapshot_updates_in_memory_only() {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let state = state_in(tempdir.path());
        state
            .update_directory_snapshot(2, 15)
            .expect("update snapshot");

        let snapshot = state.directory_snapshot().expect("snapshot");
        assert_eq!(snapshot.guild_count, 2);
        assert_eq!(snapshot.tracked_member_count, 15);
        assert!(snapshot.updated_unix_ms > 0);
    }
}
