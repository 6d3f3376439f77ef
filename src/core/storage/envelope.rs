use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::repository::KeyValueStore;
use crate::core::config::QueueConfig;
use crate::core::queue::builder::select_active_folder_id;
use crate::core::queue::retention::{prune_folders, RetentionPolicy};
use crate::core::queue::{FolderQueueEntry, QueueStatus};

/// The whole persisted queue state. Serialized field names are part of the
/// stored format; changing them requires a new schema version.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimelineCacheEnvelope {
    pub version: u32,
    /// Milliseconds since epoch, `0` when never synced.
    pub last_synced: i64,
    pub active_folder_id: Option<i64>,
    pub folders: BTreeMap<i64, FolderQueueEntry>,
    pub pending_read_ids: BTreeSet<i64>,
    pub pending_skip_folder_ids: BTreeSet<i64>,
}

impl TimelineCacheEnvelope {
    /// Entries in queue order.
    pub fn queue(&self) -> Vec<FolderQueueEntry> {
        let mut entries: Vec<FolderQueueEntry> = self.folders.values().cloned().collect();
        entries.sort_by(|left, right| {
            left.sort_order
                .cmp(&right.sort_order)
                .then_with(|| left.id.cmp(&right.id))
        });
        entries
    }

    pub fn active_folder(&self) -> Option<&FolderQueueEntry> {
        self.active_folder_id.and_then(|id| self.folders.get(&id))
    }

    pub fn replace_folders<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = FolderQueueEntry>,
    {
        self.folders = entries.into_iter().map(|entry| (entry.id, entry)).collect();
    }
}

pub fn create_empty_timeline_cache(version: u32) -> TimelineCacheEnvelope {
    TimelineCacheEnvelope {
        version,
        ..TimelineCacheEnvelope::default()
    }
}

/// Parses a stored envelope. Anything that is not a JSON object carrying
/// `version` yields `None`; other malformed fields fall back to defaults.
pub fn parse_timeline_cache(raw: &str, version: u32) -> Option<TimelineCacheEnvelope> {
    let value: Value = serde_json::from_str(raw).ok()?;
    let object = value.as_object()?;
    let stored_version = object.get("version").and_then(Value::as_u64)?;
    if stored_version != u64::from(version) {
        debug!("discarding timeline cache with version {stored_version}, expected {version}");
        return None;
    }

    let mut folders = BTreeMap::new();
    if let Some(raw_folders) = object.get("folders").and_then(Value::as_object) {
        for (key, raw_entry) in raw_folders {
            let Ok(id) = key.trim().parse::<i64>() else {
                continue;
            };
            match serde_json::from_value::<FolderQueueEntry>(raw_entry.clone()) {
                Ok(mut entry) => {
                    entry.id = id;
                    folders.insert(id, entry);
                }
                Err(error) => debug!("dropping malformed cached folder {id}: {error}"),
            }
        }
    }

    Some(normalize_timeline_cache(TimelineCacheEnvelope {
        version,
        last_synced: object.get("lastSynced").and_then(lenient_id).unwrap_or(0),
        active_folder_id: object.get("activeFolderId").and_then(lenient_id),
        folders,
        pending_read_ids: object
            .get("pendingReadIds")
            .map(lenient_ids)
            .unwrap_or_default(),
        pending_skip_folder_ids: object
            .get("pendingSkipFolderIds")
            .map(lenient_ids)
            .unwrap_or_default(),
    }))
}

/// Re-keys entries by their map key and re-derives unread counts. Only
/// `queued` and `skipped` are stored; the active folder is `active_folder_id`.
/// Running it twice changes nothing.
pub fn normalize_timeline_cache(mut envelope: TimelineCacheEnvelope) -> TimelineCacheEnvelope {
    for (id, entry) in envelope.folders.iter_mut() {
        entry.id = *id;
        entry.refresh_unread_count();
        if entry.status != QueueStatus::Skipped {
            entry.status = QueueStatus::Queued;
        }
    }
    envelope.last_synced = envelope.last_synced.max(0);
    envelope
}

/// Retention pass applied after every load and before every store.
pub fn prune_timeline_cache(
    envelope: TimelineCacheEnvelope,
    now: i64,
    policy: &RetentionPolicy,
) -> TimelineCacheEnvelope {
    let mut envelope = normalize_timeline_cache(envelope);
    let folders = std::mem::take(&mut envelope.folders);
    let entries = prune_folders(folders.into_values(), now, policy);

    envelope.active_folder_id = select_active_folder_id(&entries, envelope.active_folder_id);
    envelope.replace_folders(entries);

    let folders = &envelope.folders;
    envelope
        .pending_skip_folder_ids
        .retain(|id| folders.contains_key(id));

    if envelope.last_synced > 0
        && now.saturating_sub(envelope.last_synced) > policy.stale_sync_window_ms()
    {
        envelope.last_synced = 0;
    }
    envelope
}

fn lenient_id(value: &Value) -> Option<i64> {
    if let Some(id) = value.as_i64() {
        return Some(id);
    }
    let float = value.as_f64()?;
    (float.is_finite() && float.fract() == 0.0 && float.abs() < i64::MAX as f64)
        .then_some(float as i64)
}

fn lenient_ids(value: &Value) -> BTreeSet<i64> {
    value
        .as_array()
        .map(|values| values.iter().filter_map(lenient_id).collect())
        .unwrap_or_default()
}

/// Owns the persisted envelope under one storage key. Storage failures are
/// logged and degrade to an empty cache; they never reach the caller.
#[derive(Debug)]
pub struct TimelineCacheStore<S> {
    backend: S,
    config: QueueConfig,
}

impl<S: KeyValueStore> TimelineCacheStore<S> {
    pub fn new(backend: S, config: QueueConfig) -> Self {
        Self { backend, config }
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn create_empty(&self) -> TimelineCacheEnvelope {
        create_empty_timeline_cache(self.config.schema_version)
    }

    pub fn prune(&self, envelope: TimelineCacheEnvelope, now: i64) -> TimelineCacheEnvelope {
        prune_timeline_cache(envelope, now, &self.config.retention())
    }

    pub async fn load(&self, now: i64) -> TimelineCacheEnvelope {
        let raw = match self.backend.get(&self.config.storage_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return self.create_empty(),
            Err(error) => {
                warn!("timeline cache unavailable, starting empty: {error}");
                return self.create_empty();
            }
        };
        match parse_timeline_cache(&raw, self.config.schema_version) {
            Some(envelope) => self.prune(envelope, now),
            None => self.create_empty(),
        }
    }

    /// Prunes `envelope`, writes it and returns what was written.
    pub async fn store(&self, envelope: TimelineCacheEnvelope, now: i64) -> TimelineCacheEnvelope {
        let pruned = self.prune(envelope, now);
        match serde_json::to_string(&pruned) {
            Ok(serialized) => {
                if let Err(error) = self.backend.set(&self.config.storage_key, &serialized).await {
                    warn!("timeline cache not persisted: {error}");
                }
            }
            Err(error) => warn!("timeline cache could not be serialized: {error}"),
        }
        pruned
    }

    pub async fn clear(&self) {
        if let Err(error) = self.backend.remove(&self.config.storage_key).await {
            warn!("timeline cache could not be removed: {error}");
        }
    }
}
