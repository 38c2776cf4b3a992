//! On-disk work item store scoped to one project directory.
//!
//! Layout under the project's state directory:
//! - `items.json`: `{ "items": {..}, "last_id": N }`
//! - `fixes.json`: `{ "fixes": {..} }`
//! - `queue.json`: array of entrypoint paths
//! - `details/<ID>.md`: free-text narrative per item
//!
//! Documents are written to a temp file and renamed into place so a crash
//! mid-write never leaves a truncated document behind.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use super::models::{Fix, ItemStatus, WorkItem, WorkItemId};
use super::state::HuntState;
use crate::errors::StoreError;

const ITEMS_FILE: &str = "items.json";
const FIXES_FILE: &str = "fixes.json";
const QUEUE_FILE: &str = "queue.json";
const DETAILS_DIR: &str = "details";
const LOCK_FILE: &str = ".lock";

#[derive(Debug, Default, Serialize, Deserialize)]
struct ItemsDoc {
    #[serde(default)]
    items: BTreeMap<WorkItemId, WorkItem>,
    #[serde(default)]
    last_id: u32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FixesDoc {
    #[serde(default)]
    fixes: BTreeMap<WorkItemId, Fix>,
}

/// Outcome of [`ItemStore::clear`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClearSummary {
    pub removed_items: Vec<WorkItemId>,
    pub dropped_queue_entries: usize,
}

/// Holds the exclusive advisory lock on a state directory until dropped.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[derive(Debug, Clone)]
pub struct ItemStore {
    root: PathBuf,
}

impl ItemStore {
    /// Open (creating if needed) the store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        let details = root.join(DETAILS_DIR);
        fs::create_dir_all(&details).map_err(|source| StoreError::Write {
            path: details.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pointer_path(&self) -> PathBuf {
        self.root.join("current_run.txt")
    }

    pub fn checkpoint_db_path(&self) -> PathBuf {
        self.root.join("checkpoints.db")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Take the exclusive process lock for this state directory.
    pub fn lock(&self) -> Result<StoreLock, StoreError> {
        let path = self.root.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|source| StoreError::Write {
                path: path.clone(),
                source,
            })?;
        file.try_lock_exclusive()
            .map_err(|_| StoreError::Locked {
                path: self.root.clone(),
            })?;
        Ok(StoreLock { file })
    }

    /// Build the starting state from the store documents. Missing documents
    /// read as empty. The watermark is never below the highest tracked id,
    /// even when `last_id` is absent from the document.
    pub fn load_initial_state(&self) -> Result<HuntState, StoreError> {
        let items: ItemsDoc = self.read_doc(ITEMS_FILE)?.unwrap_or_default();
        let fixes: FixesDoc = self.read_doc(FIXES_FILE)?.unwrap_or_default();
        let queue: Vec<String> = self.read_doc(QUEUE_FILE)?.unwrap_or_default();
        let last_id = items
            .items
            .keys()
            .map(WorkItemId::number)
            .fold(items.last_id, u32::max);
        Ok(HuntState {
            items: items.items,
            fixes: fixes.fixes,
            queue,
            last_id,
            messages: Vec::new(),
        })
    }

    /// Write items, fixes and queue documents from `state`.
    pub fn persist(&self, state: &HuntState) -> Result<(), StoreError> {
        let items = ItemsDoc {
            items: state.items.clone(),
            last_id: state.last_id,
        };
        let fixes = FixesDoc {
            fixes: state.fixes.clone(),
        };
        self.write_doc(ITEMS_FILE, "items", &items)?;
        self.write_doc(FIXES_FILE, "fixes", &fixes)?;
        self.write_doc(QUEUE_FILE, "queue", &state.queue)?;
        Ok(())
    }

    pub fn details_path(&self, id: &WorkItemId) -> PathBuf {
        self.root.join(DETAILS_DIR).join(format!("{id}.md"))
    }

    pub fn load_details(&self, id: &WorkItemId) -> Result<Option<String>, StoreError> {
        let path = self.details_path(id);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Read { path, source }),
        }
    }

    pub fn save_details(&self, id: &WorkItemId, text: &str) -> Result<(), StoreError> {
        let path = self.details_path(id);
        fs::write(&path, text).map_err(|source| StoreError::Write { path, source })
    }

    pub fn append_details(&self, id: &WorkItemId, text: &str) -> Result<(), StoreError> {
        let path = self.details_path(id);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .and_then(|mut f| f.write_all(text.as_bytes()))
            .map_err(|source| StoreError::Write { path, source })
    }

    /// Drop the exploration queue and every item that never made it past
    /// analysis, together with its details file. The id watermark is kept.
    pub fn clear(&self) -> Result<ClearSummary, StoreError> {
        let mut state = self.load_initial_state()?;
        let removed: Vec<WorkItemId> = state
            .items
            .values()
            .filter(|i| matches!(i.status, ItemStatus::Potential | ItemStatus::InAnalysis))
            .map(|i| i.id.clone())
            .collect();

        for id in &removed {
            state.items.remove(id);
            state.fixes.remove(id);
            let path = self.details_path(id);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(source) => return Err(StoreError::Write { path, source }),
            }
        }

        state.last_id = removed
            .iter()
            .map(WorkItemId::number)
            .fold(state.last_id, u32::max);
        let summary = ClearSummary {
            removed_items: removed,
            dropped_queue_entries: state.queue.len(),
        };
        state.queue.clear();
        self.persist(&state)?;
        Ok(summary)
    }

    fn read_doc<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, StoreError> {
        let path = self.root.join(name);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Read { path, source }),
        };
        if text.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|source| StoreError::Parse { path, source })
    }

    fn write_doc<T: Serialize>(
        &self,
        name: &str,
        what: &'static str,
        value: &T,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|source| StoreError::Serialize { what, source })?;
        let path = self.root.join(name);
        let tmp = self.root.join(format!("{name}.tmp"));
        fs::write(&tmp, json).map_err(|source| StoreError::Write {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| StoreError::Write { path, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::models::Severity;
    use crate::tracking::state::StateUpdate;
    use anyhow::Result;
    use tempfile::tempdir;

    fn item(n: u32, status: ItemStatus) -> WorkItem {
        WorkItem::new(WorkItemId::new("BUG", n), "bug", Severity::High, vec![])
            .with_status(status)
    }

    #[test]
    fn test_load_from_empty_directory_is_default() -> Result<()> {
        let dir = tempdir()?;
        let store = ItemStore::open(dir.path())?;
        assert_eq!(store.load_initial_state()?, HuntState::default());
        Ok(())
    }

    #[test]
    fn test_persist_then_load_round_trips_documents() -> Result<()> {
        let dir = tempdir()?;
        let store = ItemStore::open(dir.path())?;

        let mut state = HuntState::default();
        let solved = item(2, ItemStatus::ReadyForReview);
        state.apply(
            StateUpdate::message("ignored by the store")
                .with_item(item(1, ItemStatus::Potential))
                .with_item(solved.clone())
                .with_fix(Fix::submitted(&solved.id, None))
                .with_queue(vec!["main.go".into()]),
        );
        store.persist(&state)?;

        let loaded = store.load_initial_state()?;
        assert_eq!(loaded.items, state.items);
        assert_eq!(loaded.fixes, state.fixes);
        assert_eq!(loaded.queue, vec!["main.go"]);
        assert_eq!(loaded.last_id, 2);
        assert!(loaded.messages.is_empty());

        let raw = fs::read_to_string(dir.path().join(ITEMS_FILE))?;
        assert!(raw.contains("\"last_id\": 2"));
        assert!(raw.contains("\"POTENTIAL\""));
        Ok(())
    }

    #[test]
    fn test_fix_without_review_attempts_loads_as_zero() -> Result<()> {
        let dir = tempdir()?;
        let store = ItemStore::open(dir.path())?;
        let now = chrono::Utc::now().to_rfc3339();
        fs::write(
            dir.path().join(FIXES_FILE),
            format!(
                r#"{{"fixes": {{"BUG-001": {{"item_id": "BUG-001", "status": "REJECTED",
                "rejection_reason": "nope", "created_at": "{now}", "updated_at": "{now}"}}}}}}"#
            ),
        )?;
        let state = store.load_initial_state()?;
        let fix = &state.fixes[&WorkItemId::new("BUG", 1)];
        assert_eq!(fix.review_attempts, 0);
        assert_eq!(fix.rejection_reason.as_deref(), Some("nope"));
        Ok(())
    }

    #[test]
    fn test_corrupt_document_is_parse_error() -> Result<()> {
        let dir = tempdir()?;
        let store = ItemStore::open(dir.path())?;
        fs::write(dir.path().join(QUEUE_FILE), "{not json")?;
        assert!(matches!(
            store.load_initial_state(),
            Err(StoreError::Parse { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_details_save_append_load() -> Result<()> {
        let dir = tempdir()?;
        let store = ItemStore::open(dir.path())?;
        let id = WorkItemId::new("BUG", 1);

        assert_eq!(store.load_details(&id)?, None);
        store.save_details(&id, "Original")?;
        store.append_details(&id, "\n\n## Review Notes\n\nok")?;
        assert_eq!(
            store.load_details(&id)?.as_deref(),
            Some("Original\n\n## Review Notes\n\nok")
        );
        assert!(store.details_path(&id).ends_with("details/BUG-001.md"));
        Ok(())
    }

    #[test]
    fn test_clear_removes_unanalysed_items_and_keeps_watermark() -> Result<()> {
        let dir = tempdir()?;
        let store = ItemStore::open(dir.path())?;

        let mut state = HuntState::default();
        state.apply(
            StateUpdate::default()
                .with_item(item(1, ItemStatus::Potential))
                .with_item(item(2, ItemStatus::InAnalysis))
                .with_item(item(3, ItemStatus::Solved))
                .with_queue(vec!["a.py".into(), "b.py".into()]),
        );
        store.persist(&state)?;
        store.save_details(&WorkItemId::new("BUG", 1), "details")?;

        let summary = store.clear()?;
        assert_eq!(summary.removed_items.len(), 2);
        assert_eq!(summary.dropped_queue_entries, 2);
        assert!(!store.details_path(&WorkItemId::new("BUG", 1)).exists());

        let after = store.load_initial_state()?;
        assert_eq!(after.items.len(), 1);
        assert!(after.queue.is_empty());
        assert_eq!(after.last_id, 3);
        assert_eq!(after.next_item_id("BUG", 0).to_string(), "BUG-004");
        Ok(())
    }

    #[test]
    fn test_clear_never_hands_out_removed_ids_again() -> Result<()> {
        let dir = tempdir()?;
        let store = ItemStore::open(dir.path())?;
        fs::write(
            dir.path().join(ITEMS_FILE),
            r#"{"items": {"BUG-001": {"id": "BUG-001", "short_description": "crash",
            "severity": "HIGH", "status": "POTENTIAL", "relevant_files": [],
            "created_at": "2024-01-01T00:00:00Z", "updated_at": "2024-01-01T00:00:00Z"}}}"#,
        )?;
        assert_eq!(store.load_initial_state()?.next_item_id("BUG", 0).to_string(), "BUG-002");

        store.clear()?;

        let after = store.load_initial_state()?;
        assert!(after.items.is_empty());
        assert_eq!(after.last_id, 1);
        assert_eq!(after.next_item_id("BUG", 0).to_string(), "BUG-002");
        Ok(())
    }

    #[test]
    fn test_second_lock_is_refused() -> Result<()> {
        let dir = tempdir()?;
        let store = ItemStore::open(dir.path())?;
        let guard = store.lock()?;
        assert!(matches!(store.lock(), Err(StoreError::Locked { .. })));
        drop(guard);
        assert!(store.lock().is_ok());
        Ok(())
    }
}
