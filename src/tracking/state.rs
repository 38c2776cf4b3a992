//! The orchestrator's shared state and the partial updates phases produce.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::models::{Fix, WorkItem, WorkItemId};
use super::reducers;

/// Full snapshot of a project's tracked work at a phase boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HuntState {
    #[serde(default)]
    pub items: BTreeMap<WorkItemId, WorkItem>,
    #[serde(default)]
    pub fixes: BTreeMap<WorkItemId, Fix>,
    #[serde(default)]
    pub queue: Vec<String>,
    /// Highest item number ever assigned. Survives `clear`.
    #[serde(default)]
    pub last_id: u32,
    #[serde(default)]
    pub messages: Vec<String>,
}

/// What a single phase changed. Unset fields leave the state untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub items: BTreeMap<WorkItemId, WorkItem>,
    pub fixes: BTreeMap<WorkItemId, Fix>,
    pub queue: Option<Vec<String>>,
    pub last_id: Option<u32>,
    pub messages: Vec<String>,
}

impl StateUpdate {
    pub fn message(msg: impl Into<String>) -> Self {
        Self {
            messages: vec![msg.into()],
            ..Self::default()
        }
    }

    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.messages.push(msg.into());
        self
    }

    pub fn with_item(mut self, item: WorkItem) -> Self {
        let n = item.id.number();
        self.last_id = Some(self.last_id.map_or(n, |cur| cur.max(n)));
        self.items.insert(item.id.clone(), item);
        self
    }

    pub fn with_fix(mut self, fix: Fix) -> Self {
        self.fixes.insert(fix.item_id.clone(), fix);
        self
    }

    pub fn with_queue(mut self, queue: Vec<String>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// True when applying this update would change nothing but the message log.
    pub fn changes_nothing(&self) -> bool {
        self.items.is_empty() && self.fixes.is_empty() && self.queue.is_none()
    }
}

impl HuntState {
    /// Merge `update` into this state through the reducers.
    pub fn apply(&mut self, update: StateUpdate) {
        self.items = reducers::merge_items(&self.items, &update.items);
        self.fixes = reducers::merge_fixes(&self.fixes, &update.fixes);
        self.queue = reducers::replace_queue(&self.queue, update.queue.as_deref());
        self.last_id = reducers::merge_watermark(self.last_id, update.last_id);
        self.messages = reducers::append_messages(&self.messages, &update.messages);
    }

    /// Id for the `offset`-th item created in the current phase.
    ///
    /// Numbering continues from the larger of the persisted high-water mark and
    /// the highest number currently tracked under `prefix`.
    pub fn next_item_id(&self, prefix: &str, offset: u32) -> WorkItemId {
        let tracked_max = self
            .items
            .keys()
            .filter(|id| id.prefix() == prefix)
            .map(WorkItemId::number)
            .max()
            .unwrap_or(0);
        WorkItemId::new(prefix, self.last_id.max(tracked_max) + 1 + offset)
    }

    pub fn item(&self, id: &WorkItemId) -> Option<&WorkItem> {
        self.items.get(id)
    }

    pub fn fix_for(&self, id: &WorkItemId) -> Option<&Fix> {
        self.fixes.get(id)
    }
}
