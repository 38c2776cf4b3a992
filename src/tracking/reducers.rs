//! Pure merge functions combining a prior snapshot with a phase's partial update.
//!
//! Items and fixes merge by key with the incoming side winning. The exploration
//! queue is positional and is replaced wholesale: an item-wise merge cannot
//! express "pop the head", so `replace_queue` only distinguishes "unset" from
//! "set to this exact list".

use std::collections::BTreeMap;

use super::models::{Fix, WorkItem, WorkItemId};

/// Union by key; `incoming` overwrites entries with the same key.
pub fn merge_keyed<V: Clone>(
    existing: &BTreeMap<WorkItemId, V>,
    incoming: &BTreeMap<WorkItemId, V>,
) -> BTreeMap<WorkItemId, V> {
    let mut merged = existing.clone();
    for (id, value) in incoming {
        merged.insert(id.clone(), value.clone());
    }
    merged
}

pub fn merge_items(
    existing: &BTreeMap<WorkItemId, WorkItem>,
    incoming: &BTreeMap<WorkItemId, WorkItem>,
) -> BTreeMap<WorkItemId, WorkItem> {
    merge_keyed(existing, incoming)
}

pub fn merge_fixes(
    existing: &BTreeMap<WorkItemId, Fix>,
    incoming: &BTreeMap<WorkItemId, Fix>,
) -> BTreeMap<WorkItemId, Fix> {
    merge_keyed(existing, incoming)
}

/// `None` keeps the existing queue; `Some(list)` replaces it verbatim, including
/// `Some(vec![])` which empties it.
pub fn replace_queue(existing: &[String], incoming: Option<&[String]>) -> Vec<String> {
    match incoming {
        Some(queue) => queue.to_vec(),
        None => existing.to_vec(),
    }
}

pub fn append_messages(existing: &[String], incoming: &[String]) -> Vec<String> {
    existing.iter().chain(incoming).cloned().collect()
}

/// Id high-water marks only ever grow.
pub fn merge_watermark(existing: u32, incoming: Option<u32>) -> u32 {
    incoming.map_or(existing, |n| existing.max(n))
}
