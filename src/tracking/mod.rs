//! Work item tracking: the data model, its merge reducers, the in-memory
//! state shared by phases and the on-disk store.

pub mod models;
pub mod reducers;
pub mod state;
pub mod store;

pub use models::{
    Fix, FixStatus, ItemStatus, ReproApproach, ReproChance, Severity, WorkItem, WorkItemId,
};
pub use state::{HuntState, StateUpdate};
pub use store::{ClearSummary, ItemStore, StoreLock};
