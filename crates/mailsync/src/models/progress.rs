//! Advisory per-account sync progress

use serde::{Deserialize, Serialize};

/// Coarse phase of the current (or last) run for an account
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    #[default]
    Idle,
    /// Enumerating remote message IDs
    Listing,
    /// Fetching and indexing the snapshot
    Syncing,
    /// Applying the change feed
    Incremental,
    /// Snapshot finished
    Done,
}

/// Snapshot of an account's progress counters
///
/// Lives only for the process lifetime; the authoritative state is the
/// account cursor and the message store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    pub phase: SyncPhase,
    pub total: usize,
    pub processed: usize,
    pub indexed: usize,
    pub errors: usize,
}

impl SyncProgress {
    /// Fresh counters for a new phase
    pub fn starting(phase: SyncPhase) -> Self {
        Self {
            phase,
            ..Self::default()
        }
    }
}
