//! Per-account progress tracking
//!
//! Each account gets its own lock, so runs for different accounts never
//! contend. The outer map is only write-locked to create an entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use crate::models::{SyncPhase, SyncProgress};

/// Concurrent map of account id -> progress counters
#[derive(Default)]
pub struct ProgressTracker {
    entries: RwLock<HashMap<String, Arc<Mutex<SyncProgress>>>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or lazily create the entry for an account
    fn entry(&self, account_id: &str) -> Arc<Mutex<SyncProgress>> {
        if let Some(entry) = self.entries.read().unwrap().get(account_id) {
            return entry.clone();
        }
        self.entries
            .write()
            .unwrap()
            .entry(account_id.to_string())
            .or_default()
            .clone()
    }

    /// Snapshot of an account's progress (idle defaults if never touched)
    pub fn get(&self, account_id: &str) -> SyncProgress {
        *self.entry(account_id).lock().unwrap()
    }

    /// Mutate an account's progress in place
    pub fn update<F>(&self, account_id: &str, f: F)
    where
        F: FnOnce(&mut SyncProgress),
    {
        let entry = self.entry(account_id);
        let mut progress = entry.lock().unwrap();
        f(&mut progress);
    }

    /// Reset counters and enter a new phase
    pub fn start(&self, account_id: &str, phase: SyncPhase) {
        self.update(account_id, |p| *p = SyncProgress::starting(phase));
    }

    /// Change phase, keeping counters
    pub fn set_phase(&self, account_id: &str, phase: SyncPhase) {
        self.update(account_id, |p| p.phase = phase);
    }

    pub fn set_total(&self, account_id: &str, total: usize) {
        self.update(account_id, |p| p.total = total);
    }

    pub fn add_total(&self, account_id: &str, n: usize) {
        self.update(account_id, |p| p.total += n);
    }

    pub fn incr_processed(&self, account_id: &str) {
        self.update(account_id, |p| p.processed += 1);
    }

    pub fn incr_indexed(&self, account_id: &str) {
        self.update(account_id, |p| p.indexed += 1);
    }

    pub fn incr_errors(&self, account_id: &str) {
        self.update(account_id, |p| p.errors += 1);
    }
}
