//! Periodic multi-account scheduling
//!
//! Runs every account's incremental sync in parallel on the rayon pool.
//! Runs for one account never overlap: an account already in flight is
//! skipped rather than queued.

use anyhow::Result;
use log::{debug, error, info};
use rayon::prelude::*;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::{SyncEngine, SyncStats, cooldown_remaining};
use crate::models::Account;

/// What happened to one account in a scheduling pass
#[derive(Debug)]
pub enum AccountRun {
    Completed(SyncStats),
    /// The run could not start or read its account
    Failed(anyhow::Error),
    /// Synced too recently
    SkippedCooldown,
    /// Another run for this account is still going
    SkippedInFlight,
}

/// Outcome of one account in [`SyncScheduler::run_all`]
#[derive(Debug)]
pub struct ScheduledRun {
    pub account_id: String,
    pub run: AccountRun,
}

/// Fans incremental syncs out across accounts
pub struct SyncScheduler {
    engine: Arc<SyncEngine>,
    cooldown_secs: u64,
    in_flight: Mutex<HashSet<String>>,
}

/// Releases an account's in-flight slot on drop
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    account_id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.lock().unwrap().remove(&self.account_id);
    }
}

impl SyncScheduler {
    pub fn new(engine: Arc<SyncEngine>, cooldown_secs: u64) -> Self {
        Self {
            engine,
            cooldown_secs,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// Claim the account, or `None` if a run is already active
    fn claim(&self, account_id: &str) -> Option<InFlightGuard<'_>> {
        let mut set = self.in_flight.lock().unwrap();
        if !set.insert(account_id.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            set: &self.in_flight,
            account_id: account_id.to_string(),
        })
    }

    /// Incremental sync for one account, honoring cooldown and uniqueness
    pub fn run_account(&self, account: &Account) -> AccountRun {
        if let Some(remaining) = cooldown_remaining(account.last_sync_at, self.cooldown_secs) {
            debug!(
                "Account {} synced recently, next run in {:?}",
                account.id, remaining
            );
            return AccountRun::SkippedCooldown;
        }

        let Some(_guard) = self.claim(&account.id) else {
            debug!("Account {} already syncing, skipping", account.id);
            return AccountRun::SkippedInFlight;
        };

        match self.engine.run_incremental_sync(account) {
            Ok(stats) => AccountRun::Completed(stats),
            Err(e) => {
                error!("Sync for account {} failed: {:#}", account.id, e);
                AccountRun::Failed(e)
            }
        }
    }

    /// Initial sync for one account, sharing the uniqueness guard
    pub fn run_initial(&self, account: &Account, query: Option<&str>) -> AccountRun {
        let Some(_guard) = self.claim(&account.id) else {
            return AccountRun::SkippedInFlight;
        };

        match self.engine.run_initial_sync(account, query) {
            Ok(stats) => AccountRun::Completed(stats),
            Err(e) => {
                error!("Initial sync for account {} failed: {:#}", account.id, e);
                AccountRun::Failed(e)
            }
        }
    }

    /// One pass over every account in the store
    pub fn run_all(&self) -> Result<Vec<ScheduledRun>> {
        let accounts = self.engine.store().list_accounts()?;
        info!("Scheduling sync for {} accounts", accounts.len());

        Ok(accounts
            .par_iter()
            .map(|account| ScheduledRun {
                account_id: account.id.clone(),
                run: self.run_account(account),
            })
            .collect())
    }

    /// Call [`run_all`](Self::run_all) every `period` until the engine is
    /// cancelled
    pub fn run_periodic(&self, period: Duration) {
        const TICK: Duration = Duration::from_secs(1);

        while !self.engine.is_cancelled() {
            let started = Instant::now();
            match self.run_all() {
                Ok(runs) => {
                    let completed = runs
                        .iter()
                        .filter(|r| matches!(r.run, AccountRun::Completed(_)))
                        .count();
                    info!("Sync pass done: {}/{} accounts ran", completed, runs.len());
                }
                Err(e) => error!("Sync pass failed: {:#}", e),
            }

            while !self.engine.is_cancelled() && started.elapsed() < period {
                std::thread::sleep(TICK.min(period.saturating_sub(started.elapsed())));
            }
        }
        info!("Scheduler stopped");
    }
}
