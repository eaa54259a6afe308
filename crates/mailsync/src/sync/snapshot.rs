//! Baseline snapshot
//!
//! Enumerates every remote message id, stores and indexes the ones not yet
//! present, then seeds the account cursor from the transport's current
//! position. Safe to re-run after a partial failure.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::time::Instant;

use super::{SyncEngine, SyncStats};
use crate::models::{Account, Cursor, MessageId, SyncPhase};

impl SyncEngine {
    /// Run a full initial sync, optionally limited by a search filter.
    ///
    /// Fails only when the id listing itself fails; per-message failures are
    /// counted in the returned stats.
    pub fn run_initial_sync(&self, account: &Account, query: Option<&str>) -> Result<SyncStats> {
        let started = Instant::now();
        let mut stats = SyncStats::default();
        let account_id = account.id.as_str();

        info!("Starting initial sync for account {}", account_id);
        self.progress.start(account_id, SyncPhase::Listing);

        let ids = match self.list_all_ids(account, query) {
            Ok(ids) => ids,
            Err(e) => {
                self.record_error(account_id, &mut stats);
                self.progress.set_phase(account_id, SyncPhase::Idle);
                return Err(e);
            }
        };

        stats.listed = ids.len();
        self.progress.set_phase(account_id, SyncPhase::Syncing);
        self.progress.set_total(account_id, ids.len());
        info!("Account {}: {} messages to sync", account_id, ids.len());

        for id in &ids {
            if self.is_cancelled() {
                info!(
                    "Initial sync for account {} cancelled after {} messages",
                    account_id,
                    self.progress.get(account_id).processed
                );
                self.progress.set_phase(account_id, SyncPhase::Idle);
                stats.duration = started.elapsed();
                return Ok(stats);
            }

            let outcome = match self.store.has_message(account_id, id) {
                Ok(true) => {
                    stats.skipped += 1;
                    self.progress.incr_processed(account_id);
                    continue;
                }
                Ok(false) => self.ingest(account, id, false),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(ingested) => self.tally_ingested(account_id, id, ingested, &mut stats),
                Err(e) => {
                    warn!("Account {}: message {} failed: {:#}", account_id, id, e);
                    self.record_error(account_id, &mut stats);
                }
            }
            self.progress.incr_processed(account_id);
        }

        stats.cursor = self.seed_cursor(account);
        self.progress.set_phase(account_id, SyncPhase::Done);
        stats.duration = started.elapsed();

        info!("Initial sync for account {} finished: {}", account_id, stats);
        Ok(stats)
    }

    /// Materialize the lazy id listing
    fn list_all_ids(&self, account: &Account, query: Option<&str>) -> Result<Vec<MessageId>> {
        let ids = self
            .transport
            .list_message_ids(account, query)
            .and_then(|stream| stream.collect::<Result<Vec<_>>>())
            .with_context(|| format!("Failed to list messages for account {}", account.id))?;
        debug!("Listed {} message ids for account {}", ids.len(), account.id);
        Ok(ids)
    }

    /// Store the transport's current position as the new cursor.
    ///
    /// Best-effort: on failure the cursor stays as it was.
    fn seed_cursor(&self, account: &Account) -> Option<Cursor> {
        let position = match self.transport.get_current_position(account) {
            Ok(position) => position,
            Err(e) => {
                warn!(
                    "Could not fetch current position for account {}: {:#}",
                    account.id, e
                );
                return None;
            }
        };

        match self.store.save_cursor(&account.id, position) {
            Ok(()) => {
                info!("Account {}: cursor seeded at {}", account.id, position);
                Some(position)
            }
            Err(e) => {
                warn!("Failed to save cursor for account {}: {:#}", account.id, e);
                None
            }
        }
    }
}
