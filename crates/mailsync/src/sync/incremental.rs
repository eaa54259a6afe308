//! Incremental sync over the change feed
//!
//! Pages through the feed from the stored cursor, applying each record in
//! feed order. The cursor is committed once, after the last page, so an
//! aborted or cancelled run is retried from the same point next time.
//! Every change is idempotent, which makes redelivered records harmless.

use anyhow::Result;
use log::{debug, info, warn};
use std::time::Instant;

use super::{IncrementalOutcome, Ingested, SyncEngine, SyncStats};
use crate::models::{Account, ChangeRecord, Cursor, MessageId, SyncPhase};
use crate::transport::{TransportError, is_cursor_invalid};

/// Result of applying one change record
enum Applied {
    Stored(Ingested),
    Deleted,
    Labels,
    /// Nothing to do locally
    Noop,
}

impl SyncEngine {
    /// Bring the account up to date with the change feed.
    ///
    /// Without a cursor this runs the baseline snapshot instead. A rejected
    /// cursor triggers a full resync. Transport failures end the run
    /// without advancing the cursor; they are reported in the stats, not
    /// as an error.
    pub fn run_incremental_sync(&self, account: &Account) -> Result<SyncStats> {
        let started = Instant::now();

        // The store is authoritative for the cursor
        let account = self
            .store
            .get_account(&account.id)?
            .unwrap_or_else(|| account.clone());
        let account_id = account.id.as_str();

        let Some(start_cursor) = account.cursor else {
            info!("Account {} has no baseline; running initial sync", account_id);
            return Ok(self.delegate_to_snapshot(&account, IncrementalOutcome::Baseline, started));
        };

        info!(
            "Starting incremental sync for account {} from cursor {}",
            account_id, start_cursor
        );
        self.progress.start(account_id, SyncPhase::Incremental);

        let mut stats = SyncStats::default();
        let mut max_seen: Option<Cursor> = None;
        let mut page_token: Option<String> = None;

        loop {
            let page = match self.transport.get_changes_since(
                &account,
                start_cursor,
                page_token.as_deref(),
            ) {
                Ok(page) => page,
                Err(e) if is_cursor_invalid(&e) => {
                    warn!(
                        "Cursor {} rejected for account {} ({:#}); running full resync",
                        start_cursor, account_id, e
                    );
                    let resync =
                        self.delegate_to_snapshot(&account, IncrementalOutcome::Resynced, started);
                    let outcome = resync.outcome;
                    stats.absorb(resync);
                    stats.outcome = outcome;
                    stats.duration = started.elapsed();
                    return Ok(stats);
                }
                Err(e) => {
                    warn!(
                        "Change feed failed for account {}; cursor stays at {}: {:#}",
                        account_id, start_cursor, e
                    );
                    self.record_error(account_id, &mut stats);
                    return Ok(self.finish(account_id, stats, IncrementalOutcome::Aborted, started));
                }
            };

            debug!(
                "Account {}: change page with {} records",
                account_id,
                page.records.len()
            );
            self.progress.add_total(account_id, page.records.len());

            for record in &page.records {
                if self.is_cancelled() {
                    info!("Incremental sync for account {} cancelled", account_id);
                    return Ok(self.finish(account_id, stats, IncrementalOutcome::Cancelled, started));
                }

                match self.apply_change(&account, record) {
                    Ok(Applied::Stored(ingested)) => {
                        self.tally_ingested(account_id, record.message_id(), ingested, &mut stats)
                    }
                    Ok(Applied::Deleted) => stats.deleted += 1,
                    Ok(Applied::Labels) => stats.label_updates += 1,
                    Ok(Applied::Noop) => {}
                    Err(e) => {
                        warn!(
                            "Account {}: {} record {} for message {} failed: {:#}",
                            account_id,
                            record.kind(),
                            record.id(),
                            record.message_id(),
                            e
                        );
                        self.record_error(account_id, &mut stats);
                    }
                }

                self.progress.incr_processed(account_id);
                max_seen = max_seen.max(Some(record.id()));
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        stats.cursor = self.advance_cursor(&account, start_cursor, max_seen);
        Ok(self.finish(account_id, stats, IncrementalOutcome::Applied, started))
    }

    /// Run the snapshot in place of an incremental pass
    fn delegate_to_snapshot(
        &self,
        account: &Account,
        outcome: IncrementalOutcome,
        started: Instant,
    ) -> SyncStats {
        let mut stats = match self.run_initial_sync(account, None) {
            Ok(stats) => stats,
            Err(e) => {
                warn!("Snapshot for account {} failed: {:#}", account.id, e);
                // The snapshot already counted the failure in progress
                let stats = SyncStats {
                    errors: 1,
                    ..SyncStats::default()
                };
                return self.finish(&account.id, stats, IncrementalOutcome::Aborted, started);
            }
        };

        // A cancelled snapshot seeds no cursor
        let outcome = if stats.cursor.is_none() && self.is_cancelled() {
            IncrementalOutcome::Cancelled
        } else {
            outcome
        };
        self.progress.set_phase(&account.id, SyncPhase::Idle);
        stats.outcome = Some(outcome);
        stats.duration = started.elapsed();
        stats
    }

    /// Commit the new cursor: the highest record id seen, or the current
    /// position when the feed was empty. Never moves backward.
    fn advance_cursor(
        &self,
        account: &Account,
        start: Cursor,
        max_seen: Option<Cursor>,
    ) -> Option<Cursor> {
        let next = match max_seen {
            Some(max) => max,
            None => match self.transport.get_current_position(account) {
                Ok(position) => position,
                Err(e) => {
                    warn!(
                        "Could not fetch current position for account {}: {:#}",
                        account.id, e
                    );
                    return None;
                }
            },
        };
        let next = next.max(start);

        match self.store.save_cursor(&account.id, next) {
            Ok(()) => {
                debug!("Account {}: cursor {} -> {}", account.id, start, next);
                Some(next)
            }
            Err(e) => {
                warn!("Failed to save cursor for account {}: {:#}", account.id, e);
                None
            }
        }
    }

    fn finish(
        &self,
        account_id: &str,
        mut stats: SyncStats,
        outcome: IncrementalOutcome,
        started: Instant,
    ) -> SyncStats {
        self.progress.set_phase(account_id, SyncPhase::Idle);
        stats.outcome = Some(outcome);
        stats.duration = started.elapsed();
        info!("Incremental sync for account {} finished: {}", account_id, stats);
        stats
    }

    /// Apply one change record
    fn apply_change(&self, account: &Account, record: &ChangeRecord) -> Result<Applied> {
        match record {
            ChangeRecord::Added { message_id, .. } => self.apply_added(account, message_id),
            ChangeRecord::Deleted { message_id, .. } => self.apply_deleted(account, message_id),
            ChangeRecord::LabelsAdded {
                message_id, labels, ..
            } => {
                let found = self.store.add_labels(&account.id, message_id, labels)?;
                Ok(if found { Applied::Labels } else { Applied::Noop })
            }
            ChangeRecord::LabelsRemoved {
                message_id, labels, ..
            } => {
                let found = self.store.remove_labels(&account.id, message_id, labels)?;
                Ok(if found { Applied::Labels } else { Applied::Noop })
            }
        }
    }

    /// Fetch and upsert the message, then re-index it from scratch
    fn apply_added(&self, account: &Account, message_id: &MessageId) -> Result<Applied> {
        let existed = self.store.has_message(&account.id, message_id)?;
        match self.ingest(account, message_id, existed) {
            Ok(ingested) => Ok(Applied::Stored(ingested)),
            Err(e) if is_gone(&e) => {
                // Added then removed before we got to it (e.g. drafts)
                debug!(
                    "Message {} vanished before it could be fetched for account {}",
                    message_id, account.id
                );
                Ok(Applied::Noop)
            }
            Err(e) => Err(e),
        }
    }

    /// Remove the message row and every vector that references it
    fn apply_deleted(&self, account: &Account, message_id: &MessageId) -> Result<Applied> {
        let row = self.store.delete_message(&account.id, message_id);
        let vectors = self.indexer.remove(&account.id, message_id);

        let removed = row?;
        vectors?;
        Ok(if removed { Applied::Deleted } else { Applied::Noop })
    }
}

/// Whether the error is the transport reporting the message no longer exists
fn is_gone(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<TransportError>(),
        Some(TransportError::Http { status: 404, .. })
    )
}
