//! Mailbox synchronization engine
//!
//! A baseline snapshot fetches every message once and seeds the change-feed
//! cursor; incremental runs walk the feed from that cursor and apply each
//! change. Both runs isolate per-message failures: they are logged and
//! counted, never fatal to the run.

mod incremental;
mod scheduler;
mod snapshot;
mod timing;

pub use scheduler::{AccountRun, ScheduledRun, SyncScheduler};
pub use timing::{cooldown_elapsed, cooldown_remaining};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::warn;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::indexing::MessageIndexer;
use crate::models::{Account, Cursor, MessageId, MessageRecord, SyncProgress};
use crate::progress::ProgressTracker;
use crate::storage::MessageStore;
use crate::transport::{DecodedMessage, MailTransport, MessageDecoder, RawMessage};

/// How an incremental run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrementalOutcome {
    /// No cursor existed; a baseline snapshot ran instead
    Baseline,
    /// The change feed was walked and the cursor advanced
    Applied,
    /// The cursor was rejected; a full resync ran and re-seeded it
    Resynced,
    /// A transport failure stopped the run; the cursor was not advanced
    Aborted,
    /// The cancellation flag stopped the run; the cursor was not advanced
    Cancelled,
}

/// Counters for one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStats {
    /// Message ids enumerated by a snapshot
    pub listed: usize,
    /// Messages written to the store
    pub stored: usize,
    /// Snapshot ids already present locally
    pub skipped: usize,
    /// Messages whose vectors were written
    pub indexed: usize,
    /// Messages removed by deletion records
    pub deleted: usize,
    /// Label records applied to a local message
    pub label_updates: usize,
    /// Per-item and transport failures
    pub errors: usize,
    pub duration: Duration,
    /// Set for incremental runs
    pub outcome: Option<IncrementalOutcome>,
    /// Cursor committed by the run, if any
    pub cursor: Option<Cursor>,
}

impl SyncStats {
    /// Fold the counters of a nested run into this one
    fn absorb(&mut self, other: SyncStats) {
        self.listed += other.listed;
        self.stored += other.stored;
        self.skipped += other.skipped;
        self.indexed += other.indexed;
        self.deleted += other.deleted;
        self.label_updates += other.label_updates;
        self.errors += other.errors;
        self.cursor = other.cursor.or(self.cursor);
    }
}

impl fmt::Display for SyncStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "listed={} stored={} skipped={} indexed={} deleted={} labels={} errors={} in {:.1?}",
            self.listed,
            self.stored,
            self.skipped,
            self.indexed,
            self.deleted,
            self.label_updates,
            self.errors,
            self.duration
        )?;
        if let Some(outcome) = self.outcome {
            write!(f, " outcome={:?}", outcome)?;
        }
        if let Some(cursor) = self.cursor {
            write!(f, " cursor={}", cursor)?;
        }
        Ok(())
    }
}

/// Snapshot builder plus incremental engine for every account
///
/// Holds no per-account state besides the progress tracker, so one engine
/// serves concurrent runs for different accounts. Callers must not start
/// two runs for the same account at once (see [`SyncScheduler`]).
pub struct SyncEngine {
    transport: Arc<dyn MailTransport>,
    decoder: Arc<dyn MessageDecoder>,
    store: Arc<dyn MessageStore>,
    indexer: MessageIndexer,
    progress: Arc<ProgressTracker>,
    cancel: Arc<AtomicBool>,
}

impl SyncEngine {
    pub fn new(
        transport: Arc<dyn MailTransport>,
        decoder: Arc<dyn MessageDecoder>,
        store: Arc<dyn MessageStore>,
        indexer: MessageIndexer,
    ) -> Self {
        Self {
            transport,
            decoder,
            store,
            indexer,
            progress: Arc::new(ProgressTracker::new()),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share a progress tracker with other components
    pub fn with_progress(mut self, progress: Arc<ProgressTracker>) -> Self {
        self.progress = progress;
        self
    }

    /// Use an externally owned cancellation flag
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    pub fn indexer(&self) -> &MessageIndexer {
        &self.indexer
    }

    /// Progress snapshot for an account
    pub fn get_progress(&self, account_id: &str) -> SyncProgress {
        self.progress.get(account_id)
    }

    /// Ask running syncs to stop at the next message or change record
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Allow runs again after a cancellation
    pub fn reset_cancel(&self) {
        self.cancel.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Count one failure in both the run stats and the progress tracker
    fn record_error(&self, account_id: &str, stats: &mut SyncStats) {
        stats.errors += 1;
        self.progress.incr_errors(account_id);
    }

    /// Fetch and decode one message into a record owned by `account`
    fn fetch_record(&self, account: &Account, id: &MessageId) -> Result<MessageRecord> {
        let raw = self
            .transport
            .get_message_full(account, id)
            .with_context(|| format!("Failed to fetch message {}", id))?;
        let decoded = self
            .decoder
            .decode(&raw)
            .with_context(|| format!("Failed to decode message {}", id))?;
        Ok(build_record(&account.id, raw, decoded))
    }

    /// Fetch, persist and index one message.
    ///
    /// Fails only when the message never reached the store. Indexing errors
    /// come back inside [`Ingested`] so the caller still counts the stored
    /// row. With `replace`, the message's old vectors are removed first.
    fn ingest(&self, account: &Account, id: &MessageId, replace: bool) -> Result<Ingested> {
        let record = self.fetch_record(account, id)?;
        self.store
            .upsert_message(record.clone())
            .with_context(|| format!("Failed to store message {}", id))?;

        Ok(Ingested {
            indexed: self.index_stored(&record, replace),
        })
    }

    /// Write vectors for a stored record and stamp `indexed_at`.
    ///
    /// Returns whether any vectors were written.
    fn index_stored(&self, record: &MessageRecord, replace: bool) -> Result<bool> {
        let written = self
            .indexer
            .index(record, replace)
            .with_context(|| format!("Failed to index message {}", record.id))?;
        if written == 0 {
            return Ok(false);
        }

        self.store
            .mark_indexed(&record.account_id, &record.id, Utc::now())?;
        Ok(true)
    }

    /// Count a stored message and the result of indexing it
    fn tally_ingested(
        &self,
        account_id: &str,
        id: &MessageId,
        ingested: Ingested,
        stats: &mut SyncStats,
    ) {
        stats.stored += 1;
        match ingested.indexed {
            Ok(true) => {
                stats.indexed += 1;
                self.progress.incr_indexed(account_id);
            }
            Ok(false) => {}
            Err(e) => {
                warn!(
                    "Account {}: message {} stored but not indexed: {:#}",
                    account_id, id, e
                );
                self.record_error(account_id, stats);
            }
        }
    }
}

/// A message that reached the store; indexing may still have failed
struct Ingested {
    indexed: Result<bool>,
}

/// Combine the transport envelope and decoded content into a record
fn build_record(account_id: &str, raw: RawMessage, decoded: DecodedMessage) -> MessageRecord {
    let subject = decoded.header("subject").map(str::to_string);
    let from = decoded.header("from").map(str::to_string);
    let date = decoded.header("date").and_then(parse_date).or_else(|| {
        raw.internal_date
            .as_deref()
            .and_then(|ms| ms.trim().parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis)
    });

    let mut builder = MessageRecord::builder(account_id, MessageId::new(raw.id))
        .headers(decoded.headers)
        .body_text(decoded.body_text)
        .body_html(decoded.body_html)
        .label_ids(raw.label_ids);

    if let Some(thread_id) = raw.thread_id {
        builder = builder.thread_id(thread_id);
    }
    if let Some(subject) = subject {
        builder = builder.subject(subject);
    }
    if let Some(from) = from {
        builder = builder.from(from);
    }
    if let Some(date) = date {
        builder = builder.date(date);
    }
    if let Some(snippet) = raw.snippet {
        builder = builder.snippet(snippet);
    }
    if let Some(size) = raw.size_estimate {
        builder = builder.size_estimate(size);
    }

    builder.build()
}

/// Parse an RFC 2822 `Date` header, tolerating a trailing `(TZ)` comment
fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    DateTime::parse_from_rfc2822(value)
        .or_else(|_| {
            let without_comment = value.split(" (").next().unwrap_or(value);
            DateTime::parse_from_rfc2822(without_comment.trim())
        })
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn decoded(headers: &[(&str, &str)], body: &str) -> DecodedMessage {
        DecodedMessage {
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
            body_text: body.to_string(),
            body_html: String::new(),
        }
    }

    #[test]
    fn test_build_record_from_headers() {
        let raw = RawMessage {
            id: "m1".to_string(),
            thread_id: Some("t1".to_string()),
            label_ids: vec!["INBOX".to_string()],
            snippet: Some("snip".to_string()),
            size_estimate: Some(99),
            internal_date: Some("0".to_string()),
            payload: serde_json::Value::Null,
        };
        let decoded = decoded(
            &[
                ("subject", "Hello"),
                ("from", "a@example.com"),
                ("to", "b@example.com"),
                ("date", "Tue, 14 Nov 2023 22:13:20 +0000"),
            ],
            "Body",
        );

        let record = build_record("acct", raw, decoded);
        assert_eq!(record.account_id, "acct");
        assert_eq!(record.subject.as_deref(), Some("Hello"));
        assert_eq!(record.to.as_deref(), Some("b@example.com"));
        assert_eq!(record.date.unwrap().timestamp(), 1_700_000_000);
        assert_eq!(record.size_estimate, Some(99));
        assert!(record.label_ids.contains("INBOX"));
        assert_eq!(
            record.content_hash,
            crate::models::content_hash(Some("Hello"), Some("a@example.com"), "Body")
        );
    }

    #[test]
    fn test_date_falls_back_to_internal_date() {
        let raw = RawMessage {
            id: "m1".to_string(),
            internal_date: Some("1700000000000".to_string()),
            ..RawMessage::default()
        };
        let record = build_record("acct", raw, decoded(&[("date", "garbage")], ""));
        assert_eq!(record.date.unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_parse_date_with_comment() {
        let date = parse_date("Tue, 14 Nov 2023 22:13:20 +0000 (UTC)").unwrap();
        assert_eq!(date.timestamp(), 1_700_000_000);
        assert!(parse_date("not a date").is_none());
    }

    #[test]
    fn test_stats_absorb() {
        let mut outer = SyncStats {
            errors: 1,
            cursor: None,
            ..SyncStats::default()
        };
        outer.absorb(SyncStats {
            stored: 3,
            errors: 2,
            cursor: Some(Cursor(9)),
            ..SyncStats::default()
        });
        assert_eq!(outer.stored, 3);
        assert_eq!(outer.errors, 3);
        assert_eq!(outer.cursor, Some(Cursor(9)));
    }
}
