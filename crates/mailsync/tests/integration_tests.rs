//! Integration tests for the mailsync crate
//!
//! These tests drive the sync engine end to end against a scripted mailbox,
//! the real Gmail payload decoder, and in-memory or SQLite stores.

use anyhow::{Result, bail};
use base64::prelude::*;
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use mailsync::{
    Account, AccountRun, ChangePage, ChangeRecord, Chunker, Cursor, Embedding, EmbeddingGateway,
    EmbeddingProvider, GmailDecoder, InMemoryMessageStore, InMemoryVectorIndex,
    IncrementalOutcome, MailTransport, MessageId, MessageIdStream, MessageIndexer, MessageStore,
    RawMessage, RetryPolicy, SemanticSearch, SqliteMessageStore, SyncEngine, SyncPhase,
    SyncScheduler, TransportError, VectorIndexAdapter, chunk_vector_id,
};

const ACCOUNT: &str = "acct";

/// Text containing this marker never embeds
const POISON: &str = "POISON";

/// Scripted remote mailbox
#[derive(Default)]
struct FakeMailbox {
    /// Listing order of the mailbox
    order: Mutex<Vec<String>>,
    messages: Mutex<HashMap<String, RawMessage>>,
    /// Change feed pages; page `n` is requested with token `p{n}`
    pages: Mutex<Vec<ChangePage>>,
    /// Errors returned by the next change-feed calls, one per call
    feed_errors: Mutex<VecDeque<TransportError>>,
    position: Mutex<u64>,
    fetches: Mutex<usize>,
}

impl FakeMailbox {
    fn put(&self, id: &str, subject: &str, body: &str, labels: &[&str]) {
        let raw = raw_message(id, subject, body, labels);
        let mut order = self.order.lock().unwrap();
        if !order.iter().any(|o| o == id) {
            order.push(id.to_string());
        }
        self.messages.lock().unwrap().insert(id.to_string(), raw);
    }

    fn set_pages(&self, pages: Vec<Vec<ChangeRecord>>) {
        let count = pages.len();
        *self.pages.lock().unwrap() = pages
            .into_iter()
            .enumerate()
            .map(|(n, records)| ChangePage {
                records,
                next_page_token: (n + 1 < count).then(|| format!("p{}", n + 1)),
            })
            .collect();
    }

    fn fail_feed_with(&self, err: TransportError) {
        self.feed_errors.lock().unwrap().push_back(err);
    }

    fn set_position(&self, position: u64) {
        *self.position.lock().unwrap() = position;
    }

    fn fetches(&self) -> usize {
        *self.fetches.lock().unwrap()
    }
}

impl MailTransport for FakeMailbox {
    fn list_message_ids<'a>(
        &'a self,
        _account: &'a Account,
        _query: Option<&str>,
    ) -> Result<MessageIdStream<'a>> {
        let ids = self.order.lock().unwrap().clone();
        Ok(Box::new(ids.into_iter().map(|id| Ok(MessageId::new(id)))))
    }

    fn get_message_full(&self, _account: &Account, id: &MessageId) -> Result<RawMessage> {
        *self.fetches.lock().unwrap() += 1;
        match self.messages.lock().unwrap().get(id.as_str()) {
            Some(raw) => Ok(raw.clone()),
            None => Err(TransportError::Http {
                status: 404,
                reason: "notFound".to_string(),
            }
            .into()),
        }
    }

    fn get_changes_since(
        &self,
        _account: &Account,
        _cursor: Cursor,
        page_token: Option<&str>,
    ) -> Result<ChangePage> {
        if let Some(err) = self.feed_errors.lock().unwrap().pop_front() {
            return Err(err.into());
        }
        let n = match page_token {
            Some(token) => token.trim_start_matches('p').parse::<usize>()?,
            None => 0,
        };
        Ok(self
            .pages
            .lock()
            .unwrap()
            .get(n)
            .cloned()
            .unwrap_or_default())
    }

    fn get_current_position(&self, _account: &Account) -> Result<Cursor> {
        Ok(Cursor(*self.position.lock().unwrap()))
    }
}

/// Deterministic embedder: one axis per keyword, failing on [`POISON`]
struct KeywordEmbedder;

impl EmbeddingProvider for KeywordEmbedder {
    fn embed(&self, inputs: &[String]) -> Result<Vec<Embedding>> {
        if inputs.iter().any(|text| text.contains(POISON)) {
            bail!("embedding provider rejected input");
        }
        Ok(inputs
            .iter()
            .map(|text| {
                let text = text.to_lowercase();
                vec![
                    if text.contains("invoice") { 1.0 } else { 0.0 },
                    if text.contains("lunch") { 1.0 } else { 0.0 },
                    0.1,
                ]
            })
            .collect())
    }
}

/// Helper to build a Gmail-shaped single-part message
fn raw_message(id: &str, subject: &str, body: &str, labels: &[&str]) -> RawMessage {
    RawMessage {
        id: id.to_string(),
        thread_id: Some(format!("t-{}", id)),
        label_ids: labels.iter().map(|l| l.to_string()).collect(),
        snippet: Some(body.chars().take(40).collect()),
        size_estimate: Some(body.len() as i64),
        internal_date: Some("1700000000000".to_string()),
        payload: json!({
            "mimeType": "text/plain",
            "headers": [
                {"name": "Subject", "value": subject},
                {"name": "From", "value": "Alice <alice@example.com>"},
                {"name": "To", "value": "me@example.com"}
            ],
            "body": {"data": BASE64_URL_SAFE_NO_PAD.encode(body)}
        }),
    }
}

fn added(id: u64, message_id: &str) -> ChangeRecord {
    ChangeRecord::Added {
        id: Cursor(id),
        message_id: MessageId::new(message_id),
    }
}

fn labels(labels: &[&str]) -> Vec<String> {
    labels.iter().map(|l| l.to_string()).collect()
}

struct Harness {
    mailbox: Arc<FakeMailbox>,
    store: Arc<dyn MessageStore>,
    index: Arc<InMemoryVectorIndex>,
    engine: SyncEngine,
}

impl Harness {
    fn new() -> Self {
        Self::with_store(Arc::new(InMemoryMessageStore::new()))
    }

    fn with_store(store: Arc<dyn MessageStore>) -> Self {
        store
            .upsert_account(Account::new(ACCOUNT, "me@example.com"))
            .unwrap();

        let mailbox = Arc::new(FakeMailbox::default());
        let index = Arc::new(InMemoryVectorIndex::new());
        let indexer = MessageIndexer::new(
            Chunker::default(),
            EmbeddingGateway::new(Arc::new(KeywordEmbedder), RetryPolicy::immediate(2)),
            VectorIndexAdapter::new(index.clone(), RetryPolicy::immediate(2)),
        );
        let engine = SyncEngine::new(
            mailbox.clone(),
            Arc::new(GmailDecoder::new()),
            store.clone(),
            indexer,
        );

        Self {
            mailbox,
            store,
            index,
            engine,
        }
    }

    fn account(&self) -> Account {
        self.store.get_account(ACCOUNT).unwrap().unwrap()
    }

    /// Give the account a cursor without running a snapshot
    fn set_cursor(&self, cursor: u64) {
        self.store.save_cursor(ACCOUNT, Cursor(cursor)).unwrap();
    }

    fn cursor(&self) -> Option<Cursor> {
        self.account().cursor
    }

    fn message_count(&self) -> usize {
        self.store.count_messages(ACCOUNT).unwrap()
    }
}

#[test]
fn test_initial_sync_stores_indexes_and_seeds_cursor() {
    let h = Harness::new();
    h.mailbox.put("m1", "Invoice 42", "Please pay the invoice.", &["INBOX"]);
    h.mailbox.put("m2", "Lunch?", "Lunch on friday?", &["INBOX", "UNREAD"]);
    h.mailbox.set_position(500);

    let stats = h.engine.run_initial_sync(&h.account(), None).unwrap();

    assert_eq!(stats.listed, 2);
    assert_eq!(stats.stored, 2);
    assert_eq!(stats.indexed, 2);
    assert_eq!(stats.errors, 0);
    assert_eq!(stats.cursor, Some(Cursor(500)));
    assert_eq!(h.cursor(), Some(Cursor(500)));

    let record = h
        .store
        .get_message(ACCOUNT, &MessageId::new("m2"))
        .unwrap()
        .unwrap();
    assert_eq!(record.subject.as_deref(), Some("Lunch?"));
    assert_eq!(record.from.as_deref(), Some("Alice <alice@example.com>"));
    assert_eq!(record.body_text, "Lunch on friday?");
    assert!(record.label_ids.contains("UNREAD"));
    assert!(record.indexed_at.is_some());

    assert_eq!(h.index.count(ACCOUNT), 2);
    let progress = h.engine.get_progress(ACCOUNT);
    assert_eq!(progress.phase, SyncPhase::Done);
    assert_eq!(progress.processed, 2);
    assert_eq!(progress.indexed, 2);
}

#[test]
fn test_initial_sync_is_idempotent() {
    let h = Harness::new();
    for i in 1..=3 {
        h.mailbox
            .put(&format!("m{}", i), "Subject", &format!("Body {}", i), &[]);
    }
    h.mailbox.set_position(10);

    let first = h.engine.run_initial_sync(&h.account(), None).unwrap();
    let vectors_after_first = h.index.ids(ACCOUNT);

    let second = h.engine.run_initial_sync(&h.account(), None).unwrap();

    assert_eq!(first.stored, 3);
    assert_eq!(second.stored, 0);
    assert_eq!(second.skipped, 3);
    assert_eq!(h.message_count(), 3);
    assert_eq!(h.index.ids(ACCOUNT), vectors_after_first);
    // Existing messages are not fetched again
    assert_eq!(h.mailbox.fetches(), 3);
}

#[test]
fn test_initial_sync_isolates_failures() {
    let h = Harness::new();
    for i in 1..=10 {
        let body = if i == 5 {
            format!("Message {} {}", i, POISON)
        } else {
            format!("Message {}", i)
        };
        h.mailbox.put(&format!("m{}", i), "Hello", &body, &[]);
    }
    h.mailbox.set_position(99);

    let stats = h.engine.run_initial_sync(&h.account(), None).unwrap();

    assert_eq!(stats.errors, 1);
    // The unembeddable message is still persisted
    assert_eq!(stats.stored, 10);
    assert_eq!(stats.indexed, 9);
    assert_eq!(h.message_count(), 10);
    assert_eq!(h.store.count_indexed(ACCOUNT).unwrap(), 9);
    assert_eq!(h.engine.get_progress(ACCOUNT).errors, 1);
    assert_eq!(h.cursor(), Some(Cursor(99)));
}

#[test]
fn test_incremental_without_cursor_runs_baseline() {
    let h = Harness::new();
    h.mailbox.put("m1", "Hello", "First", &[]);
    h.mailbox.set_position(7);

    let stats = h.engine.run_incremental_sync(&h.account()).unwrap();

    assert_eq!(stats.outcome, Some(IncrementalOutcome::Baseline));
    assert_eq!(stats.stored, 1);
    assert_eq!(h.cursor(), Some(Cursor(7)));
    assert_eq!(h.engine.get_progress(ACCOUNT).phase, SyncPhase::Idle);
}

#[test]
fn test_incremental_additions_isolate_failures() {
    let h = Harness::new();
    h.set_cursor(100);

    let mut records = Vec::new();
    for i in 1..=10u64 {
        let id = format!("m{}", i);
        let body = if i == 5 {
            format!("Body {}", POISON)
        } else {
            format!("Body {}", i)
        };
        h.mailbox.put(&id, "Hello", &body, &[]);
        records.push(added(100 + i, &id));
    }
    h.mailbox.set_pages(vec![records]);

    let stats = h.engine.run_incremental_sync(&h.account()).unwrap();

    assert_eq!(stats.outcome, Some(IncrementalOutcome::Applied));
    assert_eq!(stats.errors, 1);
    assert_eq!(stats.stored, 10);
    assert_eq!(stats.indexed, 9);
    assert_eq!(h.store.count_indexed(ACCOUNT).unwrap(), 9);
    assert_eq!(h.index.count(ACCOUNT), 9);
    assert_eq!(h.engine.get_progress(ACCOUNT).errors, 1);
    assert_eq!(h.cursor(), Some(Cursor(110)));
}

#[test]
fn test_replayed_addition_keeps_one_record_with_latest_fields() {
    let h = Harness::new();
    h.set_cursor(10);
    h.mailbox.put("m1", "Draft", "Invoice draft", &["DRAFT"]);
    h.mailbox.set_pages(vec![vec![added(11, "m1")]]);
    h.engine.run_incremental_sync(&h.account()).unwrap();

    // Redelivered after the message changed remotely
    h.mailbox.put("m1", "Final", "Invoice final", &["INBOX"]);
    h.mailbox.set_pages(vec![vec![added(11, "m1")]]);
    let stats = h.engine.run_incremental_sync(&h.account()).unwrap();

    assert_eq!(stats.errors, 0);
    assert_eq!(h.message_count(), 1);

    let record = h
        .store
        .get_message(ACCOUNT, &MessageId::new("m1"))
        .unwrap()
        .unwrap();
    assert_eq!(record.subject.as_deref(), Some("Final"));
    assert_eq!(record.body_text, "Invoice final");
    assert_eq!(record.label_ids.len(), 1);
    assert!(record.label_ids.contains("INBOX"));

    assert_eq!(
        h.index.ids(ACCOUNT),
        vec![chunk_vector_id(&MessageId::new("m1"), 0)]
    );
    assert_eq!(h.cursor(), Some(Cursor(11)));
}

#[test]
fn test_cursor_covers_highest_record_across_pages() {
    let h = Harness::new();
    h.set_cursor(100);
    h.mailbox.put("m1", "a", "one", &[]);
    h.mailbox.put("m2", "b", "two", &[]);
    h.mailbox.put("m3", "c", "three", &[]);
    h.mailbox.set_position(200);
    h.mailbox.set_pages(vec![
        vec![added(105, "m1"), added(103, "m2")],
        vec![added(110, "m3")],
    ]);

    let stats = h.engine.run_incremental_sync(&h.account()).unwrap();

    assert_eq!(stats.stored, 3);
    // The highest record seen, not the live position
    assert_eq!(stats.cursor, Some(Cursor(110)));
    assert_eq!(h.cursor(), Some(Cursor(110)));
}

#[test]
fn test_empty_feed_moves_cursor_to_current_position() {
    let h = Harness::new();
    h.set_cursor(100);
    h.mailbox.set_position(150);

    let stats = h.engine.run_incremental_sync(&h.account()).unwrap();

    assert_eq!(stats.outcome, Some(IncrementalOutcome::Applied));
    assert_eq!(h.cursor(), Some(Cursor(150)));
}

#[test]
fn test_cursor_never_moves_backward() {
    let h = Harness::new();
    h.set_cursor(100);
    h.mailbox.set_position(40);

    h.engine.run_incremental_sync(&h.account()).unwrap();

    assert_eq!(h.cursor(), Some(Cursor(100)));
}

#[test]
fn test_invalid_cursor_triggers_full_resync() {
    let h = Harness::new();
    h.set_cursor(5);
    for i in 1..=3 {
        h.mailbox.put(&format!("m{}", i), "Hello", "Body", &[]);
    }
    h.mailbox.set_position(900);
    h.mailbox.fail_feed_with(TransportError::CursorInvalid {
        status: 404,
        reason: "notFound".to_string(),
    });

    let stats = h.engine.run_incremental_sync(&h.account()).unwrap();

    assert_eq!(stats.outcome, Some(IncrementalOutcome::Resynced));
    assert_eq!(stats.stored, 3);
    assert_eq!(stats.errors, 0);
    assert_eq!(h.message_count(), 3);
    assert_eq!(h.cursor(), Some(Cursor(900)));
    assert_eq!(h.engine.get_progress(ACCOUNT).phase, SyncPhase::Idle);
}

#[test]
fn test_transport_failure_aborts_without_moving_cursor() {
    let h = Harness::new();
    h.set_cursor(100);
    h.mailbox.set_position(300);
    h.mailbox.fail_feed_with(TransportError::Http {
        status: 503,
        reason: "backendError".to_string(),
    });

    let stats = h.engine.run_incremental_sync(&h.account()).unwrap();

    assert_eq!(stats.outcome, Some(IncrementalOutcome::Aborted));
    assert_eq!(stats.errors, 1);
    assert_eq!(h.cursor(), Some(Cursor(100)));
    assert_eq!(h.engine.get_progress(ACCOUNT).phase, SyncPhase::Idle);
}

#[test]
fn test_label_changes_patch_stored_labels() {
    let h = Harness::new();
    h.set_cursor(10);
    h.mailbox.put("m1", "Hello", "Body", &["INBOX", "UNREAD"]);
    h.mailbox.set_pages(vec![vec![
        added(11, "m1"),
        ChangeRecord::LabelsRemoved {
            id: Cursor(12),
            message_id: MessageId::new("m1"),
            labels: labels(&["UNREAD"]),
        },
        ChangeRecord::LabelsAdded {
            id: Cursor(13),
            message_id: MessageId::new("m1"),
            labels: labels(&["STARRED"]),
        },
        // Unknown to the store: nothing to patch
        ChangeRecord::LabelsAdded {
            id: Cursor(14),
            message_id: MessageId::new("ghost"),
            labels: labels(&["INBOX"]),
        },
    ]]);

    let stats = h.engine.run_incremental_sync(&h.account()).unwrap();

    assert_eq!(stats.errors, 0);
    assert_eq!(stats.label_updates, 2);
    let record = h
        .store
        .get_message(ACCOUNT, &MessageId::new("m1"))
        .unwrap()
        .unwrap();
    let stored: Vec<&str> = record.label_ids.iter().map(String::as_str).collect();
    assert_eq!(stored, vec!["INBOX", "STARRED"]);
    assert!(!h.store.has_message(ACCOUNT, &MessageId::new("ghost")).unwrap());
    assert_eq!(h.cursor(), Some(Cursor(14)));
}

#[test]
fn test_deletion_removes_record_and_vectors() {
    let h = Harness::new();
    h.mailbox.put("m1", "Invoice", "Invoice body", &[]);
    h.mailbox.put("m2", "Lunch", "Lunch body", &[]);
    h.mailbox.set_position(20);
    h.engine.run_initial_sync(&h.account(), None).unwrap();
    assert_eq!(h.index.count(ACCOUNT), 2);

    let deleted = ChangeRecord::Deleted {
        id: Cursor(21),
        message_id: MessageId::new("m1"),
    };
    // Replayed deletion is a no-op
    h.mailbox
        .set_pages(vec![vec![deleted.clone()], vec![deleted]]);

    let stats = h.engine.run_incremental_sync(&h.account()).unwrap();

    assert_eq!(stats.deleted, 1);
    assert_eq!(stats.errors, 0);
    assert!(!h.store.has_message(ACCOUNT, &MessageId::new("m1")).unwrap());
    assert_eq!(
        h.index.ids(ACCOUNT),
        vec![chunk_vector_id(&MessageId::new("m2"), 0)]
    );
    assert_eq!(h.cursor(), Some(Cursor(21)));
}

#[test]
fn test_addition_of_vanished_message_is_skipped() {
    let h = Harness::new();
    h.set_cursor(1);
    h.mailbox.set_pages(vec![vec![added(2, "draft-gone")]]);

    let stats = h.engine.run_incremental_sync(&h.account()).unwrap();

    assert_eq!(stats.errors, 0);
    assert_eq!(stats.stored, 0);
    assert_eq!(h.message_count(), 0);
    assert_eq!(h.cursor(), Some(Cursor(2)));
}

#[test]
fn test_end_to_end_scenario() {
    let h = Harness::new();
    h.set_cursor(100);
    h.mailbox.put("m1", "Invoice", "Invoice for march", &["INBOX"]);
    h.mailbox.put("m2", "Lunch", "Lunch tomorrow", &["INBOX"]);
    h.mailbox
        .put("m3", "Broken", &format!("Cannot embed {}", POISON), &["INBOX"]);
    // m2 is delivered on both pages
    h.mailbox.set_pages(vec![
        vec![added(101, "m1"), added(102, "m2")],
        vec![added(103, "m2"), added(104, "m3")],
    ]);

    let stats = h.engine.run_incremental_sync(&h.account()).unwrap();

    assert_eq!(h.message_count(), 3);
    assert_eq!(h.store.count_indexed(ACCOUNT).unwrap(), 2);
    assert_eq!(stats.errors, 1);
    assert_eq!(h.engine.get_progress(ACCOUNT).errors, 1);
    assert_eq!(h.cursor(), Some(Cursor(104)));
    assert_eq!(
        h.index.ids(ACCOUNT),
        vec![
            chunk_vector_id(&MessageId::new("m1"), 0),
            chunk_vector_id(&MessageId::new("m2"), 0),
        ]
    );

    let unindexed = h
        .store
        .get_message(ACCOUNT, &MessageId::new("m3"))
        .unwrap()
        .unwrap();
    assert!(unindexed.indexed_at.is_none());
}

#[test]
fn test_cancelled_incremental_keeps_cursor() {
    let h = Harness::new();
    h.set_cursor(50);
    h.mailbox.put("m1", "Hello", "Body", &[]);
    h.mailbox.set_pages(vec![vec![added(51, "m1")]]);

    h.engine.cancel();
    let stats = h.engine.run_incremental_sync(&h.account()).unwrap();

    assert_eq!(stats.outcome, Some(IncrementalOutcome::Cancelled));
    assert_eq!(h.message_count(), 0);
    assert_eq!(h.cursor(), Some(Cursor(50)));

    h.engine.reset_cancel();
    let stats = h.engine.run_incremental_sync(&h.account()).unwrap();
    assert_eq!(stats.outcome, Some(IncrementalOutcome::Applied));
    assert_eq!(h.cursor(), Some(Cursor(51)));
}

#[test]
fn test_search_after_sync() {
    let h = Harness::new();
    h.mailbox.put("m1", "Invoice 42", "The invoice is attached", &[]);
    h.mailbox.put("m2", "Lunch", "Lunch at noon", &[]);
    h.mailbox.set_position(3);
    h.engine.run_initial_sync(&h.account(), None).unwrap();

    let search = SemanticSearch::new(
        h.engine.indexer().embeddings().clone(),
        h.engine.indexer().vectors().clone(),
        h.store.clone(),
    );
    let hits = search.search(ACCOUNT, "invoice", 5).unwrap();

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].message_id.as_str(), "m1");
    assert_eq!(hits[0].subject.as_deref(), Some("Invoice 42"));
}

#[test]
fn test_scheduler_runs_each_account_then_honors_cooldown() {
    let h = Harness::new();
    for (id, email) in [(ACCOUNT, "me@example.com"), ("second", "second@example.com")] {
        // A cursor but no previous run, so neither account is cooling down
        h.store
            .upsert_account(Account::new(id, email).with_cursor(Cursor(1)))
            .unwrap();
    }
    h.mailbox.set_position(9);

    let scheduler = SyncScheduler::new(Arc::new(h.engine), 3600);

    let mut runs = scheduler.run_all().unwrap();
    runs.sort_by(|a, b| a.account_id.cmp(&b.account_id));
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|r| matches!(r.run, AccountRun::Completed(_))));
    assert_eq!(h.store.get_account("second").unwrap().unwrap().cursor, Some(Cursor(9)));

    // Both cursors were just committed
    let runs = scheduler.run_all().unwrap();
    assert!(runs.iter().all(|r| matches!(r.run, AccountRun::SkippedCooldown)));
}

fn create_sqlite_store() -> (Arc<SqliteMessageStore>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("mailsync.db");
    let store = Arc::new(SqliteMessageStore::new(&db_path).unwrap());
    (store, temp_dir)
}

#[test]
fn test_sqlite_complete_sync_lifecycle() {
    let (store, temp_dir) = create_sqlite_store();
    let h = Harness::with_store(store);

    h.mailbox.put("m1", "Invoice", "Invoice body", &["INBOX", "UNREAD"]);
    h.mailbox.put("m2", "Lunch", "Lunch body", &["INBOX"]);
    h.mailbox.set_position(40);
    h.engine.run_initial_sync(&h.account(), None).unwrap();

    h.mailbox.put("m3", "New", "Fresh mail", &["INBOX"]);
    h.mailbox.set_pages(vec![vec![
        added(41, "m3"),
        ChangeRecord::LabelsRemoved {
            id: Cursor(42),
            message_id: MessageId::new("m1"),
            labels: labels(&["UNREAD"]),
        },
        ChangeRecord::Deleted {
            id: Cursor(43),
            message_id: MessageId::new("m2"),
        },
    ]]);
    let stats = h.engine.run_incremental_sync(&h.account()).unwrap();
    assert_eq!(stats.errors, 0);
    drop(h);

    // Everything survives a reopen
    let reopened = SqliteMessageStore::new(temp_dir.path().join("mailsync.db")).unwrap();
    let account = reopened.get_account(ACCOUNT).unwrap().unwrap();
    assert_eq!(account.cursor, Some(Cursor(43)));
    assert!(account.last_sync_at.is_some());
    assert_eq!(reopened.count_messages(ACCOUNT).unwrap(), 2);
    assert_eq!(reopened.count_indexed(ACCOUNT).unwrap(), 2);

    let m1 = reopened
        .get_message(ACCOUNT, &MessageId::new("m1"))
        .unwrap()
        .unwrap();
    let stored: Vec<&str> = m1.label_ids.iter().map(String::as_str).collect();
    assert_eq!(stored, vec!["INBOX"]);
    assert_eq!(m1.body_text, "Invoice body");
    assert!(!reopened.has_message(ACCOUNT, &MessageId::new("m2")).unwrap());
}

#[test]
fn test_chunking_is_deterministic_and_covering() {
    let chunker = Chunker::new(100, 20);
    let text = "A".repeat(1000);

    let first = chunker.split(&text);
    let second = chunker.split(&text);
    assert_eq!(first, second);

    assert_eq!(first.first().map(|c| c.start), Some(0));
    assert_eq!(first.last().map(|c| c.end), Some(1000));
    for pair in first.windows(2) {
        assert!(pair[1].start > pair[0].start);
        assert!(pair[1].start <= pair[0].end);
    }
}
