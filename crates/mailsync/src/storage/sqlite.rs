//! SQLite-based message storage with zstd-compressed bodies

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use rusqlite_migration::{M, Migrations};

use super::{MessageStore, StoreError, UpsertOutcome};
use crate::models::{Account, Cursor, MessageId, MessageRecord};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- Linked mailboxes and their change-feed cursor
            CREATE TABLE accounts (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL,
                cursor INTEGER,
                last_sync_at TEXT,
                token_data TEXT
            );

            -- Message metadata with zstd-compressed bodies.
            -- Remote ids are globally unique, so they are the primary key.
            CREATE TABLE messages (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                thread_id TEXT,
                subject TEXT,
                from_addr TEXT,
                to_addr TEXT,
                cc TEXT,
                bcc TEXT,
                date TEXT,
                snippet TEXT,
                headers_json TEXT NOT NULL DEFAULT '{}',
                body_text BLOB,  -- zstd compressed
                body_html BLOB,  -- zstd compressed
                size_estimate INTEGER,
                content_hash TEXT NOT NULL,
                indexed_at TEXT,
                created_at TEXT NOT NULL,
                FOREIGN KEY (account_id) REFERENCES accounts(id) ON DELETE CASCADE
            );

            CREATE INDEX idx_messages_account_date ON messages(account_id, date);
            CREATE INDEX idx_messages_content_hash ON messages(content_hash);

            -- Labels on messages (unordered set per message)
            CREATE TABLE message_labels (
                message_id TEXT NOT NULL,
                label_id TEXT NOT NULL,
                PRIMARY KEY (message_id, label_id),
                FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE
            );

            CREATE INDEX idx_message_labels_label ON message_labels(label_id);
            "#,
        ),
    ])
}

/// Raw `messages` row before decompression and timestamp parsing
struct MessageRow {
    id: String,
    account_id: String,
    thread_id: Option<String>,
    subject: Option<String>,
    from: Option<String>,
    to: Option<String>,
    cc: Option<String>,
    bcc: Option<String>,
    date: Option<String>,
    snippet: Option<String>,
    headers_json: String,
    body_text: Option<Vec<u8>>,
    body_html: Option<Vec<u8>>,
    size_estimate: Option<i64>,
    content_hash: String,
    indexed_at: Option<String>,
    created_at: String,
}

const MESSAGE_COLUMNS: &str = "id, account_id, thread_id, subject, from_addr, to_addr, cc, bcc, \
     date, snippet, headers_json, body_text, body_html, size_estimate, content_hash, indexed_at, \
     created_at";

impl MessageRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            account_id: row.get(1)?,
            thread_id: row.get(2)?,
            subject: row.get(3)?,
            from: row.get(4)?,
            to: row.get(5)?,
            cc: row.get(6)?,
            bcc: row.get(7)?,
            date: row.get(8)?,
            snippet: row.get(9)?,
            headers_json: row.get(10)?,
            body_text: row.get(11)?,
            body_html: row.get(12)?,
            size_estimate: row.get(13)?,
            content_hash: row.get(14)?,
            indexed_at: row.get(15)?,
            created_at: row.get(16)?,
        })
    }

    fn into_record(self, label_ids: BTreeSet<String>) -> Result<MessageRecord> {
        let headers: BTreeMap<String, String> = serde_json::from_str(&self.headers_json)
            .with_context(|| format!("Corrupt headers for message {}", self.id))?;

        Ok(MessageRecord {
            body_text: decompress(self.body_text)?,
            body_html: decompress(self.body_html)?,
            date: self.date.as_deref().map(parse_time).transpose()?,
            indexed_at: self.indexed_at.as_deref().map(parse_time).transpose()?,
            created_at: parse_time(&self.created_at)?,
            account_id: self.account_id,
            id: MessageId::new(self.id),
            thread_id: self.thread_id,
            subject: self.subject,
            from: self.from,
            to: self.to,
            cc: self.cc,
            bcc: self.bcc,
            snippet: self.snippet,
            headers,
            size_estimate: self.size_estimate,
            label_ids,
            content_hash: self.content_hash,
        })
    }
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp in database: {}", s))
}

// Compress bodies with zstd (level 3 = good balance of speed vs compression)
fn compress(text: &str) -> Result<Option<Vec<u8>>> {
    if text.is_empty() {
        return Ok(None);
    }
    Ok(Some(
        zstd::encode_all(text.as_bytes(), 3).context("Failed to compress body")?,
    ))
}

fn decompress(data: Option<Vec<u8>>) -> Result<String> {
    let Some(data) = data else {
        return Ok(String::new());
    };
    let bytes = zstd::decode_all(data.as_slice()).context("Failed to decompress body")?;
    String::from_utf8(bytes).context("Body is not valid UTF-8")
}

/// SQLite-based message storage
pub struct SqliteMessageStore {
    conn: Mutex<Connection>,
}

impl SqliteMessageStore {
    /// Open (or create) the database at `db_path` and run migrations
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        // WAL lets readers run during a sync's writes; foreign_keys is
        // required for ON DELETE CASCADE.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Load labels for a message
    fn load_labels(conn: &Connection, message_id: &str) -> Result<BTreeSet<String>> {
        let mut stmt = conn.prepare("SELECT label_id FROM message_labels WHERE message_id = ?")?;

        let labels = stmt
            .query_map([message_id], |row| row.get(0))?
            .collect::<Result<BTreeSet<String>, _>>()?;

        Ok(labels)
    }

    /// Whether the account owns the message
    fn owns(conn: &Connection, account_id: &str, id: &MessageId) -> Result<bool> {
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM messages WHERE id = ? AND account_id = ?",
                params![id.as_str(), account_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn load_account(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Account, Option<String>)> {
        let cursor: Option<i64> = row.get(2)?;
        let account = Account {
            id: row.get(0)?,
            email: row.get(1)?,
            cursor: cursor.map(|c| Cursor(c as u64)),
            last_sync_at: None,
            token_data: row.get(4)?,
        };
        Ok((account, row.get(3)?))
    }

    fn finish_account((mut account, last_sync_at): (Account, Option<String>)) -> Result<Account> {
        account.last_sync_at = last_sync_at.as_deref().map(parse_time).transpose()?;
        Ok(account)
    }
}

impl MessageStore for SqliteMessageStore {
    fn upsert_account(&self, account: Account) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        // ON CONFLICT DO UPDATE rather than INSERT OR REPLACE: a replace
        // deletes the row first and would cascade to the account's messages.
        conn.execute(
            "INSERT INTO accounts (id, email, cursor, last_sync_at, token_data)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                email = excluded.email,
                cursor = excluded.cursor,
                last_sync_at = excluded.last_sync_at,
                token_data = excluded.token_data",
            params![
                account.id,
                account.email,
                account.cursor.map(|c| c.value() as i64),
                account.last_sync_at.map(|t| t.to_rfc3339()),
                account.token_data,
            ],
        )?;
        Ok(())
    }

    fn get_account(&self, account_id: &str) -> Result<Option<Account>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT id, email, cursor, last_sync_at, token_data FROM accounts WHERE id = ?",
                [account_id],
                Self::load_account,
            )
            .optional()?;
        row.map(Self::finish_account).transpose()
    }

    fn list_accounts(&self) -> Result<Vec<Account>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, email, cursor, last_sync_at, token_data FROM accounts ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], Self::load_account)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(Self::finish_account).collect()
    }

    fn save_cursor(&self, account_id: &str, cursor: Cursor) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE accounts SET cursor = ?, last_sync_at = ? WHERE id = ?",
            params![cursor.value() as i64, Utc::now().to_rfc3339(), account_id],
        )?;
        if updated == 0 {
            return Err(StoreError::UnknownAccount(account_id.to_string()).into());
        }
        Ok(())
    }

    fn has_message(&self, account_id: &str, id: &MessageId) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        Self::owns(&conn, account_id, id)
    }

    fn get_message(&self, account_id: &str, id: &MessageId) -> Result<Option<MessageRecord>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM messages WHERE id = ? AND account_id = ?",
                    MESSAGE_COLUMNS
                ),
                params![id.as_str(), account_id],
                MessageRow::from_row,
            )
            .optional()?;

        let Some(row) = row else {
            return Ok(None);
        };
        let labels = Self::load_labels(&conn, &row.id)?;
        row.into_record(labels).map(Some)
    }

    fn upsert_message(&self, record: MessageRecord) -> Result<UpsertOutcome> {
        let body_text = compress(&record.body_text)?;
        let body_html = compress(&record.body_html)?;
        let headers_json = serde_json::to_string(&record.headers)?;

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let owner: Option<String> = tx
            .query_row(
                "SELECT account_id FROM messages WHERE id = ?",
                [record.id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        let outcome = match owner {
            Some(owner) if owner != record.account_id => {
                return Err(StoreError::OwnershipConflict {
                    message_id: record.id.0.clone(),
                    owner,
                    claimed_by: record.account_id.clone(),
                }
                .into());
            }
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Inserted,
        };

        tx.execute(
            "INSERT INTO messages
             (id, account_id, thread_id, subject, from_addr, to_addr, cc, bcc, date, snippet,
              headers_json, body_text, body_html, size_estimate, content_hash, indexed_at,
              created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                thread_id = excluded.thread_id,
                subject = excluded.subject,
                from_addr = excluded.from_addr,
                to_addr = excluded.to_addr,
                cc = excluded.cc,
                bcc = excluded.bcc,
                date = excluded.date,
                snippet = excluded.snippet,
                headers_json = excluded.headers_json,
                body_text = excluded.body_text,
                body_html = excluded.body_html,
                size_estimate = excluded.size_estimate,
                content_hash = excluded.content_hash,
                indexed_at = excluded.indexed_at",
            params![
                record.id.as_str(),
                record.account_id,
                record.thread_id,
                record.subject,
                record.from,
                record.to,
                record.cc,
                record.bcc,
                record.date.map(|d| d.to_rfc3339()),
                record.snippet,
                headers_json,
                body_text,
                body_html,
                record.size_estimate,
                record.content_hash,
                record.indexed_at.map(|d| d.to_rfc3339()),
                record.created_at.to_rfc3339(),
            ],
        )
        .with_context(|| format!("Failed to upsert message {}", record.id))?;

        tx.execute(
            "DELETE FROM message_labels WHERE message_id = ?",
            [record.id.as_str()],
        )?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO message_labels (message_id, label_id) VALUES (?, ?)")?;
            for label in &record.label_ids {
                stmt.execute(params![record.id.as_str(), label])?;
            }
        }

        tx.commit()?;
        Ok(outcome)
    }

    fn delete_message(&self, account_id: &str, id: &MessageId) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        // Labels go with the row via ON DELETE CASCADE
        let deleted = conn.execute(
            "DELETE FROM messages WHERE id = ? AND account_id = ?",
            params![id.as_str(), account_id],
        )?;
        Ok(deleted > 0)
    }

    fn add_labels(&self, account_id: &str, id: &MessageId, labels: &[String]) -> Result<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        if !Self::owns(&tx, account_id, id)? {
            return Ok(false);
        }
        {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO message_labels (message_id, label_id) VALUES (?, ?)",
            )?;
            for label in labels {
                stmt.execute(params![id.as_str(), label])?;
            }
        }
        tx.commit()?;
        Ok(true)
    }

    fn remove_labels(
        &self,
        account_id: &str,
        id: &MessageId,
        labels: &[String],
    ) -> Result<bool> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        if !Self::owns(&tx, account_id, id)? {
            return Ok(false);
        }
        {
            let mut stmt =
                tx.prepare("DELETE FROM message_labels WHERE message_id = ? AND label_id = ?")?;
            for label in labels {
                stmt.execute(params![id.as_str(), label])?;
            }
        }
        tx.commit()?;
        Ok(true)
    }

    fn mark_indexed(&self, account_id: &str, id: &MessageId, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE messages SET indexed_at = ? WHERE id = ? AND account_id = ?",
            params![at.to_rfc3339(), id.as_str(), account_id],
        )?;
        Ok(())
    }

    fn count_messages(&self, account_id: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE account_id = ?",
            [account_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn count_indexed(&self, account_id: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE account_id = ? AND indexed_at IS NOT NULL",
            [account_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
