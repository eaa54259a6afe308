//! Message record persisted for each remote mail item

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// Remote message identifier (Gmail message ID)
///
/// Unique across every account in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Digest of `subject|from|body_text`, used to spot identical content
/// across re-fetches. Never a key.
pub fn content_hash(subject: Option<&str>, from: Option<&str>, body_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(subject.unwrap_or_default().as_bytes());
    hasher.update(b"|");
    hasher.update(from.unwrap_or_default().as_bytes());
    hasher.update(b"|");
    hasher.update(body_text.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// One decoded remote mail item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Owning account
    pub account_id: String,
    /// Remote message ID (immutable)
    pub id: MessageId,
    pub thread_id: Option<String>,
    pub subject: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub cc: Option<String>,
    pub bcc: Option<String>,
    /// Parsed `Date` header
    pub date: Option<DateTime<Utc>>,
    pub snippet: Option<String>,
    /// Lowercased header name -> value
    pub headers: BTreeMap<String, String>,
    pub body_text: String,
    pub body_html: String,
    pub size_estimate: Option<i64>,
    /// Label IDs (e.g. "INBOX", "UNREAD")
    pub label_ids: BTreeSet<String>,
    pub content_hash: String,
    /// When the vectors were last written; None = index stale or absent
    pub indexed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl MessageRecord {
    /// Create a new record builder
    pub fn builder(account_id: impl Into<String>, id: MessageId) -> MessageRecordBuilder {
        MessageRecordBuilder::new(account_id.into(), id)
    }

    /// Overwrite every mutable field with the fields of a fresher fetch,
    /// keeping the original `created_at`.
    pub fn overwrite_from(&mut self, fresh: MessageRecord) {
        let created_at = self.created_at;
        *self = fresh;
        self.created_at = created_at;
    }

    /// Text fed to the chunker: subject line followed by the body
    pub fn index_text(&self) -> String {
        let subject = self.subject.as_deref().unwrap_or_default().trim();
        let body = self.body_text.trim();
        if subject.is_empty() {
            body.to_string()
        } else {
            format!("Subject: {}\n\n{}", subject, body)
        }
    }
}

/// Builder for creating MessageRecord instances
pub struct MessageRecordBuilder {
    record: MessageRecord,
}

impl MessageRecordBuilder {
    fn new(account_id: String, id: MessageId) -> Self {
        Self {
            record: MessageRecord {
                account_id,
                id,
                thread_id: None,
                subject: None,
                from: None,
                to: None,
                cc: None,
                bcc: None,
                date: None,
                snippet: None,
                headers: BTreeMap::new(),
                body_text: String::new(),
                body_html: String::new(),
                size_estimate: None,
                label_ids: BTreeSet::new(),
                content_hash: String::new(),
                indexed_at: None,
                created_at: Utc::now(),
            },
        }
    }

    pub fn thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.record.thread_id = Some(thread_id.into());
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.record.subject = Some(subject.into());
        self
    }

    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.record.from = Some(from.into());
        self
    }

    pub fn to(mut self, to: impl Into<String>) -> Self {
        self.record.to = Some(to.into());
        self
    }

    pub fn date(mut self, date: DateTime<Utc>) -> Self {
        self.record.date = Some(date);
        self
    }

    pub fn snippet(mut self, snippet: impl Into<String>) -> Self {
        self.record.snippet = Some(snippet.into());
        self
    }

    pub fn headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.record.to = headers.get("to").cloned().or(self.record.to);
        self.record.cc = headers.get("cc").cloned();
        self.record.bcc = headers.get("bcc").cloned();
        self.record.headers = headers;
        self
    }

    pub fn body_text(mut self, body_text: impl Into<String>) -> Self {
        self.record.body_text = body_text.into();
        self
    }

    pub fn body_html(mut self, body_html: impl Into<String>) -> Self {
        self.record.body_html = body_html.into();
        self
    }

    pub fn size_estimate(mut self, size: i64) -> Self {
        self.record.size_estimate = Some(size);
        self
    }

    pub fn label_ids<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.record.label_ids = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn indexed_at(mut self, at: DateTime<Utc>) -> Self {
        self.record.indexed_at = Some(at);
        self
    }

    /// Finish the record, deriving the content hash
    pub fn build(mut self) -> MessageRecord {
        self.record.content_hash = content_hash(
            self.record.subject.as_deref(),
            self.record.from.as_deref(),
            &self.record.body_text,
        );
        self.record
    }
}
