//! Mail transport and message decoding collaborators
//!
//! The sync engine only talks to the remote mailbox through [`MailTransport`]
//! and turns raw messages into text through [`MessageDecoder`]. The Gmail
//! implementations live in [`gmail`].

pub mod gmail;

pub use gmail::{GmailDecoder, GmailTransport};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::{Account, ChangePage, Cursor, MessageId};

/// Errors from the mail transport that callers branch on
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The change feed no longer accepts the stored cursor
    #[error("change cursor rejected ({status}): {reason}")]
    CursorInvalid { status: u16, reason: String },

    /// Any other non-success response
    #[error("mail API returned {status}: {reason}")]
    Http { status: u16, reason: String },
}

impl TransportError {
    /// Classify a failed change-feed response.
    ///
    /// 400/404 whose reason mentions the history id or invalidity means the
    /// cursor fell out of the retention window. A bare 404 means the same.
    pub fn classify_feed_error(status: u16, body: &str) -> Self {
        let reason = error_reason(body);
        let wording = reason.as_deref().is_some_and(|r| {
            let r = r.to_ascii_lowercase();
            r.contains("history") || r.contains("invalid")
        });

        let cursor_invalid = match status {
            400 => wording,
            404 => true,
            _ => false,
        };

        let reason = reason.unwrap_or_else(|| body.trim().to_string());
        if cursor_invalid {
            Self::CursorInvalid { status, reason }
        } else {
            Self::Http { status, reason }
        }
    }

    /// Wrap a failed response from any other endpoint
    pub fn from_response(status: u16, body: &str) -> Self {
        Self::Http {
            status,
            reason: error_reason(body).unwrap_or_else(|| body.trim().to_string()),
        }
    }
}

/// Whether an error (anywhere in its chain) is a rejected change cursor
pub fn is_cursor_invalid(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<TransportError>(),
        Some(TransportError::CursorInvalid { .. })
    )
}

/// Pull the human-readable reason out of a Google-style error body:
/// `error.message`, overridden by `error.details[0].reason`.
fn error_reason(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let error = value.get("error")?;

    let detail = error
        .get("details")
        .and_then(|d| d.get(0))
        .and_then(|d| d.get("reason"))
        .and_then(|r| r.as_str());
    let message = error.get("message").and_then(|m| m.as_str());

    detail.or(message).map(str::to_string)
}

/// A message as returned by the transport, before decoding
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub label_ids: Vec<String>,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub size_estimate: Option<i64>,
    /// Milliseconds since epoch, as a decimal string
    #[serde(default)]
    pub internal_date: Option<String>,
    /// MIME tree in the transport's wire shape
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Output of a [`MessageDecoder`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedMessage {
    /// Lowercased header name -> value (first occurrence wins)
    pub headers: BTreeMap<String, String>,
    pub body_text: String,
    pub body_html: String,
}

impl DecodedMessage {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Lazy, paginated sequence of remote message ids
pub type MessageIdStream<'a> = Box<dyn Iterator<Item = Result<MessageId>> + Send + 'a>;

/// Remote mailbox operations consumed by the sync engine
pub trait MailTransport: Send + Sync {
    /// Enumerate message ids matching an optional search filter
    fn list_message_ids<'a>(
        &'a self,
        account: &'a Account,
        query: Option<&str>,
    ) -> Result<MessageIdStream<'a>>;

    /// Fetch one message with its full MIME payload
    fn get_message_full(&self, account: &Account, id: &MessageId) -> Result<RawMessage>;

    /// One page of the change feed after `cursor`.
    ///
    /// Fails with [`TransportError::CursorInvalid`] when the cursor expired.
    fn get_changes_since(
        &self,
        account: &Account,
        cursor: Cursor,
        page_token: Option<&str>,
    ) -> Result<ChangePage>;

    /// The mailbox's current absolute change-feed position
    fn get_current_position(&self, account: &Account) -> Result<Cursor>;
}

/// Turns a raw message into headers and bodies
pub trait MessageDecoder: Send + Sync {
    fn decode(&self, raw: &RawMessage) -> Result<DecodedMessage>;
}
