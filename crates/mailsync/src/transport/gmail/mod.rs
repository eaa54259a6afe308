//! Gmail API integration
//!
//! This module provides:
//! - OAuth2 access token refresh per account
//! - Gmail API client for listing, fetching and history paging
//! - MIME payload decoding

mod auth;
mod client;
mod decode;

pub use auth::{GmailAuth, StoredToken};
pub use client::GmailTransport;
pub use decode::GmailDecoder;

/// Gmail API response types
pub mod api {
    use serde::{Deserialize, Serialize};

    /// Response from listing messages
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ListMessagesResponse {
        pub messages: Option<Vec<MessageRef>>,
        pub next_page_token: Option<String>,
        pub result_size_estimate: Option<u32>,
    }

    /// Reference to a message (just ID and thread ID)
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessageRef {
        pub id: String,
        pub thread_id: Option<String>,
    }

    /// Message payload containing headers and body
    #[derive(Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessagePayload {
        pub headers: Option<Vec<Header>>,
        pub body: Option<MessageBody>,
        pub parts: Option<Vec<MessagePart>>,
        pub mime_type: Option<String>,
    }

    /// Email header (name-value pair)
    #[derive(Debug, Deserialize, Serialize)]
    pub struct Header {
        pub name: String,
        pub value: String,
    }

    /// Message body (may be base64 encoded)
    #[derive(Debug, Deserialize)]
    pub struct MessageBody {
        pub size: Option<u32>,
        pub data: Option<String>,
    }

    /// Message part (for multipart messages)
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct MessagePart {
        pub part_id: Option<String>,
        pub mime_type: Option<String>,
        pub filename: Option<String>,
        pub headers: Option<Vec<Header>>,
        pub body: Option<MessageBody>,
        pub parts: Option<Vec<MessagePart>>,
    }

    /// One page of `users.history.list`
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryResponse {
        pub history: Option<Vec<HistoryRecord>>,
        pub next_page_token: Option<String>,
        pub history_id: Option<String>,
    }

    /// A single history entry; any combination of the change lists may be set
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryRecord {
        pub id: String,
        pub messages_added: Option<Vec<HistoryMessage>>,
        pub messages_deleted: Option<Vec<HistoryMessage>>,
        pub labels_added: Option<Vec<HistoryLabelChange>>,
        pub labels_removed: Option<Vec<HistoryLabelChange>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct HistoryMessage {
        pub message: Option<MessageRef>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct HistoryLabelChange {
        pub message: Option<MessageRef>,
        pub label_ids: Option<Vec<String>>,
    }

    /// `users.getProfile`
    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Profile {
        pub email_address: Option<String>,
        pub history_id: String,
        pub messages_total: Option<u64>,
    }
}
