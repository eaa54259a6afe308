//! Gmail API HTTP client
//!
//! Implements [`MailTransport`] over the Gmail REST API.
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use anyhow::{Context, Result};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use std::collections::VecDeque;
use std::time::Duration;

use super::GmailAuth;
use super::api::{HistoryRecord, HistoryResponse, ListMessagesResponse, MessageRef, Profile};
use crate::models::{Account, ChangePage, ChangeRecord, Cursor, MessageId};
use crate::transport::{MailTransport, MessageIdStream, RawMessage, TransportError};

/// Gmail API client shared by every account
pub struct GmailTransport {
    agent: ureq::Agent,
    auth: GmailAuth,
    base_url: String,
    list_page_size: usize,
    history_page_size: usize,
}

impl GmailTransport {
    /// Gmail API base URL
    const BASE_URL: &'static str = "https://gmail.googleapis.com/gmail/v1";

    /// Create a client; every request is bounded by `timeout`
    pub fn new(client_id: String, client_secret: String, timeout: Duration) -> Self {
        // Status codes are inspected by hand so history errors can be classified
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();

        Self {
            auth: GmailAuth::new(agent.clone(), client_id, client_secret),
            agent,
            base_url: Self::BASE_URL.to_string(),
            list_page_size: 500,
            history_page_size: 1000,
        }
    }

    /// Page sizes for message listing (max 500) and history (max 1000)
    pub fn with_page_sizes(mut self, list: usize, history: usize) -> Self {
        self.list_page_size = list.clamp(1, 500);
        self.history_page_size = history.clamp(1, 1000);
        self
    }

    /// Point at a different API root
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// GET a JSON resource, mapping failures through `on_error`
    fn get_json<T: DeserializeOwned>(
        &self,
        account: &Account,
        url: &str,
        what: &str,
        on_error: fn(u16, &str) -> TransportError,
    ) -> Result<T> {
        let access_token = self.auth.get_access_token(account)?;

        let mut response = self
            .agent
            .get(url)
            .header("Authorization", &format!("Bearer {}", access_token))
            .call()
            .with_context(|| format!("Failed to send {} request", what))?;

        let status = response.status().as_u16();
        if status == 401 {
            self.auth.invalidate(&account.id);
        }
        if !(200..300).contains(&status) {
            let body = response.body_mut().read_to_string().unwrap_or_default();
            return Err(anyhow::Error::new(on_error(status, &body))
                .context(format!("{} failed for account {}", what, account.id)));
        }

        response
            .body_mut()
            .read_json()
            .with_context(|| format!("Failed to parse {} response", what))
    }

    /// List one page of message IDs
    fn list_messages(
        &self,
        account: &Account,
        query: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<ListMessagesResponse> {
        let mut url = format!(
            "{}/users/me/messages?maxResults={}",
            self.base_url, self.list_page_size
        );
        if let Some(q) = query {
            url.push_str(&format!("&q={}", urlencoding::encode(q)));
        }
        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }

        self.get_json(account, &url, "list messages", TransportError::from_response)
    }
}

impl MailTransport for GmailTransport {
    fn list_message_ids<'a>(
        &'a self,
        account: &'a Account,
        query: Option<&str>,
    ) -> Result<MessageIdStream<'a>> {
        Ok(Box::new(MessageIdPager {
            transport: self,
            account,
            query: query.map(str::to_string),
            page_token: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }))
    }

    fn get_message_full(&self, account: &Account, id: &MessageId) -> Result<RawMessage> {
        let url = format!(
            "{}/users/me/messages/{}?format=full",
            self.base_url,
            urlencoding::encode(id.as_str())
        );
        self.get_json(account, &url, "get message", TransportError::from_response)
    }

    fn get_changes_since(
        &self,
        account: &Account,
        cursor: Cursor,
        page_token: Option<&str>,
    ) -> Result<ChangePage> {
        let mut url = format!(
            "{}/users/me/history?startHistoryId={}&maxResults={}\
             &historyTypes=messageAdded&historyTypes=messageDeleted\
             &historyTypes=labelAdded&historyTypes=labelRemoved",
            self.base_url, cursor, self.history_page_size
        );
        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }

        let response: HistoryResponse = self.get_json(
            account,
            &url,
            "list history",
            TransportError::classify_feed_error,
        )?;

        Ok(ChangePage {
            records: flatten_history(response.history.unwrap_or_default()),
            next_page_token: response.next_page_token,
        })
    }

    fn get_current_position(&self, account: &Account) -> Result<Cursor> {
        let url = format!("{}/users/me/profile", self.base_url);
        let profile: Profile =
            self.get_json(account, &url, "get profile", TransportError::from_response)?;

        profile
            .history_id
            .parse()
            .with_context(|| format!("Invalid historyId in profile: {}", profile.history_id))
    }
}

/// Flatten history entries into change records, preserving feed order.
///
/// Within one entry: additions, deletions, label additions, label removals.
/// Entries with an unparseable id and changes without a message are skipped.
pub(crate) fn flatten_history(entries: Vec<HistoryRecord>) -> Vec<ChangeRecord> {
    let mut records = Vec::new();

    for entry in entries {
        let id: Cursor = match entry.id.parse() {
            Ok(id) => id,
            Err(_) => {
                warn!("Skipping history entry with invalid id {:?}", entry.id);
                continue;
            }
        };

        let target = |m: Option<MessageRef>| m.map(|m| MessageId::new(m.id));

        for added in entry.messages_added.unwrap_or_default() {
            if let Some(message_id) = target(added.message) {
                records.push(ChangeRecord::Added { id, message_id });
            }
        }
        for deleted in entry.messages_deleted.unwrap_or_default() {
            if let Some(message_id) = target(deleted.message) {
                records.push(ChangeRecord::Deleted { id, message_id });
            }
        }
        for change in entry.labels_added.unwrap_or_default() {
            if let Some(message_id) = target(change.message) {
                records.push(ChangeRecord::LabelsAdded {
                    id,
                    message_id,
                    labels: change.label_ids.unwrap_or_default(),
                });
            }
        }
        for change in entry.labels_removed.unwrap_or_default() {
            if let Some(message_id) = target(change.message) {
                records.push(ChangeRecord::LabelsRemoved {
                    id,
                    message_id,
                    labels: change.label_ids.unwrap_or_default(),
                });
            }
        }
    }

    records
}

/// Lazily walks `users.messages.list` one page at a time
struct MessageIdPager<'a> {
    transport: &'a GmailTransport,
    account: &'a Account,
    query: Option<String>,
    page_token: Option<String>,
    buffer: VecDeque<MessageId>,
    exhausted: bool,
}

impl Iterator for MessageIdPager<'_> {
    type Item = Result<MessageId>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(id) = self.buffer.pop_front() {
                return Some(Ok(id));
            }
            if self.exhausted {
                return None;
            }

            let page = self.transport.list_messages(
                self.account,
                self.query.as_deref(),
                self.page_token.as_deref(),
            );
            let page = match page {
                Ok(page) => page,
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            };

            let ids = page.messages.unwrap_or_default();
            debug!(
                "Listed {} message ids for account {} (estimate {:?})",
                ids.len(),
                self.account.id,
                page.result_size_estimate
            );
            self.buffer
                .extend(ids.into_iter().map(|m| MessageId::new(m.id)));

            match page.next_page_token {
                Some(token) => self.page_token = Some(token),
                None => self.exhausted = true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_history_order() {
        let json = r#"{
            "history": [
                {
                    "id": "101",
                    "messagesAdded": [{"message": {"id": "m1", "threadId": "t1"}}],
                    "labelsRemoved": [{"message": {"id": "m0"}, "labelIds": ["UNREAD"]}],
                    "messagesDeleted": [{"message": {"id": "m9"}}]
                },
                {
                    "id": "102",
                    "labelsAdded": [{"message": {"id": "m1"}, "labelIds": ["STARRED"]}]
                }
            ],
            "nextPageToken": "p2",
            "historyId": "102"
        }"#;
        let response: HistoryResponse = serde_json::from_str(json).unwrap();
        let records = flatten_history(response.history.unwrap());

        let kinds: Vec<(&str, u64, &str)> = records
            .iter()
            .map(|r| (r.kind(), r.id().value(), r.message_id().as_str()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("added", 101, "m1"),
                ("deleted", 101, "m9"),
                ("labels_removed", 101, "m0"),
                ("labels_added", 102, "m1"),
            ]
        );
        assert_eq!(
            records[3],
            ChangeRecord::LabelsAdded {
                id: Cursor(102),
                message_id: MessageId::new("m1"),
                labels: vec!["STARRED".to_string()],
            }
        );
    }

    #[test]
    fn test_flatten_skips_bad_entries() {
        let json = r#"{
            "history": [
                {"id": "not-a-number", "messagesAdded": [{"message": {"id": "m1"}}]},
                {"id": "7", "messagesAdded": [{}]},
                {"id": "8"}
            ]
        }"#;
        let response: HistoryResponse = serde_json::from_str(json).unwrap();
        assert!(flatten_history(response.history.unwrap()).is_empty());
    }

    #[test]
    fn test_parse_profile() {
        let json = r#"{"emailAddress": "a@example.com", "messagesTotal": 10, "threadsTotal": 4, "historyId": "5551"}"#;
        let profile: Profile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.history_id.parse::<Cursor>().unwrap(), Cursor(5551));
    }

    #[test]
    fn test_page_sizes_are_clamped() {
        let transport = GmailTransport::new("id".into(), "secret".into(), Duration::from_secs(1))
            .with_page_sizes(10_000, 0);
        assert_eq!(transport.list_page_size, 500);
        assert_eq!(transport.history_page_size, 1);
    }
}
