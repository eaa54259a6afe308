//! Storage trait definitions

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::models::{Account, Cursor, MessageId, MessageRecord};

/// Integrity errors raised by store implementations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A remote message id already belongs to another account
    #[error("message {message_id} belongs to account {owner}, not {claimed_by}")]
    OwnershipConflict {
        message_id: String,
        owner: String,
        claimed_by: String,
    },

    #[error("unknown account: {0}")]
    UnknownAccount(String),
}

/// Result of an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

/// Trait for message and account persistence
///
/// Every message operation is scoped by account id. Implementations must
/// tolerate concurrent calls for different accounts; the sync engine takes
/// no locks of its own.
pub trait MessageStore: Send + Sync {
    // === Accounts ===

    /// Insert or update an account
    fn upsert_account(&self, account: Account) -> Result<()>;

    /// Get an account by ID
    fn get_account(&self, account_id: &str) -> Result<Option<Account>>;

    /// List all accounts, ordered by ID
    fn list_accounts(&self) -> Result<Vec<Account>>;

    /// Commit a new change-feed cursor and stamp `last_sync_at`
    fn save_cursor(&self, account_id: &str, cursor: Cursor) -> Result<()>;

    // === Messages ===

    /// Check if a message exists for the account
    fn has_message(&self, account_id: &str, id: &MessageId) -> Result<bool>;

    /// Get a message by ID
    fn get_message(&self, account_id: &str, id: &MessageId) -> Result<Option<MessageRecord>>;

    /// Insert a message, or overwrite every field but `created_at`.
    ///
    /// Fails with [`StoreError::OwnershipConflict`] when the id is owned by
    /// another account.
    fn upsert_message(&self, record: MessageRecord) -> Result<UpsertOutcome>;

    /// Delete a message; returns false if it was absent
    fn delete_message(&self, account_id: &str, id: &MessageId) -> Result<bool>;

    /// Union labels into the message's label set; false if the message is absent
    fn add_labels(&self, account_id: &str, id: &MessageId, labels: &[String]) -> Result<bool>;

    /// Subtract labels from the message's label set; false if the message is absent
    fn remove_labels(&self, account_id: &str, id: &MessageId, labels: &[String])
    -> Result<bool>;

    /// Record that the message's vectors were written at `at`
    fn mark_indexed(&self, account_id: &str, id: &MessageId, at: DateTime<Utc>) -> Result<()>;

    /// Count messages for an account
    fn count_messages(&self, account_id: &str) -> Result<usize>;

    /// Count messages with `indexed_at` set
    fn count_indexed(&self, account_id: &str) -> Result<usize>;
}
