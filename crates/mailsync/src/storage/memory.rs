//! In-memory storage implementation
//!
//! Used by tests and by local runs that don't need persistence.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::RwLock;

use super::{MessageStore, StoreError, UpsertOutcome};
use crate::models::{Account, Cursor, MessageId, MessageRecord};

/// In-memory implementation of MessageStore
///
/// Uses HashMaps protected by RwLocks for thread-safe access. Messages are
/// keyed by remote id alone since ids are globally unique.
pub struct InMemoryMessageStore {
    accounts: RwLock<HashMap<String, Account>>,
    messages: RwLock<HashMap<String, MessageRecord>>,
}

impl InMemoryMessageStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            messages: RwLock::new(HashMap::new()),
        }
    }

    /// Apply `f` to the account's message, if present
    fn with_message<F>(&self, account_id: &str, id: &MessageId, f: F) -> bool
    where
        F: FnOnce(&mut MessageRecord),
    {
        let mut messages = self.messages.write().unwrap();
        match messages.get_mut(id.as_str()) {
            Some(record) if record.account_id == account_id => {
                f(record);
                true
            }
            _ => false,
        }
    }
}

impl Default for InMemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStore for InMemoryMessageStore {
    fn upsert_account(&self, account: Account) -> Result<()> {
        let mut accounts = self.accounts.write().unwrap();
        accounts.insert(account.id.clone(), account);
        Ok(())
    }

    fn get_account(&self, account_id: &str) -> Result<Option<Account>> {
        let accounts = self.accounts.read().unwrap();
        Ok(accounts.get(account_id).cloned())
    }

    fn list_accounts(&self) -> Result<Vec<Account>> {
        let accounts = self.accounts.read().unwrap();
        let mut list: Vec<Account> = accounts.values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(list)
    }

    fn save_cursor(&self, account_id: &str, cursor: Cursor) -> Result<()> {
        let mut accounts = self.accounts.write().unwrap();
        let account = accounts
            .get_mut(account_id)
            .ok_or_else(|| StoreError::UnknownAccount(account_id.to_string()))?;
        account.cursor = Some(cursor);
        account.last_sync_at = Some(Utc::now());
        Ok(())
    }

    fn has_message(&self, account_id: &str, id: &MessageId) -> Result<bool> {
        let messages = self.messages.read().unwrap();
        Ok(messages
            .get(id.as_str())
            .is_some_and(|m| m.account_id == account_id))
    }

    fn get_message(&self, account_id: &str, id: &MessageId) -> Result<Option<MessageRecord>> {
        let messages = self.messages.read().unwrap();
        Ok(messages
            .get(id.as_str())
            .filter(|m| m.account_id == account_id)
            .cloned())
    }

    fn upsert_message(&self, record: MessageRecord) -> Result<UpsertOutcome> {
        let mut messages = self.messages.write().unwrap();
        match messages.entry(record.id.0.clone()) {
            Entry::Occupied(entry) if entry.get().account_id != record.account_id => {
                Err(StoreError::OwnershipConflict {
                    message_id: record.id.0.clone(),
                    owner: entry.get().account_id.clone(),
                    claimed_by: record.account_id.clone(),
                }
                .into())
            }
            Entry::Occupied(mut entry) => {
                entry.get_mut().overwrite_from(record);
                Ok(UpsertOutcome::Updated)
            }
            Entry::Vacant(entry) => {
                entry.insert(record);
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    fn delete_message(&self, account_id: &str, id: &MessageId) -> Result<bool> {
        let mut messages = self.messages.write().unwrap();
        if messages
            .get(id.as_str())
            .is_some_and(|m| m.account_id == account_id)
        {
            messages.remove(id.as_str());
            return Ok(true);
        }
        Ok(false)
    }

    fn add_labels(&self, account_id: &str, id: &MessageId, labels: &[String]) -> Result<bool> {
        Ok(self.with_message(account_id, id, |record| {
            record.label_ids.extend(labels.iter().cloned());
        }))
    }

    fn remove_labels(
        &self,
        account_id: &str,
        id: &MessageId,
        labels: &[String],
    ) -> Result<bool> {
        Ok(self.with_message(account_id, id, |record| {
            record.label_ids.retain(|l| !labels.contains(l));
        }))
    }

    fn mark_indexed(&self, account_id: &str, id: &MessageId, at: DateTime<Utc>) -> Result<()> {
        self.with_message(account_id, id, |record| record.indexed_at = Some(at));
        Ok(())
    }

    fn count_messages(&self, account_id: &str) -> Result<usize> {
        let messages = self.messages.read().unwrap();
        Ok(messages
            .values()
            .filter(|m| m.account_id == account_id)
            .count())
    }

    fn count_indexed(&self, account_id: &str) -> Result<usize> {
        let messages = self.messages.read().unwrap();
        Ok(messages
            .values()
            .filter(|m| m.account_id == account_id && m.indexed_at.is_some())
            .count())
    }
}
