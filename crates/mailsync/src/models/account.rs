//! Account model representing one linked remote mailbox

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Position marker into the remote change feed (Gmail historyId)
///
/// Cursors only move forward; comparison is numeric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(pub u64);

impl Cursor {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Cursor {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl From<u64> for Cursor {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// A linked mailbox
///
/// Created by account linking, which is outside this crate. The sync engine
/// only ever mutates `cursor` and `last_sync_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Stable account identifier; also the vector index namespace
    pub id: String,
    /// Mailbox address
    pub email: String,
    /// Last committed change-feed position (None = no baseline yet)
    pub cursor: Option<Cursor>,
    /// When the cursor was last committed
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Credential handle for the transport (JSON-serialized OAuth token)
    pub token_data: Option<String>,
}

impl Account {
    /// Create an account with no baseline
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            cursor: None,
            last_sync_at: None,
            token_data: None,
        }
    }

    /// Set the OAuth token data (JSON-serialized)
    pub fn with_token_data(mut self, token_data: impl Into<String>) -> Self {
        self.token_data = Some(token_data.into());
        self
    }

    /// Set a known cursor
    pub fn with_cursor(mut self, cursor: Cursor) -> Self {
        self.cursor = Some(cursor);
        self
    }

    /// Whether a baseline snapshot has ever seeded the cursor
    pub fn has_baseline(&self) -> bool {
        self.cursor.is_some()
    }
}
