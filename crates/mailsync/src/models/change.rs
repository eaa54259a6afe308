//! Change-feed records

use super::{Cursor, MessageId};

/// One entry of the remote change feed
///
/// Each variant carries the feed position it was recorded at and only the
/// fields needed to apply it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeRecord {
    /// A message appeared (or was redelivered) and must be fetched
    Added { id: Cursor, message_id: MessageId },
    /// A message was removed remotely
    Deleted { id: Cursor, message_id: MessageId },
    /// Labels were added to a message
    LabelsAdded {
        id: Cursor,
        message_id: MessageId,
        labels: Vec<String>,
    },
    /// Labels were removed from a message
    LabelsRemoved {
        id: Cursor,
        message_id: MessageId,
        labels: Vec<String>,
    },
}

impl ChangeRecord {
    /// Feed position of this record
    pub fn id(&self) -> Cursor {
        match self {
            Self::Added { id, .. }
            | Self::Deleted { id, .. }
            | Self::LabelsAdded { id, .. }
            | Self::LabelsRemoved { id, .. } => *id,
        }
    }

    /// The message this record refers to
    pub fn message_id(&self) -> &MessageId {
        match self {
            Self::Added { message_id, .. }
            | Self::Deleted { message_id, .. }
            | Self::LabelsAdded { message_id, .. }
            | Self::LabelsRemoved { message_id, .. } => message_id,
        }
    }

    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Added { .. } => "added",
            Self::Deleted { .. } => "deleted",
            Self::LabelsAdded { .. } => "labels_added",
            Self::LabelsRemoved { .. } => "labels_removed",
        }
    }
}

/// One page of the change feed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangePage {
    /// Records in feed order
    pub records: Vec<ChangeRecord>,
    /// Token for the next page; None when the feed is exhausted
    pub next_page_token: Option<String>,
}
