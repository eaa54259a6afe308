//! Domain models for synced mail entities

mod account;
mod change;
mod message;
mod progress;

pub use account::{Account, Cursor};
pub use change::{ChangePage, ChangeRecord};
pub use message::{MessageId, MessageRecord, MessageRecordBuilder, content_hash};
pub use progress::{SyncPhase, SyncProgress};
