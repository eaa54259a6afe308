//! Storage traits and implementations
//!
//! The trait-based design allows swapping between the in-memory store
//! (tests, local runs) and the SQLite store.

mod memory;
mod sqlite;
mod traits;

pub use memory::InMemoryMessageStore;
pub use sqlite::SqliteMessageStore;
pub use traits::{MessageStore, StoreError, UpsertOutcome};
