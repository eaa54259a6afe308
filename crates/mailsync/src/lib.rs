//! Mailsync - incremental mailbox mirroring into a store and a vector index
//!
//! This crate provides:
//! - Domain models (Account, MessageRecord, ChangeRecord, SyncProgress)
//! - Gmail transport, token refresh and MIME decoding
//! - Message storage trait with in-memory and SQLite backends
//! - Chunking, embedding and vector index adapters with bounded retry
//! - Baseline snapshot and incremental change-feed sync
//! - Semantic search, cited answer context and a multi-account scheduler
//!
//! All I/O is synchronous (ureq, rusqlite) so any executor or plain threads
//! can drive it.

pub mod answer;
pub mod chunker;
pub mod config;
pub mod embedding;
pub mod indexing;
pub mod models;
pub mod progress;
pub mod retry;
pub mod search;
pub mod storage;
pub mod sync;
pub mod transport;
pub mod vector;

pub use self::config::SyncConfig;
pub use answer::{
    Answer, AnswerContext, AnswerService, ChatMessage, ChatModel, Citation, OpenAiChat, Role,
};
pub use chunker::{Chunk, Chunker, Tokenizer, WhitespaceTokenizer};
pub use embedding::{Embedding, EmbeddingGateway, EmbeddingProvider, OpenAiEmbeddings};
pub use indexing::{CHUNK_TYPE, MessageIndexer, chunk_vector_id};
pub use models::{
    Account, ChangePage, ChangeRecord, Cursor, MessageId, MessageRecord, SyncPhase, SyncProgress,
    content_hash,
};
pub use progress::ProgressTracker;
pub use retry::RetryPolicy;
pub use search::{SearchHit, SemanticSearch};
pub use storage::{InMemoryMessageStore, MessageStore, SqliteMessageStore, StoreError, UpsertOutcome};
pub use sync::{
    AccountRun, IncrementalOutcome, ScheduledRun, SyncEngine, SyncScheduler, SyncStats,
    cooldown_elapsed, cooldown_remaining,
};
pub use transport::{
    DecodedMessage, GmailDecoder, GmailTransport, MailTransport, MessageDecoder, MessageIdStream,
    RawMessage, TransportError, is_cursor_invalid,
};
pub use vector::{
    Filter, InMemoryVectorIndex, Metadata, PineconeIndex, QueryMatch, VectorIndex,
    VectorIndexAdapter, VectorRecord,
};
